// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use cadenza_core::math::Extent2D;
use cadenza_core::renderer::{
    ClearValues, ContractViolation, Engine, EngineConfig, GpuBackend, RenderError, SurfaceError,
    MAX_SURFACE_RECREATION_ATTEMPTS,
};
use cadenza_infra::{HeadlessBackend, HeadlessConfig};
use std::sync::Arc;
use std::time::Duration;

fn setup(latency_ms: u64) -> (Arc<HeadlessBackend>, Engine) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = HeadlessBackend::new(
        HeadlessConfig::default()
            .with_extent(320, 240)
            .with_latency(Duration::from_millis(latency_ms)),
    )
    .unwrap();
    let engine = Engine::initialize(backend.clone(), EngineConfig::default()).unwrap();
    (backend, engine)
}

#[test]
fn test_out_of_date_acquire_rebuilds_transparently() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = setup(5);
    engine.begin_frame(ClearValues::default()).unwrap();
    engine.end_frame().unwrap();
    backend.fail_next_acquire(SurfaceError::OutOfDate);

    // --- 2. ACT ---
    let result = engine.begin_frame(ClearValues::default());

    // --- 3. ASSERT ---
    assert!(result.is_ok(), "a stale surface should be rebuilt inside begin_frame");
    engine.end_frame().unwrap();
    assert_eq!(backend.stats().surface_recreations, 1);
    assert_eq!(backend.stats().presents, 2);
}

#[test]
fn test_failed_present_is_recoverable() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = setup(5);
    backend.fail_next_present(SurfaceError::Lost);

    // --- 2. ACT ---
    engine.begin_frame(ClearValues::default()).unwrap();
    let err = engine.end_frame().unwrap_err();

    // --- 3. ASSERT ---
    assert!(err.is_recoverable());
    assert!(!err.is_fatal());
    assert!(engine.pipeline().is_surface_stale());
    // The frame was still submitted and the pipeline advanced.
    assert_eq!(engine.frame_count(), 1);

    engine.begin_frame(ClearValues::default()).unwrap();
    let report = engine.end_frame().unwrap();
    assert_eq!(report.frame_number, 1);
    assert!(!engine.pipeline().is_surface_stale());
    assert_eq!(backend.stats().surface_recreations, 1);
}

#[test]
fn test_suboptimal_present_schedules_a_rebuild() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = setup(0);
    backend.report_suboptimal_next_present();

    // --- 2. ACT ---
    engine.begin_frame(ClearValues::default()).unwrap();
    let first = engine.end_frame().unwrap();
    engine.begin_frame(ClearValues::default()).unwrap();
    let second = engine.end_frame().unwrap();

    // --- 3. ASSERT ---
    assert!(first.suboptimal);
    assert!(!second.suboptimal);
    assert_eq!(backend.stats().surface_recreations, 1);
}

#[test]
fn test_persistent_surface_failure_gives_up() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = setup(0);
    for _ in 0..=MAX_SURFACE_RECREATION_ATTEMPTS {
        backend.fail_next_acquire(SurfaceError::OutOfDate);
    }

    // --- 2. ACT ---
    let err = engine.begin_frame(ClearValues::default()).unwrap_err();

    // --- 3. ASSERT ---
    assert_eq!(
        err,
        RenderError::Surface(SurfaceError::RecreationFailed {
            attempts: MAX_SURFACE_RECREATION_ATTEMPTS
        })
    );
    assert_eq!(
        backend.stats().surface_recreations,
        MAX_SURFACE_RECREATION_ATTEMPTS as u64
    );
    // No frame was left open; the next attempt succeeds.
    engine.begin_frame(ClearValues::default()).unwrap();
    engine.end_frame().unwrap();
}

#[test]
fn test_zero_sized_resize_is_rejected() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = setup(0);

    // --- 2. ACT ---
    let err = engine.resize(0, 480).unwrap_err();

    // --- 3. ASSERT ---
    assert!(matches!(
        err,
        RenderError::Surface(SurfaceError::ZeroSized { width: 0, height: 480 })
    ));
    assert!(err.is_recoverable());
    assert_eq!(backend.surface_extent(), Extent2D::new(320, 240));
    assert_eq!(backend.stats().surface_recreations, 0);
}

#[test]
fn test_resize_during_a_frame_is_a_contract_violation() {
    // --- 1. ARRANGE ---
    let (_backend, mut engine) = setup(0);
    engine.begin_frame(ClearValues::default()).unwrap();

    // --- 2. ACT ---
    let err = engine.resize(800, 600).unwrap_err();

    // --- 3. ASSERT ---
    assert_eq!(
        err,
        RenderError::Contract(ContractViolation::FrameAlreadyInProgress)
    );
    engine.end_frame().unwrap();
}

#[test]
fn test_device_loss_is_fatal() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = setup(200);
    for _ in 0..2 {
        engine.begin_frame(ClearValues::default()).unwrap();
        engine.end_frame().unwrap();
    }

    // --- 2. ACT ---
    backend.lose_device("simulated driver reset");
    let err = engine.begin_frame(ClearValues::default()).unwrap_err();

    // --- 3. ASSERT ---
    assert!(err.is_device_lost(), "unexpected error: {err:?}");
    assert!(err.is_fatal());
    assert!(!err.is_recoverable());
}

#[test]
fn test_frame_calls_out_of_order_are_rejected() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = setup(0);

    // --- 2. ACT ---
    let early_end = engine.end_frame().unwrap_err();
    engine.begin_frame(ClearValues::default()).unwrap();
    let nested = engine.begin_frame(ClearValues::default()).unwrap_err();
    let wait_inside = engine.wait_idle().unwrap_err();

    // --- 3. ASSERT ---
    assert_eq!(
        early_end,
        RenderError::Contract(ContractViolation::NoFrameInProgress)
    );
    assert_eq!(
        nested,
        RenderError::Contract(ContractViolation::FrameAlreadyInProgress)
    );
    assert_eq!(
        wait_inside,
        RenderError::Contract(ContractViolation::FrameAlreadyInProgress)
    );
    engine.end_frame().unwrap();
    assert_eq!(backend.stats().submissions, 1);
}
