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
    BufferDescriptor, BufferUsage, ClearValues, ConstantAllocation, DeferredRelease, Engine,
    EngineConfig, GpuBackend, TextureDescriptor, TextureFormat, TextureUsage,
};
use cadenza_infra::{HeadlessBackend, HeadlessConfig};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine_with_latency(frames: usize, latency_ms: u64) -> (Arc<HeadlessBackend>, Engine) {
    init_logger();
    let backend = HeadlessBackend::new(
        HeadlessConfig::default().with_latency(Duration::from_millis(latency_ms)),
    )
    .unwrap();
    let config = EngineConfig {
        frames_in_flight: frames,
        ..EngineConfig::default()
    };
    let engine = Engine::initialize(backend.clone(), config).unwrap();
    (backend, engine)
}

#[test]
fn test_cpu_never_runs_more_than_n_minus_one_frames_ahead() {
    for frames in [2, 3] {
        // --- 1. ARRANGE ---
        let (backend, mut engine) = engine_with_latency(frames, 40);
        let mut max_pending = 0;

        // --- 2. ACT ---
        for _ in 0..(frames * 4) {
            engine.begin_frame(ClearValues::default()).unwrap();
            let pending = engine.frames_pending().unwrap();
            assert!(
                pending <= frames - 1,
                "{pending} frames pending with {frames} slots"
            );
            max_pending = max_pending.max(pending);
            engine.end_frame().unwrap();
        }

        // --- 3. ASSERT ---
        assert_eq!(
            max_pending,
            frames - 1,
            "with a slow GPU the CPU should run exactly N - 1 frames ahead"
        );
        engine.wait_idle().unwrap();
        assert_eq!(engine.frames_pending().unwrap(), 0);
        assert_eq!(backend.stats().hazards, 0);
    }
}

#[test]
fn test_reused_slot_waits_for_its_previous_frame() {
    // --- 1. ARRANGE ---
    let slots = 2;
    let latency = Duration::from_millis(30);
    let (_backend, mut engine) = engine_with_latency(slots, latency.as_millis() as u64);

    // --- 2. ACT ---
    let reports: Vec<_> = (0..6)
        .map(|_| {
            engine.begin_frame(ClearValues::default()).unwrap();
            engine.end_frame().unwrap()
        })
        .collect();

    // --- 3. ASSERT ---
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.frame_number, i as u64);
        assert_eq!(report.slot, i % slots);
    }
    for report in &reports[..slots] {
        assert_eq!(report.waited_fence_value, 0, "first use of a slot has nothing to wait for");
    }
    for (i, report) in reports.iter().enumerate().skip(slots) {
        let previous = &reports[i - slots];
        assert_eq!(
            report.waited_fence_value, previous.fence_value,
            "frame {i} must wait for the value frame {} signaled",
            i - slots
        );
        assert!(report.fence_value > previous.fence_value);
        // The CPU does no work, so reusing a slot blocks for most of a GPU frame.
        assert!(
            report.fence_wait >= latency / 2,
            "frame {i} waited only {:?}",
            report.fence_wait
        );
    }
}

#[test]
fn test_constant_writes_never_race_in_flight_frames() {
    // --- 1. ARRANGE ---
    let frames = 3;
    let (backend, mut engine) = engine_with_latency(frames, 20);
    let mut allocations: Vec<ConstantAllocation> = Vec::new();

    // --- 2. ACT ---
    for i in 0..(frames as u32 * 3) {
        engine.begin_frame(ClearValues::default()).unwrap();
        let value = [i + 100, i + 200, i + 300, i + 400];
        let allocation = engine.write_constants_pod(&value).unwrap();
        engine
            .current_recorder()
            .unwrap()
            .bind_constants(0, allocation);
        engine.current_recorder().unwrap().draw(0..3, 0..1);
        allocations.push(allocation);
        engine.end_frame().unwrap();
    }
    engine.wait_idle().unwrap();

    // --- 3. ASSERT ---
    // Consecutive frames write through distinct buffers.
    for window in allocations.windows(frames) {
        for (a, b) in window.iter().zip(window.iter().skip(1)) {
            assert_ne!(a.buffer, b.buffer, "consecutive frames aliased a constant buffer");
        }
    }
    // Each slot holds the data of the last frame recorded into it.
    let last = allocations.len() - frames;
    for (i, allocation) in allocations[last..].iter().enumerate() {
        let frame = (last + i) as u32;
        let bytes = engine
            .readback_buffer(allocation.buffer, allocation.offset, allocation.size)
            .unwrap();
        let values: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        assert_eq!(values, vec![frame + 100, frame + 200, frame + 300, frame + 400]);
    }

    let stats = backend.stats();
    assert_eq!(stats.hazards, 0, "a CPU write raced pending GPU work");
    assert_eq!(stats.validation_errors, 0);
    assert_eq!(stats.draws, (frames * 3) as u64);
}

#[test]
fn test_deferred_texture_release_waits_for_its_frame() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = engine_with_latency(2, 40);
    let target = engine
        .backend()
        .create_texture(&TextureDescriptor {
            label: Some(Cow::Borrowed("Offscreen Target")),
            size: Extent2D::new(32, 32),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC,
        })
        .unwrap();
    let (_, textures_before) = backend.live_resources();

    // --- 2. ACT ---
    let recorder = engine.begin_frame(ClearValues::default()).unwrap();
    recorder.clear_color(target, [0.0, 1.0, 0.0, 1.0]);
    engine.release_after_frame(DeferredRelease::Texture(target));
    engine.end_frame().unwrap();

    // --- 3. ASSERT ---
    assert_eq!(engine.pending_releases(), 1);

    // The other slot does not run the release.
    engine.begin_frame(ClearValues::default()).unwrap();
    engine.end_frame().unwrap();
    assert_eq!(engine.pending_releases(), 1);
    assert_eq!(backend.live_resources().1, textures_before);

    // Reusing the slot means its frame has completed.
    engine.begin_frame(ClearValues::default()).unwrap();
    assert_eq!(engine.pending_releases(), 0);
    assert_eq!(backend.live_resources().1, textures_before - 1);
    engine.end_frame().unwrap();

    assert_eq!(backend.stats().hazards, 0, "the texture was destroyed while in use");
}

#[test]
fn test_release_outside_a_frame_waits_for_the_last_frame() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = engine_with_latency(3, 20);
    let buffer = engine
        .backend()
        .create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed("Vertices")),
            size: 1024,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })
        .unwrap();

    // Nothing submitted yet: the release runs immediately.
    let scratch = engine
        .backend()
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::COPY_DST,
        })
        .unwrap();
    engine.release_after_frame(DeferredRelease::Buffer(scratch));
    assert_eq!(engine.pending_releases(), 0);

    // --- 2. ACT ---
    let recorder = engine.begin_frame(ClearValues::default()).unwrap();
    recorder.set_vertex_buffer(0, buffer, 0);
    recorder.draw(0..3, 0..1);
    engine.end_frame().unwrap();
    engine.release_after_frame(DeferredRelease::Buffer(buffer));

    // --- 3. ASSERT ---
    assert_eq!(engine.pending_releases(), 1);
    engine.wait_idle().unwrap();
    assert_eq!(engine.pending_releases(), 0);
    assert_eq!(backend.stats().hazards, 0);
}

#[test]
fn test_shutdown_is_clean_after_many_frames() {
    // --- 1. ARRANGE ---
    let (backend, mut engine) = engine_with_latency(3, 5);
    let buffer = engine
        .backend()
        .create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed("Mesh")),
            size: 4096,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })
        .unwrap();

    // --- 2. ACT ---
    for _ in 0..20 {
        let recorder = engine.begin_frame(ClearValues::default()).unwrap();
        recorder.set_vertex_buffer(0, buffer, 0);
        recorder.draw(0..3, 0..1);
        engine.end_frame().unwrap();
    }
    engine.release_after_frame(DeferredRelease::Buffer(buffer));
    let report = engine.shutdown().unwrap();

    // --- 3. ASSERT ---
    assert!(report.is_clean(), "unclean shutdown: {report:?}");
    assert_eq!(report.frames_rendered, 20);
    assert_eq!(report.released_resources, 1);
    assert_eq!(backend.live_fences(), 0);
    assert_eq!(backend.live_resources(), (0, 0));
    let stats = backend.stats();
    assert_eq!(stats.presents, 20);
    assert_eq!(stats.hazards, 0);
    assert_eq!(stats.validation_errors, 0);
}

#[test]
fn test_shutdown_reports_leaked_descriptors() {
    // --- 1. ARRANGE ---
    let (_backend, mut engine) = engine_with_latency(2, 0);
    let _leaked = engine
        .allocate_descriptor(cadenza_core::renderer::DescriptorKind::Sampler)
        .unwrap();
    engine.begin_frame(ClearValues::default()).unwrap();
    engine.end_frame().unwrap();

    // --- 2. ACT ---
    let report = engine.shutdown().unwrap();

    // --- 3. ASSERT ---
    assert_eq!(report.leaked_descriptors, 1);
    assert_eq!(report.outstanding_fences, 0);
    assert!(!report.is_clean());
}
