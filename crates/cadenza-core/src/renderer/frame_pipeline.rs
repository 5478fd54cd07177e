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

//! The N-buffered frame pipeline.
//!
//! The pipeline owns one [`CommandRecorder`] per frame slot. Frame `K` records into
//! slot `K % N`, so the CPU can run up to `N - 1` frames ahead of the GPU while
//! [`begin_frame`](FramePipeline::begin_frame) guarantees a slot is never re-recorded
//! before the GPU has finished the frame that last used it.
//!
//! It also owns everything that depends on the surface (the depth target) and the
//! per-frame [`ConstantRing`], which advances in lockstep with the slots.

use crate::math::Extent2D;
use crate::renderer::api::*;
use crate::renderer::constant_ring::ConstantRing;
use crate::renderer::error::{ContractViolation, DeviceError, RenderError, SurfaceError};
use crate::renderer::recorder::CommandRecorder;
use crate::renderer::traits::GpuBackend;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How many times a stale surface is rebuilt before the failure is reported.
pub const MAX_SURFACE_RECREATION_ATTEMPTS: u32 = 3;

/// The per-slot bookkeeping of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    /// The slot's index, `0..N`.
    pub index: usize,
    /// The fence value signaled by the slot's last submission, `0` if never submitted.
    pub fence_value: FenceValue,
    /// The presentable image acquired for the slot's current or last frame.
    pub image: Option<SurfaceImage>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    slot: usize,
    waited_fence_value: FenceValue,
    fence_wait: Duration,
}

/// Drives `begin_frame` / `end_frame` across `N` frame slots.
#[derive(Debug)]
pub struct FramePipeline {
    backend: Arc<dyn GpuBackend>,
    slots: Vec<FrameSlot>,
    recorders: Vec<CommandRecorder>,
    constants: ConstantRing,
    frame_count: u64,
    active: Option<ActiveFrame>,
    extent: Extent2D,
    depth_format: Option<TextureFormat>,
    depth_target: Option<TextureId>,
    surface_stale: bool,
    destroyed: bool,
}

impl FramePipeline {
    /// Creates the slot recorders, the constant ring and the depth target.
    pub fn new(backend: Arc<dyn GpuBackend>, config: &EngineConfig) -> Result<Self, RenderError> {
        let count = config.frames_in_flight;
        let timeout = config.fence_timeout();

        let recorders = (0..count)
            .map(|i| {
                CommandRecorder::new(
                    backend.clone(),
                    QueueKind::Graphics,
                    format!("Frame [{i}]"),
                    timeout,
                )
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;
        let slots = (0..count)
            .map(|index| FrameSlot {
                index,
                fence_value: 0,
                image: None,
            })
            .collect();
        let constants = ConstantRing::new(backend.clone(), count, config.constant_ring_size, "Constants")?;

        let mut pipeline = Self {
            extent: backend.surface_extent(),
            backend,
            slots,
            recorders,
            constants,
            frame_count: 0,
            active: None,
            depth_format: config.depth_format,
            depth_target: None,
            surface_stale: false,
            destroyed: false,
        };
        pipeline.recreate_depth_target()?;

        log::info!(
            "FramePipeline: Initialized {count} frames in flight at {}x{}",
            pipeline.extent.width,
            pipeline.extent.height
        );
        Ok(pipeline)
    }

    /// Starts frame `frame_count` and returns its slot index.
    ///
    /// In order: waits for the slot's previous submission, acquires a presentable
    /// image (rebuilding a stale surface up to [`MAX_SURFACE_RECREATION_ATTEMPTS`]
    /// times), opens the slot's recorder, clears the image and depth target, and
    /// sets a full-target viewport and scissor.
    pub fn begin_frame(&mut self, clear: &ClearValues) -> Result<usize, RenderError> {
        if self.active.is_some() {
            log::error!("FramePipeline: {}", ContractViolation::FrameAlreadyInProgress);
            return Err(ContractViolation::FrameAlreadyInProgress.into());
        }

        let slot = (self.frame_count % self.slots.len() as u64) as usize;
        debug_assert_eq!(self.constants.current_slot_index(), slot);

        let waited_fence_value = self.slots[slot].fence_value;
        let wait_start = Instant::now();
        self.recorders[slot].wait_for_completion()?;
        let fence_wait = wait_start.elapsed();
        debug_assert!(self.recorders[slot]
            .fence()
            .is_complete(self.slots[slot].fence_value)
            .unwrap_or(true));

        let image = self.acquire_image()?;

        let recorder = &mut self.recorders[slot];
        recorder.begin_recording()?;
        recorder.clear_color(image.texture, clear.color);
        if let Some(depth) = self.depth_target {
            recorder.clear_depth_stencil(depth, clear.depth, clear.stencil);
        }
        recorder.set_viewport(Viewport::full(self.extent));
        recorder.set_scissor(ScissorRect::full(self.extent));

        self.slots[slot].image = Some(image);
        self.active = Some(ActiveFrame {
            slot,
            waited_fence_value,
            fence_wait,
        });
        Ok(slot)
    }

    /// Closes, submits and presents the current frame, then advances to the next slot.
    ///
    /// A recoverable present failure is returned after the frame has been submitted
    /// and the pipeline advanced; the next `begin_frame` rebuilds the surface.
    pub fn end_frame(&mut self) -> Result<FrameReport, RenderError> {
        let Some(active) = self.active else {
            log::error!("FramePipeline: end_frame: {}", ContractViolation::NoFrameInProgress);
            return Err(ContractViolation::NoFrameInProgress.into());
        };
        let slot = active.slot;

        let recorder = &mut self.recorders[slot];
        recorder.end_recording()?;
        let draw_calls = recorder.draw_count();
        let commands_recorded = recorder.commands().len();
        let fence_value = recorder.submit()?;

        self.active = None;
        self.slots[slot].fence_value = fence_value;
        let image = self.slots[slot]
            .image
            .ok_or(ContractViolation::NoFrameInProgress)?;

        let present = self.backend.present(image);

        let frame_number = self.frame_count;
        self.frame_count += 1;
        self.constants.move_to_next_frame();

        let suboptimal = match present {
            Ok(PresentStatus::Optimal) => false,
            Ok(PresentStatus::Suboptimal) => {
                log::debug!("FramePipeline: Present was suboptimal, surface marked stale");
                self.surface_stale = true;
                true
            }
            Err(RenderError::Surface(e)) => {
                log::warn!("FramePipeline: Present failed ({e}), surface marked stale");
                self.surface_stale = true;
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        Ok(FrameReport {
            frame_number,
            slot,
            image_index: image.index,
            fence_value,
            waited_fence_value: active.waited_fence_value,
            fence_wait: active.fence_wait,
            draw_calls,
            commands_recorded,
            suboptimal,
        })
    }

    /// Blocks until every submitted frame has completed.
    pub fn wait_idle(&mut self) -> Result<(), RenderError> {
        for recorder in &mut self.recorders {
            recorder.wait_for_completion()?;
        }
        Ok(())
    }

    /// Rebuilds the surface-dependent resources at a new size.
    ///
    /// ## Errors
    /// * `SurfaceError::ZeroSized` - If either dimension is zero. Nothing is changed.
    /// * `ContractViolation::FrameAlreadyInProgress` - If called between `begin_frame` and `end_frame`.
    pub fn resize(&mut self, extent: Extent2D) -> Result<(), RenderError> {
        if self.active.is_some() {
            log::error!("FramePipeline: resize: {}", ContractViolation::FrameAlreadyInProgress);
            return Err(ContractViolation::FrameAlreadyInProgress.into());
        }
        self.rebuild_surface(extent)
    }

    /// The number of slots whose last submission has not completed.
    pub fn frames_in_flight(&self) -> Result<usize, DeviceError> {
        let mut in_flight = 0;
        for recorder in &self.recorders {
            if !recorder.is_submission_complete()? {
                in_flight += 1;
            }
        }
        Ok(in_flight)
    }

    /// The number of slot fences with an incomplete signal.
    pub fn outstanding_fences(&self) -> Result<usize, DeviceError> {
        let mut outstanding = 0;
        for recorder in &self.recorders {
            if recorder.fence().is_outstanding()? {
                outstanding += 1;
            }
        }
        Ok(outstanding)
    }

    /// Waits for all frames, then destroys the slot fences, constant buffers and depth target.
    pub fn destroy(&mut self) -> Result<(), RenderError> {
        if self.destroyed {
            return Ok(());
        }
        self.wait_idle()?;
        for recorder in &mut self.recorders {
            recorder.destroy()?;
        }
        self.constants.destroy();
        if let Some(depth) = self.depth_target.take() {
            self.backend.destroy_texture(depth)?;
        }
        self.destroyed = true;
        log::info!(
            "FramePipeline: Destroyed after {} frames",
            self.frame_count
        );
        Ok(())
    }

    // --- Accessors ---

    /// The recorder of the frame in progress.
    pub fn current_recorder(&mut self) -> Option<&mut CommandRecorder> {
        let slot = self.active?.slot;
        Some(&mut self.recorders[slot])
    }

    /// The slot of the frame in progress.
    pub fn current_slot(&self) -> Option<usize> {
        self.active.map(|a| a.slot)
    }

    /// The recorder of slot `index`.
    pub fn recorder(&self, index: usize) -> Option<&CommandRecorder> {
        self.recorders.get(index)
    }

    /// The per-slot bookkeeping.
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// The number of frame slots (`N`).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The number of frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The size of the presentable images.
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// The depth/stencil target, if the pipeline has one.
    pub fn depth_target(&self) -> Option<TextureId> {
        self.depth_target
    }

    /// Returns `true` once a present or acquire reported that the surface must be rebuilt.
    pub fn is_surface_stale(&self) -> bool {
        self.surface_stale
    }

    /// The per-frame constant ring.
    pub fn constants(&self) -> &ConstantRing {
        &self.constants
    }

    /// The per-frame constant ring, for writing.
    pub fn constants_mut(&mut self) -> &mut ConstantRing {
        &mut self.constants
    }

    // --- Surface ---

    fn acquire_image(&mut self) -> Result<SurfaceImage, RenderError> {
        let mut attempts = 0;
        loop {
            if self.surface_stale {
                if attempts == MAX_SURFACE_RECREATION_ATTEMPTS {
                    let err = SurfaceError::RecreationFailed { attempts };
                    log::error!("FramePipeline: {err}");
                    return Err(err.into());
                }
                attempts += 1;
                match self.rebuild_surface(self.backend.surface_extent()) {
                    Ok(()) => {}
                    Err(RenderError::Surface(e)) => {
                        log::warn!(
                            "FramePipeline: Surface recreation attempt {attempts}/{MAX_SURFACE_RECREATION_ATTEMPTS} failed: {e}"
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            match self.backend.acquire_surface_image() {
                Ok(image) => return Ok(image),
                Err(RenderError::Surface(e)) => {
                    log::warn!("FramePipeline: Failed to acquire a surface image: {e}");
                    self.surface_stale = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn rebuild_surface(&mut self, extent: Extent2D) -> Result<(), RenderError> {
        if extent.is_empty() {
            return Err(SurfaceError::ZeroSized {
                width: extent.width,
                height: extent.height,
            }
            .into());
        }

        self.wait_idle()?;
        self.backend.recreate_surface(extent)?;
        self.extent = self.backend.surface_extent();
        self.recreate_depth_target()?;
        self.surface_stale = false;

        log::info!(
            "FramePipeline: Surface rebuilt at {}x{}",
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    fn recreate_depth_target(&mut self) -> Result<(), DeviceError> {
        if let Some(old) = self.depth_target.take() {
            self.backend.destroy_texture(old)?;
        }
        if let Some(format) = self.depth_format {
            self.depth_target = Some(self.backend.create_texture(&TextureDescriptor {
                label: Some(Cow::Borrowed("Depth Target")),
                size: self.extent,
                format,
                usage: TextureUsage::DEPTH_STENCIL,
            })?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock::MockBackend;

    fn pipeline(backend: &Arc<MockBackend>, frames: usize) -> FramePipeline {
        let config = EngineConfig {
            frames_in_flight: frames,
            ..EngineConfig::default()
        };
        FramePipeline::new(backend.clone(), &config).unwrap()
    }

    fn run_frame(pipeline: &mut FramePipeline) -> Result<FrameReport, RenderError> {
        pipeline.begin_frame(&ClearValues::default())?;
        pipeline.end_frame()
    }

    #[test]
    fn test_begin_frame_waits_only_when_reusing_a_slot() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);

        run_frame(&mut pipeline).unwrap();
        run_frame(&mut pipeline).unwrap();
        assert!(backend.state().waits.is_empty(), "fresh slots need no wait");

        pipeline.begin_frame(&ClearValues::default()).unwrap();

        let slot0_fence = pipeline.recorder(0).unwrap().fence().id();
        assert_eq!(backend.state().waits, vec![(slot0_fence, 1)]);
    }

    #[test]
    fn test_begin_frame_records_clears_and_full_target_state() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);
        let clear = ClearValues {
            color: [0.1, 0.2, 0.3, 1.0],
            depth: 0.5,
            stencil: 7,
        };

        pipeline.begin_frame(&clear).unwrap();

        let image = pipeline.slots()[0].image.unwrap();
        let depth = pipeline.depth_target().unwrap();
        let extent = pipeline.extent();
        let recorder = pipeline.current_recorder().unwrap();
        assert_eq!(
            recorder.commands().commands(),
            &[
                RecordedCommand::ClearColor {
                    target: image.texture,
                    color: clear.color
                },
                RecordedCommand::ClearDepthStencil {
                    target: depth,
                    depth: 0.5,
                    stencil: 7
                },
                RecordedCommand::SetViewport(Viewport::full(extent)),
                RecordedCommand::SetScissor(ScissorRect::full(extent)),
            ]
        );
    }

    #[test]
    fn test_frame_reports_and_slot_rotation() {
        let backend = MockBackend::with_auto_complete();
        let mut pipeline = pipeline(&backend, 2);

        let reports: Vec<FrameReport> = (0..5).map(|_| run_frame(&mut pipeline).unwrap()).collect();

        let slots: Vec<usize> = reports.iter().map(|r| r.slot).collect();
        let images: Vec<u32> = reports.iter().map(|r| r.image_index).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(images, vec![0, 1, 2, 0, 1], "image index is independent of the slot");
        assert_eq!(reports[4].frame_number, 4);
        assert_eq!(pipeline.frame_count(), 5);
        assert_eq!(pipeline.constants().current_slot_index(), 1);
        assert_eq!(backend.state().presented.len(), 5);
    }

    #[test]
    fn test_frame_scoped_calls_are_checked() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);

        assert_eq!(
            pipeline.end_frame().unwrap_err(),
            RenderError::Contract(ContractViolation::NoFrameInProgress)
        );
        pipeline.begin_frame(&ClearValues::default()).unwrap();
        assert_eq!(
            pipeline.begin_frame(&ClearValues::default()).unwrap_err(),
            RenderError::Contract(ContractViolation::FrameAlreadyInProgress)
        );
        assert_eq!(
            pipeline.resize(Extent2D::new(8, 8)).unwrap_err(),
            RenderError::Contract(ContractViolation::FrameAlreadyInProgress)
        );
        pipeline.end_frame().unwrap();
        assert_eq!(pipeline.frame_count(), 1);
    }

    #[test]
    fn test_present_failure_is_reported_then_recovered() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);
        backend
            .state()
            .present_results
            .push_back(Err(SurfaceError::OutOfDate));

        let err = run_frame(&mut pipeline).unwrap_err();

        assert!(err.is_recoverable());
        assert!(pipeline.is_surface_stale());
        assert_eq!(pipeline.frame_count(), 1, "the frame was submitted");

        run_frame(&mut pipeline).unwrap();

        assert!(!pipeline.is_surface_stale());
        assert_eq!(backend.state().recreations.len(), 1);
    }

    #[test]
    fn test_suboptimal_present_marks_surface_stale() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);
        backend
            .state()
            .present_results
            .push_back(Ok(PresentStatus::Suboptimal));

        let report = run_frame(&mut pipeline).unwrap();

        assert!(report.suboptimal);
        assert!(pipeline.is_surface_stale());
    }

    #[test]
    fn test_acquire_failure_recovers_within_bound() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);
        backend.state().acquire_faults.push_back(SurfaceError::Lost);

        run_frame(&mut pipeline).unwrap();

        assert_eq!(backend.state().recreations.len(), 1);
    }

    #[test]
    fn test_persistent_acquire_failure_gives_up() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);
        backend
            .state()
            .acquire_faults
            .extend(std::iter::repeat_n(SurfaceError::OutOfDate, 4));

        let err = pipeline.begin_frame(&ClearValues::default()).unwrap_err();

        assert_eq!(
            err,
            RenderError::Surface(SurfaceError::RecreationFailed {
                attempts: MAX_SURFACE_RECREATION_ATTEMPTS
            })
        );
        assert_eq!(
            backend.state().recreations.len(),
            MAX_SURFACE_RECREATION_ATTEMPTS as usize
        );
        assert_eq!(pipeline.current_slot(), None);
    }

    #[test]
    fn test_resize_rebuilds_depth_target() {
        let backend = MockBackend::with_auto_complete();
        let mut pipeline = pipeline(&backend, 2);
        run_frame(&mut pipeline).unwrap();
        let old_depth = pipeline.depth_target().unwrap();

        pipeline.resize(Extent2D::new(128, 96)).unwrap();

        let new_depth = pipeline.depth_target().unwrap();
        assert_ne!(old_depth, new_depth);
        assert_eq!(pipeline.extent(), Extent2D::new(128, 96));
        let state = backend.state();
        assert!(!state.textures.contains_key(&old_depth));
        assert_eq!(state.textures[&new_depth].size, Extent2D::new(128, 96));
    }

    #[test]
    fn test_zero_sized_resize_is_rejected() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 2);

        let err = pipeline.resize(Extent2D::new(0, 600)).unwrap_err();

        assert_eq!(
            err,
            RenderError::Surface(SurfaceError::ZeroSized {
                width: 0,
                height: 600
            })
        );
        assert!(backend.state().recreations.is_empty());
    }

    #[test]
    fn test_destroy_drains_and_releases() {
        let backend = MockBackend::new();
        let mut pipeline = pipeline(&backend, 3);
        for _ in 0..3 {
            run_frame(&mut pipeline).unwrap();
        }
        assert_eq!(pipeline.frames_in_flight().unwrap(), 3);

        pipeline.destroy().unwrap();

        let state = backend.state();
        assert!(state.fences.is_empty());
        assert!(state.buffers.is_empty());
        assert!(state.textures.is_empty());
    }
}
