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

//! The [`Engine`]: one explicit value owning every piece of renderer state.

use crate::math::Extent2D;
use crate::renderer::api::*;
use crate::renderer::constant_ring::ConstantAllocation;
use crate::renderer::descriptor::{DescriptorAllocator, OwnedDescriptor, ScopedDescriptor};
use crate::renderer::error::{ContractViolation, RenderError};
use crate::renderer::frame_pipeline::FramePipeline;
use crate::renderer::recorder::CommandRecorder;
use crate::renderer::release_queue::{execute_releases, DeferredRelease, ReleaseQueue};
use crate::renderer::traits::GpuBackend;
use crate::renderer::transfer::{ResourceRef, TransferEngine, TransferStats, UploadRequest, UploadTicket};
use std::sync::Arc;

/// The frame synchronization and resource lifecycle engine.
///
/// Owns the frame pipeline, the descriptor tables, the staging pool and the
/// deferred release queue for one backend. Engines are independent of each other:
/// nothing is global.
///
/// A typical frame:
///
/// ```ignore
/// let recorder = engine.begin_frame(ClearValues::default())?;
/// recorder.set_pipeline(pipeline);
/// recorder.draw(0..3, 0..1);
/// let report = engine.end_frame()?;
/// ```
#[derive(Debug)]
pub struct Engine {
    backend: Arc<dyn GpuBackend>,
    config: EngineConfig,
    descriptors: Arc<DescriptorAllocator>,
    transfer: TransferEngine,
    pipeline: FramePipeline,
    releases: ReleaseQueue,
    awaiting_uploads: Vec<DeferredRelease>,
    released_resources: usize,
    shut_down: bool,
}

impl Engine {
    /// Validates `config` and builds an engine on top of `backend`.
    pub fn initialize(backend: Arc<dyn GpuBackend>, config: EngineConfig) -> Result<Self, RenderError> {
        config.validate()?;
        log::info!("Engine: Initializing on {}", backend.adapter_info());

        let descriptors = Arc::new(DescriptorAllocator::new(&config.descriptor_capacities));
        let transfer = TransferEngine::new(
            backend.clone(),
            config.staging_pool_size,
            config.staging_buffer_size,
            config.fence_timeout(),
        );
        let pipeline = FramePipeline::new(backend.clone(), &config)?;
        let releases = ReleaseQueue::new(config.frames_in_flight);

        Ok(Self {
            backend,
            config,
            descriptors,
            transfer,
            pipeline,
            releases,
            awaiting_uploads: Vec::new(),
            released_resources: 0,
            shut_down: false,
        })
    }

    // --- Frames ---

    /// Starts a frame and returns its recorder.
    ///
    /// Blocks until the frame slot's previous submission has completed, then runs
    /// the releases parked on that slot.
    pub fn begin_frame(&mut self, clear: ClearValues) -> Result<&mut CommandRecorder, RenderError> {
        self.ensure_running()?;
        let slot = self.pipeline.begin_frame(&clear)?;

        let parked = self.releases.take(slot);
        if !parked.is_empty() {
            let released = execute_releases(parked, &*self.backend, &self.descriptors);
            log::debug!("Engine: Released {released} deferred resource(s) on slot {slot}");
            self.released_resources += released;
        }

        self.current_recorder()
    }

    /// The recorder of the frame in progress.
    pub fn current_recorder(&mut self) -> Result<&mut CommandRecorder, RenderError> {
        self.pipeline
            .current_recorder()
            .ok_or_else(|| ContractViolation::NoFrameInProgress.into())
    }

    /// Submits and presents the frame in progress.
    ///
    /// Also retires the asynchronous uploads that completed since the last frame.
    /// A recoverable surface error is returned after the frame has been submitted.
    pub fn end_frame(&mut self) -> Result<FrameReport, RenderError> {
        self.ensure_running()?;
        if self.pipeline.current_slot().is_none() {
            log::error!("Engine: end_frame: {}", ContractViolation::NoFrameInProgress);
            return Err(ContractViolation::NoFrameInProgress.into());
        }
        self.transfer.poll()?;
        self.retire_awaiting_uploads();
        self.pipeline.end_frame()
    }

    /// Copies `data` into the current frame's constant buffer.
    pub fn write_constants(&mut self, data: &[u8]) -> Result<ConstantAllocation, RenderError> {
        self.ensure_in_frame()?;
        self.pipeline.constants_mut().write(data)
    }

    /// Copies a plain-old-data value into the current frame's constant buffer.
    pub fn write_constants_pod<T: bytemuck::Pod>(&mut self, value: &T) -> Result<ConstantAllocation, RenderError> {
        self.write_constants(bytemuck::bytes_of(value))
    }

    // --- Descriptors ---

    /// Allocates a descriptor slot of `kind`.
    pub fn allocate_descriptor(&mut self, kind: DescriptorKind) -> Result<DescriptorHandle, RenderError> {
        self.ensure_running()?;
        Ok(self.descriptors.allocate(kind)?)
    }

    /// Frees a descriptor slot immediately and clears it on the backend.
    ///
    /// The caller must ensure no in-flight frame still uses the handle; see
    /// [`release_after_frame`](Engine::release_after_frame) otherwise.
    pub fn free_descriptor(&mut self, handle: DescriptorHandle) -> Result<(), RenderError> {
        self.descriptors.free(handle)?;
        self.backend.clear_descriptor(handle)?;
        Ok(())
    }

    /// Allocates a descriptor slot freed and cleared when the guard is dropped.
    pub fn scoped_descriptor(&mut self, kind: DescriptorKind) -> Result<ScopedDescriptor, RenderError> {
        self.ensure_running()?;
        Ok(self
            .descriptors
            .scoped(kind)?
            .clearing_on_drop(self.backend.clone()))
    }

    /// Allocates a long-lived descriptor slot owned by a resource object.
    pub fn allocate_owned_descriptor(&mut self, kind: DescriptorKind) -> Result<OwnedDescriptor, RenderError> {
        self.ensure_running()?;
        Ok(self.descriptors.allocate_owned(kind)?)
    }

    /// Clears and releases an owned descriptor immediately.
    pub fn release_descriptor(&mut self, descriptor: OwnedDescriptor) -> Result<(), RenderError> {
        let handle = descriptor.handle();
        descriptor.release(&self.descriptors)?;
        self.backend.clear_descriptor(handle)?;
        Ok(())
    }

    /// Publishes what a descriptor slot refers to.
    ///
    /// ## Errors
    /// * `ContractViolation::DescriptorKindMismatch` - If the binding belongs in another table.
    /// * `ContractViolation::ForeignHandle` / `StaleHandle` - If the handle is not a live handle of this engine.
    pub fn write_descriptor(
        &mut self,
        handle: DescriptorHandle,
        binding: &DescriptorBinding,
    ) -> Result<(), RenderError> {
        if binding.kind() != handle.kind() {
            let violation = ContractViolation::DescriptorKindMismatch {
                handle,
                binding: binding.kind(),
            };
            log::error!("Engine: {violation}");
            return Err(violation.into());
        }
        self.descriptors.validate(handle)?;
        if !self.descriptors.is_live(handle) {
            let violation = ContractViolation::StaleHandle(handle);
            log::error!("Engine: {violation}");
            return Err(violation.into());
        }
        self.backend.write_descriptor(handle, binding)?;
        Ok(())
    }

    /// The engine's descriptor allocator.
    pub fn descriptors(&self) -> &Arc<DescriptorAllocator> {
        &self.descriptors
    }

    // --- Uploads ---

    /// Copies `request` into its destination and blocks until the copy completed.
    pub fn upload_immediate(&mut self, request: &UploadRequest) -> Result<(), RenderError> {
        self.ensure_running()?;
        self.transfer.upload_immediate(request)
    }

    /// Submits `request` without waiting. Completion is observed in `end_frame`.
    pub fn upload_async(&mut self, request: &UploadRequest) -> Result<UploadTicket, RenderError> {
        self.ensure_running()?;
        self.transfer.upload_async(request)
    }

    /// Returns `true` while an asynchronous copy into `resource` has not been observed complete.
    pub fn is_upload_pending(&self, resource: ResourceRef) -> bool {
        self.transfer.is_pending(resource)
    }

    /// Returns `true` while the upload identified by `ticket` has not been observed complete.
    pub fn is_ticket_pending(&self, ticket: UploadTicket) -> bool {
        self.transfer.is_ticket_pending(ticket)
    }

    /// Blocks until every asynchronous upload has completed.
    pub fn flush_uploads(&mut self) -> Result<(), RenderError> {
        self.transfer.flush()?;
        self.retire_awaiting_uploads();
        Ok(())
    }

    /// Copies a texture region back to the CPU, tightly packed.
    pub fn readback_texture(&mut self, texture: TextureId, region: TextureRegion) -> Result<Vec<u8>, RenderError> {
        self.ensure_running()?;
        self.transfer.readback_texture(texture, region)
    }

    /// Copies a byte range of a buffer back to the CPU.
    pub fn readback_buffer(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, RenderError> {
        self.ensure_running()?;
        self.transfer.readback_buffer(buffer, offset, size)
    }

    /// Counters of the upload path.
    pub fn transfer_stats(&self) -> TransferStats {
        self.transfer.stats()
    }

    // --- Lifetime ---

    /// Destroys `release` once every frame that may reference it has completed.
    ///
    /// Inside a frame the release waits for that frame. Outside a frame it waits for
    /// the last submitted frame, or runs immediately if nothing was ever submitted.
    /// A texture or buffer still receiving an asynchronous upload is held back until
    /// the upload has retired, then scheduled the same way.
    pub fn release_after_frame(&mut self, release: DeferredRelease) {
        if let Some(resource) = release.resource() {
            if self.transfer.is_pending(resource) {
                log::debug!("Engine: Release of {resource:?} waits for its pending upload");
                self.awaiting_uploads.push(release);
                return;
            }
        }
        self.schedule_release(release);
    }

    fn schedule_release(&mut self, release: DeferredRelease) {
        let slot_count = self.pipeline.slot_count() as u64;
        let slot = match self.pipeline.current_slot() {
            Some(slot) => Some(slot),
            None => self
                .pipeline
                .frame_count()
                .checked_sub(1)
                .map(|last| (last % slot_count) as usize),
        };
        match slot {
            Some(slot) if !self.shut_down => self.releases.push(slot, release),
            _ => {
                self.released_resources +=
                    execute_releases(vec![release], &*self.backend, &self.descriptors);
            }
        }
    }

    /// Schedules the held-back releases whose uploads have retired.
    fn retire_awaiting_uploads(&mut self) {
        if self.awaiting_uploads.is_empty() {
            return;
        }
        let transfer = &self.transfer;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.awaiting_uploads)
            .into_iter()
            .partition(|r| !r.resource().is_some_and(|res| transfer.is_pending(res)));
        self.awaiting_uploads = waiting;
        for release in ready {
            self.schedule_release(release);
        }
    }

    /// The number of releases waiting for their frames or uploads.
    pub fn pending_releases(&self) -> usize {
        self.releases.len() + self.awaiting_uploads.len()
    }

    /// Drains every in-flight frame and upload, then runs every parked release.
    ///
    /// Required before destroying a resource that pending work may reference.
    pub fn wait_idle(&mut self) -> Result<(), RenderError> {
        if self.pipeline.current_slot().is_some() {
            log::error!("Engine: wait_idle: {}", ContractViolation::FrameAlreadyInProgress);
            return Err(ContractViolation::FrameAlreadyInProgress.into());
        }
        self.pipeline.wait_idle()?;
        self.transfer.flush()?;
        self.retire_awaiting_uploads();
        let parked = self.releases.take_all();
        if !parked.is_empty() {
            self.released_resources += execute_releases(parked, &*self.backend, &self.descriptors);
        }
        Ok(())
    }

    /// Rebuilds the surface-dependent resources at `width` x `height`.
    ///
    /// Descriptor allocations are left untouched.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.ensure_running()?;
        log::info!("Engine: Resizing surface to {width}x{height}");
        self.pipeline.resize(Extent2D::new(width, height))
    }

    /// Drains all work and destroys every engine-owned GPU object.
    ///
    /// The report lists what was left behind; a clean shutdown has no outstanding
    /// fences and no allocated descriptors.
    pub fn shutdown(mut self) -> Result<ShutdownReport, RenderError> {
        self.ensure_running()?;
        self.wait_idle()?;

        let outstanding_fences =
            self.pipeline.outstanding_fences()? + self.transfer.outstanding_fences()?;
        self.transfer.destroy()?;
        self.pipeline.destroy()?;
        self.shut_down = true;

        let report = ShutdownReport {
            frames_rendered: self.pipeline.frame_count(),
            leaked_descriptors: self.descriptors.total_used(),
            outstanding_fences,
            released_resources: self.released_resources,
        };
        if report.is_clean() {
            log::info!("Engine: Shut down cleanly after {} frames", report.frames_rendered);
        } else {
            log::warn!("Engine: Shut down with leftovers: {report:?}");
        }
        Ok(report)
    }

    // --- Accessors ---

    /// The number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.pipeline.slot_count()
    }

    /// The number of submitted frames whose work has not completed yet.
    pub fn frames_pending(&self) -> Result<usize, RenderError> {
        Ok(self.pipeline.frames_in_flight()?)
    }

    /// The number of frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.pipeline.frame_count()
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backend the engine drives.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// The frame pipeline.
    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    fn ensure_running(&self) -> Result<(), RenderError> {
        if self.shut_down {
            return Err(ContractViolation::EngineShutDown.into());
        }
        Ok(())
    }

    fn ensure_in_frame(&self) -> Result<(), RenderError> {
        self.ensure_running()?;
        if self.pipeline.current_slot().is_none() {
            log::error!("Engine: {}", ContractViolation::NoFrameInProgress);
            return Err(ContractViolation::NoFrameInProgress.into());
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        log::warn!("Engine: Dropped without shutdown, draining the device");
        if let Err(e) = self.pipeline.wait_idle() {
            log::error!("Engine: Failed to drain frames on drop: {e}");
        }
        if let Err(e) = self.transfer.destroy() {
            log::error!("Engine: Failed to destroy the staging pool on drop: {e}");
        }
        let mut parked = self.releases.take_all();
        parked.append(&mut self.awaiting_uploads);
        execute_releases(parked, &*self.backend, &self.descriptors);
        if let Err(e) = self.pipeline.destroy() {
            log::error!("Engine: Failed to destroy the frame pipeline on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock::MockBackend;
    use std::borrow::Cow;

    fn engine(backend: &Arc<MockBackend>) -> Engine {
        Engine::initialize(backend.clone(), EngineConfig::default()).unwrap()
    }

    fn frame(engine: &mut Engine) -> FrameReport {
        engine.begin_frame(ClearValues::default()).unwrap();
        engine.end_frame().unwrap()
    }

    fn texture(backend: &MockBackend) -> TextureId {
        backend
            .create_texture(&TextureDescriptor {
                label: Some(Cow::Borrowed("Test Texture")),
                size: Extent2D::new(4, 4),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
            })
            .unwrap()
    }

    #[test]
    fn test_initialize_rejects_invalid_config() {
        let backend = MockBackend::new();
        let config = EngineConfig {
            frames_in_flight: 5,
            ..EngineConfig::default()
        };
        let err = Engine::initialize(backend, config).unwrap_err();
        assert!(matches!(err, RenderError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_frames_are_independent_between_engines() {
        let first = MockBackend::with_auto_complete();
        let second = MockBackend::with_auto_complete();
        let mut a = engine(&first);
        let mut b = engine(&second);

        frame(&mut a);
        frame(&mut a);
        frame(&mut b);

        assert_eq!(a.frame_count(), 2);
        assert_eq!(b.frame_count(), 1);
        assert_ne!(a.descriptors().id(), b.descriptors().id());
    }

    #[test]
    fn test_constants_require_a_frame() {
        let backend = MockBackend::with_auto_complete();
        let mut engine = engine(&backend);

        assert_eq!(
            engine.write_constants(&[0; 16]).unwrap_err(),
            RenderError::Contract(ContractViolation::NoFrameInProgress)
        );

        engine.begin_frame(ClearValues::default()).unwrap();
        let a = engine.write_constants_pod(&[1.0f32; 4]).unwrap();
        let b = engine.write_constants_pod(&[2.0f32; 4]).unwrap();
        engine.current_recorder().unwrap().bind_constants(0, b);
        engine.end_frame().unwrap();

        assert_eq!(a.buffer, b.buffer);
        assert_eq!(b.offset, CONSTANT_ALIGNMENT);
    }

    #[test]
    fn test_write_descriptor_checks_kind_and_liveness() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        let tex = texture(&backend);
        let handle = engine.allocate_descriptor(DescriptorKind::ShaderResource).unwrap();

        let err = engine
            .write_descriptor(handle, &DescriptorBinding::ColorTarget(tex))
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Contract(ContractViolation::DescriptorKindMismatch { .. })
        ));

        engine
            .write_descriptor(handle, &DescriptorBinding::ShaderResource(tex))
            .unwrap();
        assert_eq!(
            backend.state().descriptors.get(&handle),
            Some(&DescriptorBinding::ShaderResource(tex))
        );

        engine.free_descriptor(handle).unwrap();
        assert!(backend.state().descriptors.is_empty());
        assert_eq!(
            engine
                .write_descriptor(handle, &DescriptorBinding::ShaderResource(tex))
                .unwrap_err(),
            RenderError::Contract(ContractViolation::StaleHandle(handle))
        );
    }

    #[test]
    fn test_double_free_is_rejected_without_corruption() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        let handle = engine.allocate_descriptor(DescriptorKind::Sampler).unwrap();

        engine.free_descriptor(handle).unwrap();
        let err = engine.free_descriptor(handle).unwrap_err();

        assert_eq!(err, RenderError::Contract(ContractViolation::DoubleFree(handle)));
        assert_eq!(engine.descriptors().used_count(DescriptorKind::Sampler), 0);
        let a = engine.allocate_descriptor(DescriptorKind::Sampler).unwrap();
        let b = engine.allocate_descriptor(DescriptorKind::Sampler).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_scoped_descriptor_clears_binding_on_drop() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        let tex = texture(&backend);

        {
            let scoped = engine.scoped_descriptor(DescriptorKind::ShaderResource).unwrap();
            engine
                .write_descriptor(*scoped, &DescriptorBinding::ShaderResource(tex))
                .unwrap();
            assert_eq!(backend.state().descriptors.len(), 1);
        }

        assert!(backend.state().descriptors.is_empty());
        assert_eq!(engine.descriptors().total_used(), 0);
    }

    #[test]
    fn test_release_after_frame_waits_for_the_slot() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        let tex = texture(&backend);

        engine.begin_frame(ClearValues::default()).unwrap();
        engine.release_after_frame(DeferredRelease::Texture(tex));
        engine.end_frame().unwrap();

        frame(&mut engine);
        assert!(backend.state().textures.contains_key(&tex));
        assert_eq!(engine.pending_releases(), 1);

        // Frame 2 reuses slot 0 and waits for frame 0 first.
        frame(&mut engine);
        assert!(!backend.state().textures.contains_key(&tex));
        assert_eq!(engine.pending_releases(), 0);
    }

    #[test]
    fn test_release_waits_for_pending_upload() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        let tex = texture(&backend);
        let pixels = [7u8; 64];
        engine
            .upload_async(&UploadRequest::full_texture(&pixels, 4, 4, 4, tex))
            .unwrap();

        engine.release_after_frame(DeferredRelease::Texture(tex));
        frame(&mut engine);
        assert!(backend.state().textures.contains_key(&tex));
        assert_eq!(engine.pending_releases(), 1);

        // The upload retires in this frame, which then holds the release.
        backend.complete_all();
        frame(&mut engine);
        assert!(!engine.is_upload_pending(ResourceRef::Texture(tex)));
        assert!(backend.state().textures.contains_key(&tex));

        engine.wait_idle().unwrap();
        assert!(!backend.state().textures.contains_key(&tex));
        assert_eq!(engine.pending_releases(), 0);
    }

    #[test]
    fn test_release_before_any_frame_is_immediate() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        let owned = engine
            .allocate_owned_descriptor(DescriptorKind::DepthTarget)
            .unwrap();

        engine.release_after_frame(DeferredRelease::Descriptor(owned));

        assert_eq!(engine.descriptors().total_used(), 0);
        assert_eq!(engine.pending_releases(), 0);
    }

    #[test]
    fn test_wait_idle_rejected_inside_a_frame() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        engine.begin_frame(ClearValues::default()).unwrap();

        assert_eq!(
            engine.wait_idle().unwrap_err(),
            RenderError::Contract(ContractViolation::FrameAlreadyInProgress)
        );
        engine.end_frame().unwrap();
        engine.wait_idle().unwrap();
        assert_eq!(engine.frames_pending().unwrap(), 0);
    }

    #[test]
    fn test_resize_keeps_descriptors() {
        let backend = MockBackend::with_auto_complete();
        let mut engine = engine(&backend);
        let handle = engine.allocate_descriptor(DescriptorKind::ShaderResource).unwrap();
        frame(&mut engine);

        engine.resize(320, 240).unwrap();

        assert!(engine.descriptors().is_live(handle));
        assert_eq!(backend.state().recreations, vec![Extent2D::new(320, 240)]);
        assert_eq!(engine.pipeline().extent(), Extent2D::new(320, 240));
    }

    #[test]
    fn test_shutdown_reports_leaks() {
        let backend = MockBackend::new();
        let mut engine = engine(&backend);
        for _ in 0..4 {
            frame(&mut engine);
        }
        let kept = engine.allocate_descriptor(DescriptorKind::ColorTarget).unwrap();
        let freed = engine.allocate_descriptor(DescriptorKind::ColorTarget).unwrap();
        engine.free_descriptor(freed).unwrap();

        let report = engine.shutdown().unwrap();

        assert_eq!(report.frames_rendered, 4);
        assert_eq!(report.outstanding_fences, 0);
        assert_eq!(report.leaked_descriptors, 1, "{kept} was never freed");
        assert!(!report.is_clean());
        assert!(backend.state().fences.is_empty());
    }

    #[test]
    fn test_drop_without_shutdown_drains() {
        let backend = MockBackend::new();
        {
            let mut engine = engine(&backend);
            frame(&mut engine);
            frame(&mut engine);
        }
        let state = backend.state();
        assert!(state.fences.is_empty());
        assert!(state.buffers.is_empty());
    }
}
