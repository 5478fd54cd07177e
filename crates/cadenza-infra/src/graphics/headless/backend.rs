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

//! The [`HeadlessBackend`]: a CPU-emulated explicit graphics device.

use super::config::HeadlessConfig;
use super::fence::FenceTimeline;
use super::memory::{HostBuffer, HostMemory, HostTexture, StatCounters};
use super::queue::{QueueItem, QueueWorker};
use super::surface::HeadlessSurface;
use cadenza_core::math::Extent2D;
use cadenza_core::renderer::{
    BufferDescriptor, BufferId, BufferUsage, CommandList, DescriptorBinding, DescriptorHandle,
    DeviceError, FenceId, FenceValue, GpuBackend, GraphicsAdapterInfo, GraphicsBackendType,
    PresentStatus, QueueKind, RenderError, RendererDeviceType, SurfaceError, SurfaceImage,
    TextureDescriptor, TextureFormat, TextureId, TextureUsage,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A snapshot of the headless device's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Command lists submitted to either queue.
    pub submissions: u64,
    /// Commands executed by the queue workers.
    pub commands_executed: u64,
    /// Draw calls executed (counted, not rasterized).
    pub draws: u64,
    /// Images presented.
    pub presents: u64,
    /// Swapchain rebuilds.
    pub surface_recreations: u64,
    /// CPU writes, reads or destructions of resources still referenced by pending work.
    pub hazards: u64,
    /// Commands rejected by the interpreter (bad pitch, out of bounds, unknown resource).
    pub validation_errors: u64,
}

/// State shared between the device front-end and its queue workers.
#[derive(Debug)]
pub(crate) struct HeadlessShared {
    pub config: HeadlessConfig,
    pub device_lost: AtomicBool,
    pub stats: StatCounters,
    memory: Mutex<HostMemory>,
}

impl HeadlessShared {
    pub fn memory(&self) -> MutexGuard<'_, HostMemory> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hazard(&self, what: std::fmt::Arguments<'_>) {
        log::error!("HeadlessBackend: Hazard: {what} while GPU work still references it");
        StatCounters::bump(&self.stats.hazards);
    }
}

/// A software device that executes copies and clears on host memory.
///
/// Each queue has its own worker thread; fences are raised by the workers once
/// the work submitted before the signal has executed. Draws are counted but not
/// rasterized.
///
/// ```ignore
/// let backend = HeadlessBackend::new(HeadlessConfig::default())?;
/// let engine = Engine::initialize(backend.clone(), EngineConfig::default())?;
/// ```
#[derive(Debug)]
pub struct HeadlessBackend {
    shared: Arc<HeadlessShared>,
    fences: Mutex<HashMap<FenceId, Arc<FenceTimeline>>>,
    surface: Mutex<HeadlessSurface>,
    graphics: QueueWorker,
    transfer: QueueWorker,
    next_id: AtomicUsize,
}

impl HeadlessBackend {
    /// Starts the queue workers and creates the presentable images.
    pub fn new(config: HeadlessConfig) -> Result<Arc<Self>, DeviceError> {
        if config.surface_extent.is_empty() || config.image_count == 0 {
            return Err(DeviceError::Backend(format!(
                "invalid headless surface: {:?} with {} images",
                config.surface_extent, config.image_count
            )));
        }

        let shared = Arc::new(HeadlessShared {
            config: config.clone(),
            device_lost: AtomicBool::new(false),
            stats: StatCounters::default(),
            memory: Mutex::new(HostMemory::default()),
        });
        let spawn = |kind| {
            QueueWorker::spawn(kind, shared.clone())
                .map_err(|e| DeviceError::Backend(format!("failed to spawn {kind:?} queue: {e}")))
        };
        let graphics = spawn(QueueKind::Graphics)?;
        let transfer = spawn(QueueKind::Transfer)?;

        let backend = Self {
            surface: Mutex::new(HeadlessSurface::new(
                config.surface_extent,
                config.surface_format,
                Vec::new(),
            )),
            shared,
            fences: Mutex::new(HashMap::new()),
            graphics,
            transfer,
            next_id: AtomicUsize::new(1),
        };
        let images = backend.create_surface_images(config.surface_extent);
        backend.surface().replace_images(config.surface_extent, images);

        log::info!(
            "HeadlessBackend: Created with a {}x{} {:?} surface of {} images, {:?} latency",
            config.surface_extent.width,
            config.surface_extent.height,
            config.surface_format,
            config.image_count,
            config.submission_latency
        );
        Ok(Arc::new(backend))
    }

    /// A backend with the default [`HeadlessConfig`].
    pub fn with_defaults() -> Result<Arc<Self>, DeviceError> {
        Self::new(HeadlessConfig::default())
    }

    // --- Fault injection ---

    /// Simulates a device loss: pending fences never complete and waiters fail.
    pub fn lose_device(&self, reason: &str) {
        log::warn!("HeadlessBackend: Device lost: {reason}");
        self.shared.device_lost.store(true, Ordering::Release);
        for timeline in self.fences().values() {
            timeline.wake_all();
        }
    }

    /// Makes the next `acquire_surface_image` fail with `fault`.
    pub fn fail_next_acquire(&self, fault: SurfaceError) {
        self.surface().push_acquire_fault(fault);
    }

    /// Makes the next `present` fail with `fault`.
    pub fn fail_next_present(&self, fault: SurfaceError) {
        self.surface().push_present_result(Err(fault));
    }

    /// Makes the next `present` succeed as suboptimal.
    pub fn report_suboptimal_next_present(&self) {
        self.surface()
            .push_present_result(Ok(PresentStatus::Suboptimal));
    }

    // --- Inspection ---

    /// A snapshot of the device counters.
    pub fn stats(&self) -> HeadlessStats {
        let stats = &self.shared.stats;
        let load = |counter: &std::sync::atomic::AtomicU64| counter.load(Ordering::Relaxed);
        HeadlessStats {
            submissions: load(&stats.submissions),
            commands_executed: load(&stats.commands_executed),
            draws: load(&stats.draws),
            presents: load(&stats.presents),
            surface_recreations: load(&stats.surface_recreations),
            hazards: load(&stats.hazards),
            validation_errors: load(&stats.validation_errors),
        }
    }

    /// Host contents of a texture, tightly packed. For debugging and tests.
    pub fn texture_contents(&self, id: TextureId) -> Option<Vec<u8>> {
        self.shared.memory().textures.get(&id).map(|t| t.data.clone())
    }

    /// What a descriptor slot currently refers to.
    pub fn descriptor_binding(&self, handle: DescriptorHandle) -> Option<DescriptorBinding> {
        self.shared.memory().descriptors.get(&handle).copied()
    }

    /// The number of live buffers and textures, excluding the presentable images.
    pub fn live_resources(&self) -> (usize, usize) {
        let image_count = self.surface().images.len();
        let memory = self.shared.memory();
        (memory.buffers.len(), memory.textures.len() - image_count)
    }

    /// The number of live fences.
    pub fn live_fences(&self) -> usize {
        self.fences().len()
    }

    // --- Internals ---

    fn surface(&self) -> MutexGuard<'_, HeadlessSurface> {
        self.surface.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fences(&self) -> MutexGuard<'_, HashMap<FenceId, Arc<FenceTimeline>>> {
        self.fences.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn timeline(&self, fence: FenceId) -> Result<Arc<FenceTimeline>, DeviceError> {
        self.fences()
            .get(&fence)
            .cloned()
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        if self.shared.device_lost.load(Ordering::Acquire) {
            return Err(DeviceError::DeviceLost("headless device was lost".to_string()));
        }
        Ok(())
    }

    fn queue(&self, kind: QueueKind) -> &QueueWorker {
        match kind {
            QueueKind::Graphics => &self.graphics,
            QueueKind::Transfer => &self.transfer,
        }
    }

    fn create_surface_images(&self, extent: Extent2D) -> Vec<TextureId> {
        let format = self.shared.config.surface_format;
        let mut memory = self.shared.memory();
        (0..self.shared.config.image_count)
            .map(|i| {
                let id = TextureId(self.next_id());
                memory.textures.insert(
                    id,
                    HostTexture {
                        descriptor: TextureDescriptor {
                            label: Some(Cow::Owned(format!("Surface Image [{i}]"))),
                            size: extent,
                            format,
                            usage: TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC,
                        },
                        data: vec![0; (extent.area() * format.bytes_per_pixel() as u64) as usize],
                        in_flight: 0,
                    },
                );
                id
            })
            .collect()
    }
}

impl GpuBackend for HeadlessBackend {
    fn adapter_info(&self) -> GraphicsAdapterInfo {
        GraphicsAdapterInfo {
            name: "Cadenza Headless".to_string(),
            backend_type: GraphicsBackendType::Headless,
            device_type: RendererDeviceType::Cpu,
        }
    }

    // --- Fences ---

    fn create_fence(&self, label: &str) -> Result<FenceId, DeviceError> {
        self.check_alive()?;
        let id = FenceId(self.next_id());
        self.fences().insert(id, Arc::new(FenceTimeline::default()));
        log::debug!("HeadlessBackend: Created fence '{label}' with ID: {id:?}");
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) -> Result<(), DeviceError> {
        let timeline = self
            .fences()
            .remove(&fence)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))?;
        if timeline.is_pending() && !self.shared.device_lost.load(Ordering::Acquire) {
            self.shared.hazard(format_args!("destroying {fence:?} with a pending signal"));
        }
        Ok(())
    }

    fn signal_fence(
        &self,
        queue: QueueKind,
        fence: FenceId,
        value: FenceValue,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let timeline = self.timeline(fence)?;
        timeline.enqueue_signal(value);
        self.queue(queue)
            .push(QueueItem::Signal { timeline, value })
            .map_err(DeviceError::SubmissionRejected)
    }

    fn completed_fence_value(&self, fence: FenceId) -> Result<FenceValue, DeviceError> {
        Ok(self.timeline(fence)?.completed())
    }

    fn wait_fence(
        &self,
        fence: FenceId,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> Result<(), DeviceError> {
        self.timeline(fence)?
            .wait(fence, value, timeout, &self.shared.device_lost)
    }

    // --- Submission ---

    fn submit(&self, queue: QueueKind, commands: &CommandList) -> Result<(), DeviceError> {
        self.check_alive()?;
        let retained = self.shared.memory().retain(commands);
        let item = QueueItem::Execute {
            list: commands.clone(),
            retained: retained.clone(),
        };
        if let Err(reason) = self.queue(queue).push(item) {
            self.shared.memory().release(&retained);
            return Err(DeviceError::SubmissionRejected(reason));
        }
        StatCounters::bump(&self.shared.stats.submissions);
        Ok(())
    }

    // --- Surface ---

    fn surface_extent(&self) -> Extent2D {
        self.surface().extent
    }

    fn surface_format(&self) -> TextureFormat {
        self.surface().format
    }

    fn acquire_surface_image(&self) -> Result<SurfaceImage, RenderError> {
        self.check_alive()?;
        Ok(self.surface().acquire()?)
    }

    fn present(&self, image: SurfaceImage) -> Result<PresentStatus, RenderError> {
        self.check_alive()?;
        let status = self.surface().present(image)?;
        StatCounters::bump(&self.shared.stats.presents);
        Ok(status)
    }

    fn recreate_surface(&self, extent: Extent2D) -> Result<(), RenderError> {
        self.check_alive()?;
        if extent.is_empty() {
            return Err(SurfaceError::ZeroSized {
                width: extent.width,
                height: extent.height,
            }
            .into());
        }

        let images = self.create_surface_images(extent);
        let old = self.surface().replace_images(extent, images);
        let mut memory = self.shared.memory();
        for id in old {
            if let Some(texture) = memory.textures.remove(&id) {
                if texture.in_flight > 0 {
                    self.shared
                        .hazard(format_args!("destroying surface image {id:?}"));
                }
            }
        }
        StatCounters::bump(&self.shared.stats.surface_recreations);
        log::info!(
            "HeadlessBackend: Surface recreated at {}x{}",
            extent.width,
            extent.height
        );
        Ok(())
    }

    // --- Resources ---

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, DeviceError> {
        self.check_alive()?;
        if descriptor.size == 0 {
            return Err(DeviceError::Backend(format!(
                "buffer '{}' has zero size",
                descriptor.label.as_deref().unwrap_or_default()
            )));
        }
        let id = BufferId(self.next_id());
        self.shared.memory().buffers.insert(
            id,
            HostBuffer {
                data: vec![0; descriptor.size as usize],
                usage: descriptor.usage,
                in_flight: 0,
            },
        );
        log::trace!(
            "HeadlessBackend: Created buffer '{}' with ID: {id:?}, size: {} bytes",
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), DeviceError> {
        let buffer = self
            .shared
            .memory()
            .buffers
            .remove(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        if buffer.in_flight > 0 {
            self.shared.hazard(format_args!("destroying {id:?}"));
        }
        Ok(())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let mut memory = self.shared.memory();
        let buffer = memory
            .buffers
            .get_mut(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        if !buffer.usage.contains(BufferUsage::MAP_WRITE) {
            return Err(DeviceError::Backend(format!("{id:?} is not MAP_WRITE")));
        }
        let end = offset as usize + data.len();
        if end > buffer.data.len() {
            return Err(DeviceError::Backend(format!(
                "write of {} bytes at {offset} overruns {id:?}",
                data.len()
            )));
        }
        if buffer.in_flight > 0 {
            self.shared.hazard(format_args!("writing {id:?}"));
        }
        buffer.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, DeviceError> {
        let memory = self.shared.memory();
        let buffer = memory
            .buffers
            .get(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        if !buffer.usage.contains(BufferUsage::MAP_READ) {
            return Err(DeviceError::Backend(format!("{id:?} is not MAP_READ")));
        }
        let end = (offset + size) as usize;
        if end > buffer.data.len() {
            return Err(DeviceError::Backend(format!(
                "read of {size} bytes at {offset} overruns {id:?}"
            )));
        }
        if buffer.in_flight > 0 {
            self.shared.hazard(format_args!("reading {id:?}"));
        }
        Ok(buffer.data[offset as usize..end].to_vec())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, DeviceError> {
        self.check_alive()?;
        if descriptor.size.is_empty() {
            return Err(DeviceError::Backend(format!(
                "texture '{}' has zero size",
                descriptor.label.as_deref().unwrap_or_default()
            )));
        }
        let id = TextureId(self.next_id());
        let bytes = descriptor.size.area() * descriptor.format.bytes_per_pixel() as u64;
        self.shared.memory().textures.insert(
            id,
            HostTexture {
                descriptor: descriptor.clone().into_owned(),
                data: vec![0; bytes as usize],
                in_flight: 0,
            },
        );
        log::trace!(
            "HeadlessBackend: Created texture '{}' with ID: {id:?}, {bytes} bytes",
            descriptor.label.as_deref().unwrap_or_default()
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), DeviceError> {
        let texture = self
            .shared
            .memory()
            .textures
            .remove(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        if texture.in_flight > 0 {
            self.shared.hazard(format_args!("destroying {id:?}"));
        }
        Ok(())
    }

    fn texture_descriptor(&self, id: TextureId) -> Result<TextureDescriptor<'static>, DeviceError> {
        self.shared
            .memory()
            .textures
            .get(&id)
            .map(|t| t.descriptor.clone())
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))
    }

    fn copy_pitch_alignment(&self) -> u32 {
        self.shared.config.copy_pitch_alignment
    }

    // --- Descriptors ---

    fn write_descriptor(
        &self,
        handle: DescriptorHandle,
        binding: &DescriptorBinding,
    ) -> Result<(), DeviceError> {
        let mut memory = self.shared.memory();
        if let Some(texture) = binding.texture() {
            if !memory.textures.contains_key(&texture) {
                return Err(DeviceError::ResourceNotFound(format!("{texture:?}")));
            }
        }
        memory.descriptors.insert(handle, *binding);
        Ok(())
    }

    fn clear_descriptor(&self, handle: DescriptorHandle) -> Result<(), DeviceError> {
        self.shared.memory().descriptors.remove(&handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::renderer::RecordedCommand;

    fn backend() -> Arc<HeadlessBackend> {
        HeadlessBackend::new(HeadlessConfig::default().with_extent(4, 4)).unwrap()
    }

    #[test]
    fn test_signal_completes_after_prior_work() {
        let backend = HeadlessBackend::new(
            HeadlessConfig::default().with_latency(Duration::from_millis(20)),
        )
        .unwrap();
        let fence = backend.create_fence("Test").unwrap();
        let mut list = CommandList::new("Work");
        list.push(RecordedCommand::Draw {
            vertices: 0..3,
            instances: 0..1,
        });

        backend.submit(QueueKind::Graphics, &list).unwrap();
        backend.signal_fence(QueueKind::Graphics, fence, 1).unwrap();
        assert_eq!(backend.completed_fence_value(fence).unwrap(), 0);

        backend.wait_fence(fence, 1, None).unwrap();
        assert_eq!(backend.stats().draws, 1);
        backend.destroy_fence(fence).unwrap();
        assert_eq!(backend.stats().hazards, 0);
    }

    #[test]
    fn test_write_to_in_flight_buffer_is_a_hazard() {
        let backend = HeadlessBackend::new(
            HeadlessConfig::default().with_latency(Duration::from_millis(50)),
        )
        .unwrap();
        let src = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC,
            })
            .unwrap();
        let dst = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::COPY_DST,
            })
            .unwrap();
        let mut list = CommandList::new("Copy");
        list.push(RecordedCommand::CopyBufferToBuffer {
            src,
            src_offset: 0,
            dst,
            dst_offset: 0,
            size: 16,
        });

        backend.submit(QueueKind::Transfer, &list).unwrap();
        backend.write_buffer(src, 0, &[1; 16]).unwrap();

        assert_eq!(backend.stats().hazards, 1);
    }

    #[test]
    fn test_destroying_a_texture_sampled_in_flight_is_a_hazard() {
        let backend = HeadlessBackend::new(
            HeadlessConfig::default().with_latency(Duration::from_millis(50)),
        )
        .unwrap();
        let texture = backend
            .create_texture(&TextureDescriptor {
                label: None,
                size: Extent2D::new(4, 4),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::SAMPLED,
            })
            .unwrap();
        let handle = cadenza_core::renderer::DescriptorAllocator::new(
            &cadenza_core::renderer::DescriptorCapacities::uniform(1),
        )
        .allocate(cadenza_core::renderer::DescriptorKind::ShaderResource)
        .unwrap();
        backend
            .write_descriptor(handle, &DescriptorBinding::ShaderResource(texture))
            .unwrap();
        let mut list = CommandList::new("Sample");
        list.push(RecordedCommand::BindResource {
            slot: 0,
            descriptor: handle,
        });

        backend.submit(QueueKind::Graphics, &list).unwrap();
        backend.destroy_texture(texture).unwrap();

        assert_eq!(backend.stats().hazards, 1);
    }

    #[test]
    fn test_device_loss_fails_waits_and_submissions() {
        let backend = HeadlessBackend::new(
            HeadlessConfig::default().with_latency(Duration::from_millis(20)),
        )
        .unwrap();
        let fence = backend.create_fence("Test").unwrap();
        backend
            .submit(QueueKind::Graphics, &CommandList::new("Work"))
            .unwrap();
        backend.signal_fence(QueueKind::Graphics, fence, 1).unwrap();

        backend.lose_device("test");

        assert!(matches!(
            backend.wait_fence(fence, 1, None),
            Err(DeviceError::DeviceLost(_))
        ));
        assert!(matches!(
            backend.submit(QueueKind::Graphics, &CommandList::new("Late")),
            Err(DeviceError::DeviceLost(_))
        ));
        assert!(backend.acquire_surface_image().unwrap_err().is_device_lost());
    }

    #[test]
    fn test_recreate_surface_replaces_images() {
        let backend = backend();
        let before = backend.acquire_surface_image().unwrap();

        backend.recreate_surface(Extent2D::new(8, 2)).unwrap();

        assert_eq!(backend.surface_extent(), Extent2D::new(8, 2));
        let after = backend.acquire_surface_image().unwrap();
        assert_ne!(before.texture, after.texture);
        assert!(backend.texture_contents(before.texture).is_none());
        assert_eq!(backend.texture_contents(after.texture).unwrap().len(), 8 * 2 * 4);
        assert_eq!(
            backend.present(before).unwrap_err(),
            RenderError::Surface(SurfaceError::OutOfDate)
        );
        assert_eq!(backend.stats().surface_recreations, 1);
    }

    #[test]
    fn test_write_descriptor_requires_live_texture() {
        let backend = backend();
        let handle = cadenza_core::renderer::DescriptorAllocator::new(
            &cadenza_core::renderer::DescriptorCapacities::uniform(1),
        )
        .allocate(cadenza_core::renderer::DescriptorKind::ShaderResource)
        .unwrap();

        let err = backend
            .write_descriptor(handle, &DescriptorBinding::ShaderResource(TextureId(999)))
            .unwrap_err();

        assert!(matches!(err, DeviceError::ResourceNotFound(_)));
    }
}
