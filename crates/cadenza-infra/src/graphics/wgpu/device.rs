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
    BufferDescriptor, BufferId, BufferUsage, CommandList, DescriptorBinding, DescriptorHandle,
    DeviceError, FenceId, FenceValue, GpuBackend, GraphicsAdapterInfo, PipelineId, PresentStatus,
    QueueKind, RenderError, SurfaceError, SurfaceImage, TextureDescriptor, TextureFormat,
    TextureId, TextureUsage,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::command::WgpuCommandTranslator;
use super::context::WgpuContext;
use super::conversions::{
    from_wgpu_backend, from_wgpu_device_type, from_wgpu_surface_error, from_wgpu_texture_format,
    IntoWgpu,
};

/// Interval between non-blocking polls while waiting on a fence with a timeout.
const FENCE_POLL_INTERVAL: Duration = Duration::from_micros(250);

#[derive(Debug)]
pub(crate) struct WgpuBufferEntry {
    pub(crate) buffer: wgpu::Buffer,
    /// The size that was requested, before rounding to `COPY_BUFFER_ALIGNMENT`.
    pub(crate) size: u64,
    pub(crate) usage: BufferUsage,
    /// Host copy of `MAP_WRITE` buffers so unaligned writes can be widened.
    pub(crate) shadow: Option<Vec<u8>>,
}

#[derive(Debug)]
pub(crate) struct WgpuTextureEntry {
    pub(crate) texture: wgpu::Texture,
    pub(crate) descriptor: TextureDescriptor<'static>,
}

impl WgpuTextureEntry {
    pub(crate) fn default_view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor::default())
    }
}

#[derive(Debug)]
pub(crate) enum WgpuDescriptorEntry {
    View(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

/// Every object a command list may reference, under one lock.
#[derive(Debug, Default)]
pub(crate) struct WgpuResources {
    pub(crate) buffers: HashMap<BufferId, WgpuBufferEntry>,
    pub(crate) textures: HashMap<TextureId, WgpuTextureEntry>,
    pub(crate) pipelines: HashMap<PipelineId, Arc<wgpu::RenderPipeline>>,
    pub(crate) descriptors: HashMap<DescriptorHandle, WgpuDescriptorEntry>,
}

/// A timeline fence emulated with `on_submitted_work_done` callbacks.
#[derive(Debug)]
struct WgpuFence {
    completed: Arc<AtomicU64>,
    signaled: FenceValue,
}

#[derive(Debug)]
struct AcquiredImage {
    image: SurfaceImage,
    surface_texture: wgpu::SurfaceTexture,
}

/// A [`GpuBackend`] driving a real GPU through WGPU.
///
/// WGPU exposes a single queue, so graphics and transfer work share it. Fences
/// are emulated: a signal registers a work-done callback that raises the fence's
/// completed value, and waits poll the device.
///
/// Pipelines are compiled by the application and handed over with
/// [`register_render_pipeline`](WgpuDevice::register_render_pipeline).
#[derive(Debug)]
pub struct WgpuDevice {
    context: Mutex<WgpuContext>,
    resources: Mutex<WgpuResources>,
    fences: Mutex<HashMap<FenceId, WgpuFence>>,
    acquired: Mutex<Option<AcquiredImage>>,
    device_lost: Arc<AtomicBool>,
    next_id: AtomicUsize,
    next_image_index: AtomicU32,
}

impl WgpuDevice {
    pub fn new(context: WgpuContext) -> Arc<Self> {
        let device_lost = Arc::new(AtomicBool::new(false));
        let lost_flag = device_lost.clone();
        context.device.set_device_lost_callback(move |reason, message| {
            log::error!("WgpuDevice: Device lost ({reason:?}): {message}");
            lost_flag.store(true, Ordering::Release);
        });

        log::info!(
            "WgpuDevice: Created on \"{}\" ({:?})",
            context.adapter_name,
            context.adapter_backend
        );
        Arc::new(Self {
            context: Mutex::new(context),
            resources: Mutex::new(WgpuResources::default()),
            fences: Mutex::new(HashMap::new()),
            acquired: Mutex::new(None),
            device_lost,
            next_id: AtomicUsize::new(1),
            next_image_index: AtomicU32::new(0),
        })
    }

    // --- Helpers ---

    fn context(&self) -> MutexGuard<'_, WgpuContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resources(&self) -> MutexGuard<'_, WgpuResources> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fences(&self) -> MutexGuard<'_, HashMap<FenceId, WgpuFence>> {
        self.fences.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        if self.device_lost.load(Ordering::Acquire) {
            return Err(DeviceError::DeviceLost("the WGPU device was lost".to_string()));
        }
        Ok(())
    }

    fn poll(&self, poll_type: wgpu::PollType) -> Result<(), DeviceError> {
        self.context()
            .device
            .poll(poll_type)
            .map(|_| ())
            .map_err(|e| DeviceError::Backend(format!("device poll failed: {e:?}")))
    }

    /// Executes an operation with the `wgpu::Device` locked, e.g. to build pipelines.
    pub fn with_wgpu_device<R>(&self, operation: impl FnOnce(&wgpu::Device) -> R) -> R {
        operation(&self.context().device)
    }

    /// The WGPU format of the surface images, for building compatible pipelines.
    pub fn wgpu_surface_format(&self) -> wgpu::TextureFormat {
        self.context().surface_config.format
    }

    /// Hands a compiled pipeline over to the device and returns its handle.
    pub fn register_render_pipeline(&self, pipeline: wgpu::RenderPipeline) -> PipelineId {
        let id = PipelineId(self.next_id());
        self.resources().pipelines.insert(id, Arc::new(pipeline));
        log::debug!("WgpuDevice: Registered render pipeline with ID: {id:?}");
        id
    }

    /// Forgets a pipeline. Frames still in flight keep their own reference.
    pub fn unregister_render_pipeline(&self, id: PipelineId) -> Result<(), DeviceError> {
        self.resources()
            .pipelines
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))
    }
}

/// Widens `[offset, offset + len)` to `COPY_BUFFER_ALIGNMENT`, clamped to `limit`.
fn aligned_range(offset: u64, len: u64, limit: u64) -> (u64, u64) {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    let start = offset - offset % align;
    let end = (offset + len).div_ceil(align) * align;
    (start, end.min(limit))
}

impl GpuBackend for WgpuDevice {
    fn adapter_info(&self) -> GraphicsAdapterInfo {
        let context = self.context();
        GraphicsAdapterInfo {
            name: context.adapter_name.clone(),
            backend_type: from_wgpu_backend(context.adapter_backend),
            device_type: from_wgpu_device_type(context.adapter_device_type),
        }
    }

    // --- Fences ---

    fn create_fence(&self, label: &str) -> Result<FenceId, DeviceError> {
        self.check_alive()?;
        let id = FenceId(self.next_id());
        self.fences().insert(
            id,
            WgpuFence {
                completed: Arc::new(AtomicU64::new(0)),
                signaled: 0,
            },
        );
        log::debug!("WgpuDevice: Created fence '{label}' with ID: {id:?}");
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) -> Result<(), DeviceError> {
        self.fences()
            .remove(&fence)
            .map(|_| ())
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))
    }

    fn signal_fence(
        &self,
        _queue: QueueKind,
        fence: FenceId,
        value: FenceValue,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let completed = {
            let mut fences = self.fences();
            let entry = fences
                .get_mut(&fence)
                .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))?;
            entry.signaled = entry.signaled.max(value);
            entry.completed.clone()
        };
        self.context().queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        Ok(())
    }

    fn completed_fence_value(&self, fence: FenceId) -> Result<FenceValue, DeviceError> {
        let completed = self
            .fences()
            .get(&fence)
            .map(|f| f.completed.clone())
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))?;
        if !self.device_lost.load(Ordering::Acquire) {
            self.poll(wgpu::PollType::Poll)?;
        }
        Ok(completed.load(Ordering::Acquire))
    }

    fn wait_fence(
        &self,
        fence: FenceId,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> Result<(), DeviceError> {
        let (completed, signaled) = self
            .fences()
            .get(&fence)
            .map(|f| (f.completed.clone(), f.signaled))
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))?;
        if completed.load(Ordering::Acquire) >= value {
            return Ok(());
        }
        if signaled < value {
            return Err(DeviceError::Backend(format!(
                "{fence:?} will never reach {value}: last signaled value is {signaled}"
            )));
        }

        let start = Instant::now();
        loop {
            self.check_alive()?;
            match timeout {
                None => self.poll(wgpu::PollType::Wait)?,
                Some(limit) => {
                    if start.elapsed() >= limit {
                        return Err(DeviceError::FenceTimeout {
                            fence,
                            value,
                            completed: completed.load(Ordering::Acquire),
                            timeout_ms: limit.as_millis() as u64,
                        });
                    }
                    self.poll(wgpu::PollType::Poll)?;
                }
            }
            if completed.load(Ordering::Acquire) >= value {
                return Ok(());
            }
            if timeout.is_some() {
                std::thread::sleep(FENCE_POLL_INTERVAL);
            }
        }
    }

    // --- Submission ---

    fn submit(&self, _queue: QueueKind, commands: &CommandList) -> Result<(), DeviceError> {
        self.check_alive()?;
        let resources = self.resources();
        let context = self.context();
        let command_buffer = WgpuCommandTranslator::new(&context.device, &resources)
            .encode(commands)
            .map_err(|e| DeviceError::SubmissionRejected(format!("'{}': {e}", commands.label())))?;
        context.queue.submit(std::iter::once(command_buffer));
        log::trace!(
            "WgpuDevice: Submitted '{}' ({} commands)",
            commands.label(),
            commands.len()
        );
        Ok(())
    }

    // --- Surface ---

    fn surface_extent(&self) -> Extent2D {
        self.context().size()
    }

    fn surface_format(&self) -> TextureFormat {
        let format = self.context().surface_config.format;
        // The context only configures formats the engine understands.
        from_wgpu_texture_format(format).unwrap_or(TextureFormat::Bgra8UnormSrgb)
    }

    fn acquire_surface_image(&self) -> Result<SurfaceImage, RenderError> {
        self.check_alive()?;
        let mut acquired = self.acquired.lock().unwrap_or_else(|e| e.into_inner());
        if acquired.is_some() {
            return Err(DeviceError::Backend(
                "a surface image is already acquired".to_string(),
            )
            .into());
        }

        let surface_texture = self
            .context()
            .get_current_texture()
            .map_err(from_wgpu_surface_error)?;
        let texture = surface_texture.texture.clone();
        let id = TextureId(self.next_id());
        let descriptor = TextureDescriptor {
            label: Some(Cow::Borrowed("Surface Image")),
            size: Extent2D::new(texture.width(), texture.height()),
            format: self.surface_format(),
            usage: TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC,
        };
        self.resources()
            .textures
            .insert(id, WgpuTextureEntry { texture, descriptor });

        let image = SurfaceImage {
            index: self.next_image_index.fetch_add(1, Ordering::Relaxed),
            texture: id,
        };
        *acquired = Some(AcquiredImage {
            image,
            surface_texture,
        });
        Ok(image)
    }

    fn present(&self, image: SurfaceImage) -> Result<PresentStatus, RenderError> {
        self.check_alive()?;
        let acquired = self
            .acquired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take_if(|a| a.image == image)
            .ok_or(SurfaceError::OutOfDate)?;
        self.resources().textures.remove(&image.texture);

        let suboptimal = acquired.surface_texture.suboptimal;
        acquired.surface_texture.present();
        Ok(if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        })
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
        if let Some(stale) = self.acquired.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.resources().textures.remove(&stale.image.texture);
        }
        self.context().resize(extent.width, extent.height);
        Ok(())
    }

    // --- Resources ---

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, DeviceError> {
        self.check_alive()?;
        let padded = descriptor.size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
        let buffer = self.context().device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: padded,
            usage: descriptor.usage.into_wgpu(),
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id());
        let shadow = descriptor
            .usage
            .contains(BufferUsage::MAP_WRITE)
            .then(|| vec![0; padded as usize]);

        self.resources().buffers.insert(
            id,
            WgpuBufferEntry {
                buffer,
                size: descriptor.size,
                usage: descriptor.usage,
                shadow,
            },
        );
        log::debug!(
            "WgpuDevice: Created buffer '{}' with ID: {id:?}, size: {} bytes",
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), DeviceError> {
        let entry = self
            .resources()
            .buffers
            .remove(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        entry.buffer.destroy();
        log::debug!("WgpuDevice: Destroyed buffer with ID: {id:?}");
        Ok(())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let mut resources = self.resources();
        let entry = resources
            .buffers
            .get_mut(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        if offset + data.len() as u64 > entry.size {
            return Err(DeviceError::Backend(format!(
                "write of {} bytes at {offset} overruns {id:?}",
                data.len()
            )));
        }
        let Some(shadow) = entry.shadow.as_mut() else {
            return Err(DeviceError::Backend(format!("{id:?} is not MAP_WRITE")));
        };

        shadow[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        let (start, end) = aligned_range(offset, data.len() as u64, shadow.len() as u64);
        self.context()
            .queue
            .write_buffer(&entry.buffer, start, &shadow[start as usize..end as usize]);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, DeviceError> {
        let resources = self.resources();
        let entry = resources
            .buffers
            .get(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        if !entry.usage.contains(BufferUsage::MAP_READ) {
            return Err(DeviceError::Backend(format!("{id:?} is not MAP_READ")));
        }
        if offset + size > entry.size {
            return Err(DeviceError::Backend(format!(
                "read of {size} bytes at {offset} overruns {id:?}"
            )));
        }

        let (sender, receiver) = flume::bounded(1);
        let slice = entry.buffer.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.poll(wgpu::PollType::Wait)?;
        receiver
            .recv()
            .map_err(|_| DeviceError::Backend(format!("mapping {id:?} was abandoned")))?
            .map_err(|e| DeviceError::Backend(format!("mapping {id:?} failed: {e}")))?;

        let data = {
            let mapped = slice.get_mapped_range();
            mapped[offset as usize..(offset + size) as usize].to_vec()
        };
        entry.buffer.unmap();
        Ok(data)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, DeviceError> {
        self.check_alive()?;
        let texture = self.context().device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: descriptor.size.into_wgpu(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.into_wgpu(),
            usage: descriptor.usage.into_wgpu(),
            view_formats: &[],
        });
        let id = TextureId(self.next_id());
        self.resources().textures.insert(
            id,
            WgpuTextureEntry {
                texture,
                descriptor: descriptor.clone().into_owned(),
            },
        );
        log::debug!(
            "WgpuDevice: Created texture '{}' with ID: {id:?}, {}x{} {:?}",
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), DeviceError> {
        let entry = self
            .resources()
            .textures
            .remove(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        entry.texture.destroy();
        log::debug!("WgpuDevice: Destroyed texture with ID: {id:?}");
        Ok(())
    }

    fn texture_descriptor(&self, id: TextureId) -> Result<TextureDescriptor<'static>, DeviceError> {
        self.resources()
            .textures
            .get(&id)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))
    }

    fn copy_pitch_alignment(&self) -> u32 {
        wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
    }

    // --- Descriptors ---

    fn write_descriptor(
        &self,
        handle: DescriptorHandle,
        binding: &DescriptorBinding,
    ) -> Result<(), DeviceError> {
        let mut resources = self.resources();
        let entry = match binding {
            DescriptorBinding::Sampler(sampler) => WgpuDescriptorEntry::Sampler(
                self.context().device.create_sampler(&sampler.into_wgpu()),
            ),
            DescriptorBinding::ShaderResource(id)
            | DescriptorBinding::DepthTarget(id)
            | DescriptorBinding::ColorTarget(id) => {
                let texture = resources
                    .textures
                    .get(id)
                    .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
                // Sampling a depth/stencil texture reads the depth aspect only.
                let aspect = match binding {
                    DescriptorBinding::ShaderResource(_) if texture.descriptor.format.is_depth() => {
                        wgpu::TextureAspect::DepthOnly
                    }
                    _ => wgpu::TextureAspect::All,
                };
                WgpuDescriptorEntry::View(texture.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Descriptor Table View"),
                    aspect,
                    ..Default::default()
                }))
            }
        };
        resources.descriptors.insert(handle, entry);
        Ok(())
    }

    fn clear_descriptor(&self, handle: DescriptorHandle) -> Result<(), DeviceError> {
        self.resources().descriptors.remove(&handle);
        Ok(())
    }
}

impl Drop for WgpuDevice {
    fn drop(&mut self) {
        // Let pending work-done and map callbacks run before resources go away.
        if let Err(e) = self.poll(wgpu::PollType::Wait) {
            log::warn!("WgpuDevice: Failed to poll device during shutdown: {e}");
        }
    }
}
