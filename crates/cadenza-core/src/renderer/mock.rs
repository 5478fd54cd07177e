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

//! A scriptable in-memory backend for unit tests.
//!
//! Fences stay pending after a signal until something waits on them (or
//! [`MockBackend::complete_all`] is called), which lets tests observe exactly
//! which waits the engine performs.

use crate::math::Extent2D;
use crate::renderer::api::*;
use crate::renderer::error::{DeviceError, RenderError, SurfaceError};
use crate::renderer::traits::GpuBackend;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MockFence {
    pub signaled: FenceValue,
    pub completed: FenceValue,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub fences: HashMap<FenceId, MockFence>,
    pub submissions: Vec<(QueueKind, CommandList)>,
    pub waits: Vec<(FenceId, FenceValue)>,
    pub buffers: HashMap<BufferId, Vec<u8>>,
    pub textures: HashMap<TextureId, TextureDescriptor<'static>>,
    pub descriptors: HashMap<DescriptorHandle, DescriptorBinding>,
    pub surface_images: Vec<TextureId>,
    pub next_image: u32,
    pub presented: Vec<u32>,
    pub acquire_faults: VecDeque<SurfaceError>,
    pub present_results: VecDeque<Result<PresentStatus, SurfaceError>>,
    pub recreations: Vec<Extent2D>,
    pub extent: Extent2D,
}

#[derive(Debug)]
pub(crate) struct MockBackend {
    next_id: AtomicUsize,
    auto_complete: AtomicBool,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self {
            next_id: AtomicUsize::new(1),
            auto_complete: AtomicBool::new(false),
            state: Mutex::new(MockState {
                extent: Extent2D::new(64, 32),
                ..Default::default()
            }),
        };
        backend.rebuild_images(3);
        Arc::new(backend)
    }

    /// Completes fences as soon as they are signaled.
    pub fn with_auto_complete() -> Arc<Self> {
        let backend = Self::new();
        backend.auto_complete.store(true, Ordering::Relaxed);
        backend
    }

    fn next(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn rebuild_images(&self, count: usize) {
        let images = (0..count).map(|_| TextureId(self.next())).collect();
        let mut state = self.state();
        state.surface_images = images;
        state.next_image = 0;
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn complete_all(&self) {
        for fence in self.state().fences.values_mut() {
            fence.completed = fence.signaled;
        }
    }

    pub fn fence(&self, id: FenceId) -> MockFence {
        self.state().fences[&id]
    }
}

impl GpuBackend for MockBackend {
    fn adapter_info(&self) -> GraphicsAdapterInfo {
        GraphicsAdapterInfo {
            name: "Mock".to_string(),
            backend_type: GraphicsBackendType::Headless,
            device_type: RendererDeviceType::Cpu,
        }
    }

    fn create_fence(&self, _label: &str) -> Result<FenceId, DeviceError> {
        let id = FenceId(self.next());
        self.state().fences.insert(id, MockFence::default());
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) -> Result<(), DeviceError> {
        self.state()
            .fences
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
        let auto = self.auto_complete.load(Ordering::Relaxed);
        let mut state = self.state();
        let entry = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))?;
        entry.signaled = value;
        if auto {
            entry.completed = value;
        }
        Ok(())
    }

    fn completed_fence_value(&self, fence: FenceId) -> Result<FenceValue, DeviceError> {
        self.state()
            .fences
            .get(&fence)
            .map(|f| f.completed)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))
    }

    fn wait_fence(
        &self,
        fence: FenceId,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.waits.push((fence, value));
        let entry = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{fence:?}")))?;
        if value > entry.signaled {
            return Err(DeviceError::FenceTimeout {
                fence,
                value,
                completed: entry.completed,
                timeout_ms: timeout.map_or(u64::MAX, |t| t.as_millis() as u64),
            });
        }
        entry.completed = entry.completed.max(value);
        Ok(())
    }

    fn submit(&self, queue: QueueKind, commands: &CommandList) -> Result<(), DeviceError> {
        self.state().submissions.push((queue, commands.clone()));
        Ok(())
    }

    fn surface_extent(&self) -> Extent2D {
        self.state().extent
    }

    fn surface_format(&self) -> TextureFormat {
        TextureFormat::Rgba8Unorm
    }

    fn acquire_surface_image(&self) -> Result<SurfaceImage, RenderError> {
        let mut state = self.state();
        if let Some(fault) = state.acquire_faults.pop_front() {
            return Err(fault.into());
        }
        let index = state.next_image;
        state.next_image = (index + 1) % state.surface_images.len() as u32;
        Ok(SurfaceImage {
            index,
            texture: state.surface_images[index as usize],
        })
    }

    fn present(&self, image: SurfaceImage) -> Result<PresentStatus, RenderError> {
        let mut state = self.state();
        state.presented.push(image.index);
        match state.present_results.pop_front() {
            Some(result) => result.map_err(RenderError::from),
            None => Ok(PresentStatus::Optimal),
        }
    }

    fn recreate_surface(&self, extent: Extent2D) -> Result<(), RenderError> {
        {
            let mut state = self.state();
            state.extent = extent;
            state.recreations.push(extent);
        }
        self.rebuild_images(3);
        Ok(())
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, DeviceError> {
        let id = BufferId(self.next());
        self.state()
            .buffers
            .insert(id, vec![0; descriptor.size as usize]);
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), DeviceError> {
        self.state().buffers.remove(&id);
        Ok(())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state();
        let buffer = state
            .buffers
            .get_mut(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        let start = offset as usize;
        buffer[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, DeviceError> {
        let state = self.state();
        let buffer = state
            .buffers
            .get(&id)
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))?;
        Ok(buffer[offset as usize..(offset + size) as usize].to_vec())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, DeviceError> {
        let id = TextureId(self.next());
        self.state()
            .textures
            .insert(id, descriptor.clone().into_owned());
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), DeviceError> {
        self.state().textures.remove(&id);
        Ok(())
    }

    fn texture_descriptor(
        &self,
        id: TextureId,
    ) -> Result<TextureDescriptor<'static>, DeviceError> {
        self.state()
            .textures
            .get(&id)
            .cloned()
            .ok_or_else(|| DeviceError::ResourceNotFound(format!("{id:?}")))
    }

    fn copy_pitch_alignment(&self) -> u32 {
        256
    }

    fn write_descriptor(
        &self,
        handle: DescriptorHandle,
        binding: &DescriptorBinding,
    ) -> Result<(), DeviceError> {
        self.state().descriptors.insert(handle, *binding);
        Ok(())
    }

    fn clear_descriptor(&self, handle: DescriptorHandle) -> Result<(), DeviceError> {
        self.state().descriptors.remove(&handle);
        Ok(())
    }
}
