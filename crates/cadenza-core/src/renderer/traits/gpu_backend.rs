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

//! The capability interface between the engine and an explicit graphics API.

use crate::math::Extent2D;
use crate::renderer::api::*;
use crate::renderer::error::{DeviceError, RenderError};
use std::fmt::Debug;
use std::time::Duration;

/// The operations the engine needs from a graphics device.
///
/// Everything the engine schedules goes through this trait: it never sees a
/// native API object. Implementations must be thread-safe; the engine itself only
/// calls them from the thread that owns it.
///
/// # Fences
///
/// Fences are timelines. A fresh fence has completed value `0`.
/// [`signal_fence`](GpuBackend::signal_fence) asks the device to raise the fence
/// to `value` once every piece of work previously submitted to `queue` has finished.
/// Completed values only grow and never exceed the highest value signaled.
pub trait GpuBackend: Send + Sync + Debug + 'static {
    /// Describes the adapter backing this device.
    fn adapter_info(&self) -> GraphicsAdapterInfo;

    // --- Fences ---

    /// Creates a fence whose completed value is `0`.
    /// ## Errors
    /// * `DeviceError` - If the device cannot create the fence.
    fn create_fence(&self, label: &str) -> Result<FenceId, DeviceError>;

    /// Destroys a fence. Callers must not destroy a fence with pending signals.
    fn destroy_fence(&self, fence: FenceId) -> Result<(), DeviceError>;

    /// Enqueues a signal of `fence` to `value` behind all work submitted so far on `queue`.
    fn signal_fence(
        &self,
        queue: QueueKind,
        fence: FenceId,
        value: FenceValue,
    ) -> Result<(), DeviceError>;

    /// Returns the fence's completed value without blocking.
    fn completed_fence_value(&self, fence: FenceId) -> Result<FenceValue, DeviceError>;

    /// Blocks until the fence's completed value reaches `value`.
    /// ## Errors
    /// * `DeviceError::FenceTimeout` - If `timeout` elapses first.
    /// * `DeviceError::DeviceLost` - If the device is lost while waiting.
    fn wait_fence(
        &self,
        fence: FenceId,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> Result<(), DeviceError>;

    // --- Submission ---

    /// Submits a closed command list to a queue. Execution is asynchronous.
    fn submit(&self, queue: QueueKind, commands: &CommandList) -> Result<(), DeviceError>;

    // --- Surface ---

    /// The current size of the presentable images.
    fn surface_extent(&self) -> Extent2D;

    /// The texel format of the presentable images.
    fn surface_format(&self) -> TextureFormat;

    /// Acquires the next presentable image.
    /// ## Errors
    /// * `RenderError::Surface` - If the surface is out of date, lost or timed out.
    /// * `RenderError::Device` - If the device failed.
    fn acquire_surface_image(&self) -> Result<SurfaceImage, RenderError>;

    /// Presents a previously acquired image, after the work already submitted to the graphics queue.
    fn present(&self, image: SurfaceImage) -> Result<PresentStatus, RenderError>;

    /// Rebuilds the presentable images at a new size. No presentable image may be in flight.
    fn recreate_surface(&self, extent: Extent2D) -> Result<(), RenderError>;

    // --- Resources ---

    /// Creates a buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, DeviceError>;

    /// Destroys a buffer. No pending work may reference it.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), DeviceError>;

    /// Copies `data` into a [`BufferUsage::MAP_WRITE`] buffer at `offset`.
    ///
    /// The write is visible to every submission made after this call returns.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), DeviceError>;

    /// Reads `size` bytes of a [`BufferUsage::MAP_READ`] buffer. No pending work may write it.
    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, DeviceError>;

    /// Creates a 2D texture.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, DeviceError>;

    /// Destroys a texture. No pending work may reference it.
    fn destroy_texture(&self, id: TextureId) -> Result<(), DeviceError>;

    /// Returns the descriptor a texture was created with.
    fn texture_descriptor(&self, id: TextureId)
        -> Result<TextureDescriptor<'static>, DeviceError>;

    /// The required alignment, in bytes, of `bytes_per_row` in buffer/texture copies.
    fn copy_pitch_alignment(&self) -> u32;

    // --- Descriptors ---

    /// Publishes what a descriptor table slot refers to.
    fn write_descriptor(
        &self,
        handle: DescriptorHandle,
        binding: &DescriptorBinding,
    ) -> Result<(), DeviceError>;

    /// Forgets what a descriptor table slot refers to.
    fn clear_descriptor(&self, handle: DescriptorHandle) -> Result<(), DeviceError>;
}
