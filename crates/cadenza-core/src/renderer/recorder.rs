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

//! The record -> submit -> retire state machine for one command list.

use crate::renderer::api::*;
use crate::renderer::constant_ring::ConstantAllocation;
use crate::renderer::error::{ContractViolation, DeviceError, RenderError};
use crate::renderer::fence::FenceTrackedResource;
use crate::renderer::traits::GpuBackend;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// The lifecycle state of a [`CommandRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecorderState {
    /// Ready to record. Any previous submission has completed.
    Idle,
    /// Commands are being recorded.
    Recording,
    /// Recording finished, waiting to be submitted.
    Closed,
    /// Submitted to the device; the storage is owned by the GPU until the fence completes.
    Submitted,
}

/// One command list, its backing storage and a dedicated fence.
///
/// ```text
/// Idle --begin_recording--> Recording --end_recording--> Closed --submit--> Submitted
///   ^                                                                          |
///   +------------------------- fence reached (wait / poll) --------------------+
/// ```
///
/// The storage is never reset while the GPU may still read it: `begin_recording`
/// on a submitted recorder first waits for its fence.
///
/// Recording calls (`draw`, `set_viewport`, ...) made outside the `Recording`
/// state are dropped and logged.
#[derive(Debug)]
pub struct CommandRecorder {
    backend: Arc<dyn GpuBackend>,
    queue: QueueKind,
    list: CommandList,
    fence: FenceTrackedResource,
    last_submitted: FenceValue,
    state: RecorderState,
    dropped_commands: u32,
}

impl CommandRecorder {
    /// Creates an idle recorder submitting to `queue`, with its own fence.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        queue: QueueKind,
        label: impl Into<String>,
        fence_timeout: Option<Duration>,
    ) -> Result<Self, DeviceError> {
        let label = label.into();
        let fence = FenceTrackedResource::new(backend.clone(), label.clone(), fence_timeout)?;
        Ok(Self {
            backend,
            queue,
            list: CommandList::new(label),
            fence,
            last_submitted: 0,
            state: RecorderState::Idle,
            dropped_commands: 0,
        })
    }

    /// Opens the recorder for recording.
    ///
    /// If the previous submission is still executing, blocks until its fence completes.
    ///
    /// ## Errors
    /// * `ContractViolation::ReentrantRecording` - If the recorder is recording or closed.
    pub fn begin_recording(&mut self) -> Result<(), RenderError> {
        match self.state {
            RecorderState::Recording | RecorderState::Closed => {
                let violation = ContractViolation::ReentrantRecording {
                    label: self.label().to_string(),
                    state: self.state,
                };
                log::error!("CommandRecorder: {violation}");
                return Err(violation.into());
            }
            RecorderState::Submitted => self.wait_for_completion()?,
            RecorderState::Idle => {}
        }

        debug_assert!(self.fence.is_complete(self.last_submitted).unwrap_or(true));
        self.list.reset();
        self.dropped_commands = 0;
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Closes the recorder.
    pub fn end_recording(&mut self) -> Result<(), RenderError> {
        if self.state != RecorderState::Recording {
            let violation = ContractViolation::NotRecording {
                label: self.label().to_string(),
                state: self.state,
            };
            log::error!("CommandRecorder: {violation}");
            return Err(violation.into());
        }
        self.state = RecorderState::Closed;
        Ok(())
    }

    /// Submits the closed list and signals the recorder's fence behind it.
    ///
    /// Returns the fence value that marks the submission's completion.
    pub fn submit(&mut self) -> Result<FenceValue, RenderError> {
        if self.state != RecorderState::Closed {
            let violation = ContractViolation::SubmitUnclosed {
                label: self.label().to_string(),
                state: self.state,
            };
            log::error!("CommandRecorder: {violation}");
            return Err(violation.into());
        }

        self.backend.submit(self.queue, &self.list).map_err(|e| {
            log::error!("CommandRecorder '{}': Submission failed: {e}", self.label());
            e
        })?;
        // The list is on the queue now and must never be resubmitted.
        self.state = RecorderState::Submitted;
        let value = self.fence.signal(self.queue).map_err(|e| {
            log::error!(
                "CommandRecorder '{}': Fence signal failed after submission: {e}",
                self.label()
            );
            e
        })?;
        self.last_submitted = value;
        log::trace!(
            "CommandRecorder '{}': Submitted {} commands, fence value {value}",
            self.label(),
            self.list.len()
        );
        Ok(value)
    }

    /// Blocks until the last submission completes and returns the recorder to `Idle`.
    ///
    /// Does nothing unless the recorder is `Submitted`.
    pub fn wait_for_completion(&mut self) -> Result<(), RenderError> {
        if self.state == RecorderState::Submitted {
            self.fence.wait_until(self.last_submitted)?;
            self.state = RecorderState::Idle;
        }
        Ok(())
    }

    /// Retires the last submission if it has completed. Never blocks.
    ///
    /// Returns `true` if the recorder is idle afterwards.
    pub fn poll_completion(&mut self) -> Result<bool, RenderError> {
        if self.state == RecorderState::Submitted
            && self.fence.is_complete(self.last_submitted)?
        {
            self.state = RecorderState::Idle;
        }
        Ok(self.state == RecorderState::Idle)
    }

    /// Returns `true` if the last submission (if any) has completed.
    pub fn is_submission_complete(&self) -> Result<bool, DeviceError> {
        self.fence.is_complete(self.last_submitted)
    }

    /// Waits for outstanding work, then destroys the fence.
    pub fn destroy(&mut self) -> Result<(), RenderError> {
        self.wait_for_completion()?;
        self.fence.destroy()
    }

    // --- Accessors ---

    /// The current lifecycle state.
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// The recorder's debug label.
    pub fn label(&self) -> &str {
        self.list.label()
    }

    /// The queue this recorder submits to.
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// The fence value of the last submission, `0` before the first one.
    pub fn last_submitted(&self) -> FenceValue {
        self.last_submitted
    }

    /// The recorder's fence.
    pub fn fence(&self) -> &FenceTrackedResource {
        &self.fence
    }

    /// The commands recorded since the last `begin_recording`.
    pub fn commands(&self) -> &CommandList {
        &self.list
    }

    /// The number of draw calls recorded since the last `begin_recording`.
    pub fn draw_count(&self) -> u32 {
        self.list.draw_count()
    }

    /// Commands rejected because the recorder was not recording.
    pub fn dropped_commands(&self) -> u32 {
        self.dropped_commands
    }

    // --- Recording ---

    fn record(&mut self, command: RecordedCommand) {
        if self.state != RecorderState::Recording {
            log::error!(
                "CommandRecorder '{}': Dropped {:?} recorded while {:?}",
                self.label(),
                command,
                self.state
            );
            self.dropped_commands += 1;
            return;
        }
        self.list.push(command);
    }

    /// Clears a color texture.
    pub fn clear_color(&mut self, target: TextureId, color: [f32; 4]) {
        self.record(RecordedCommand::ClearColor { target, color });
    }

    /// Clears a depth/stencil texture.
    pub fn clear_depth_stencil(&mut self, target: TextureId, depth: f32, stencil: u8) {
        self.record(RecordedCommand::ClearDepthStencil {
            target,
            depth,
            stencil,
        });
    }

    /// Sets the viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record(RecordedCommand::SetViewport(viewport));
    }

    /// Sets the scissor rectangle.
    pub fn set_scissor(&mut self, scissor: ScissorRect) {
        self.record(RecordedCommand::SetScissor(scissor));
    }

    /// Overrides the viewport's depth range, e.g. to keep foreground geometry
    /// in front of the rest of the scene.
    pub fn set_depth_range(&mut self, min: f32, max: f32) {
        self.record(RecordedCommand::SetDepthRange { min, max });
    }

    /// Binds a pipeline state object.
    pub fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    /// Binds a descriptor to a shader slot.
    pub fn bind_resource(&mut self, slot: u32, descriptor: DescriptorHandle) {
        self.record(RecordedCommand::BindResource { slot, descriptor });
    }

    /// Binds constants written to the constant ring.
    pub fn bind_constants(&mut self, slot: u32, constants: ConstantAllocation) {
        self.record(RecordedCommand::BindConstants {
            slot,
            buffer: constants.buffer,
            offset: constants.offset,
            size: constants.size,
        });
    }

    /// Binds a vertex buffer.
    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    /// Binds an index buffer.
    pub fn set_index_buffer(&mut self, buffer: BufferId, offset: u64, format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    /// Records a non-indexed draw.
    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(RecordedCommand::Draw {
            vertices,
            instances,
        });
    }

    /// Records an indexed draw.
    pub fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    /// Records a buffer-to-buffer copy.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(RecordedCommand::CopyBufferToBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    /// Records a buffer-to-texture copy.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: BufferId,
        src_offset: u64,
        bytes_per_row: u32,
        dst: TextureId,
        region: TextureRegion,
    ) {
        self.record(RecordedCommand::CopyBufferToTexture {
            src,
            src_offset,
            bytes_per_row,
            dst,
            region,
        });
    }

    /// Records a texture-to-buffer copy.
    pub fn copy_texture_to_buffer(
        &mut self,
        src: TextureId,
        region: TextureRegion,
        dst: BufferId,
        dst_offset: u64,
        bytes_per_row: u32,
    ) {
        self.record(RecordedCommand::CopyTextureToBuffer {
            src,
            region,
            dst,
            dst_offset,
            bytes_per_row,
        });
    }
}
