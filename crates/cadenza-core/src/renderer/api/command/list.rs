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

//! Recorded commands and the list that stores them.

use super::pass::{PipelineId, ScissorRect, Viewport};
use crate::renderer::api::resource::{
    BufferId, DescriptorHandle, IndexFormat, TextureId, TextureRegion,
};
use std::ops::Range;

/// A single command recorded into a [`CommandList`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Clears a color texture.
    ClearColor {
        /// The texture to clear.
        target: TextureId,
        /// Linear RGBA clear color.
        color: [f32; 4],
    },
    /// Clears a depth/stencil texture.
    ClearDepthStencil {
        /// The texture to clear.
        target: TextureId,
        /// Depth clear value.
        depth: f32,
        /// Stencil clear value.
        stencil: u8,
    },
    /// Sets the viewport for subsequent draws.
    SetViewport(Viewport),
    /// Sets the scissor rectangle for subsequent draws.
    SetScissor(ScissorRect),
    /// Overrides only the depth range of the current viewport.
    SetDepthRange {
        /// Depth mapped to the near plane.
        min: f32,
        /// Depth mapped to the far plane.
        max: f32,
    },
    /// Binds a pipeline state object.
    SetPipeline(PipelineId),
    /// Binds a descriptor to a shader slot.
    BindResource {
        /// The shader binding slot.
        slot: u32,
        /// The descriptor to bind.
        descriptor: DescriptorHandle,
    },
    /// Binds a range of a constant buffer to a shader slot.
    BindConstants {
        /// The shader binding slot.
        slot: u32,
        /// The buffer holding the constants.
        buffer: BufferId,
        /// Byte offset of the constants.
        offset: u64,
        /// Size of the constants in bytes.
        size: u64,
    },
    /// Binds a vertex buffer.
    SetVertexBuffer {
        /// The vertex buffer slot.
        slot: u32,
        /// The buffer.
        buffer: BufferId,
        /// Byte offset of the first vertex.
        offset: u64,
    },
    /// Binds an index buffer.
    SetIndexBuffer {
        /// The buffer.
        buffer: BufferId,
        /// Byte offset of the first index.
        offset: u64,
        /// Index width.
        format: IndexFormat,
    },
    /// A non-indexed draw.
    Draw {
        /// Vertices to draw.
        vertices: Range<u32>,
        /// Instances to draw.
        instances: Range<u32>,
    },
    /// An indexed draw.
    DrawIndexed {
        /// Indices to draw.
        indices: Range<u32>,
        /// Value added to each index.
        base_vertex: i32,
        /// Instances to draw.
        instances: Range<u32>,
    },
    /// Copies bytes between two buffers.
    CopyBufferToBuffer {
        /// Source buffer.
        src: BufferId,
        /// Source byte offset.
        src_offset: u64,
        /// Destination buffer.
        dst: BufferId,
        /// Destination byte offset.
        dst_offset: u64,
        /// Number of bytes to copy.
        size: u64,
    },
    /// Copies rows of texels from a buffer into a texture region.
    CopyBufferToTexture {
        /// Source buffer.
        src: BufferId,
        /// Byte offset of the first row in the source.
        src_offset: u64,
        /// Distance in bytes between rows in the source.
        bytes_per_row: u32,
        /// Destination texture.
        dst: TextureId,
        /// Destination region.
        region: TextureRegion,
    },
    /// Copies a texture region into a buffer, one row every `bytes_per_row` bytes.
    CopyTextureToBuffer {
        /// Source texture.
        src: TextureId,
        /// Source region.
        region: TextureRegion,
        /// Destination buffer.
        dst: BufferId,
        /// Byte offset of the first row in the destination.
        dst_offset: u64,
        /// Distance in bytes between rows in the destination.
        bytes_per_row: u32,
    },
}

impl RecordedCommand {
    /// Returns `true` for draw commands.
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
        )
    }

    /// Every buffer the command reads or writes.
    pub fn referenced_buffers(&self) -> Vec<BufferId> {
        match self {
            RecordedCommand::BindConstants { buffer, .. }
            | RecordedCommand::SetVertexBuffer { buffer, .. }
            | RecordedCommand::SetIndexBuffer { buffer, .. } => vec![*buffer],
            RecordedCommand::CopyBufferToBuffer { src, dst, .. } => vec![*src, *dst],
            RecordedCommand::CopyBufferToTexture { src, .. } => vec![*src],
            RecordedCommand::CopyTextureToBuffer { dst, .. } => vec![*dst],
            _ => Vec::new(),
        }
    }

    /// Every texture the command reads or writes directly.
    pub fn referenced_textures(&self) -> Vec<TextureId> {
        match self {
            RecordedCommand::ClearColor { target, .. }
            | RecordedCommand::ClearDepthStencil { target, .. } => vec![*target],
            RecordedCommand::CopyBufferToTexture { dst, .. } => vec![*dst],
            RecordedCommand::CopyTextureToBuffer { src, .. } => vec![*src],
            _ => Vec::new(),
        }
    }
}

/// An ordered list of recorded commands, ready to be submitted.
///
/// The list keeps its allocation across [`reset`](CommandList::reset) so a recorder
/// reusing it every frame does not reallocate in steady state.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    label: String,
    commands: Vec<RecordedCommand>,
}

impl CommandList {
    /// Creates an empty list.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    /// The list's debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Appends a command.
    pub fn push(&mut self, command: RecordedCommand) {
        self.commands.push(command);
    }

    /// Removes every command, keeping the allocation.
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    /// The recorded commands, in order.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// The number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The number of draw commands in the list.
    pub fn draw_count(&self) -> u32 {
        self.commands.iter().filter(|c| c.is_draw()).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_capacity() {
        let mut list = CommandList::new("test");
        for i in 0..32 {
            list.push(RecordedCommand::Draw {
                vertices: 0..3,
                instances: i..i + 1,
            });
        }
        let capacity = list.commands.capacity();
        assert_eq!(list.draw_count(), 32);

        list.reset();

        assert!(list.is_empty());
        assert_eq!(list.commands.capacity(), capacity);
    }

    #[test]
    fn test_referenced_resources() {
        let copy = RecordedCommand::CopyBufferToTexture {
            src: BufferId(3),
            src_offset: 0,
            bytes_per_row: 256,
            dst: TextureId(9),
            region: TextureRegion::new(0, 0, 4, 4),
        };
        assert_eq!(copy.referenced_buffers(), vec![BufferId(3)]);
        assert_eq!(copy.referenced_textures(), vec![TextureId(9)]);
        assert!(!copy.is_draw());
    }
}
