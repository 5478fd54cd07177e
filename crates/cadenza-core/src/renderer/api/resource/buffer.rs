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

//! Defines data structures related to GPU buffer resources.

use std::borrow::Cow;

/// Offsets and sizes of buffer-to-buffer copies must be multiples of this value.
pub const COPY_BUFFER_ALIGNMENT: u64 = 4;

cadenza_bitflags! {
    /// A set of flags describing the allowed usages of a [`BufferId`].
    ///
    /// Backends use them to place the buffer in the right memory type and to
    /// validate that it is only used the way it was declared.
    pub struct BufferUsage: u32 {
        /// The buffer can be read back to the CPU with `read_buffer`.
        const MAP_READ = 1 << 0;
        /// The buffer lives in CPU-writable memory and accepts `write_buffer`.
        const MAP_WRITE = 1 << 1;
        /// The buffer can be the source of a copy command.
        const COPY_SRC = 1 << 2;
        /// The buffer can be the destination of a copy command.
        const COPY_DST = 1 << 3;
        /// The buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 4;
        /// The buffer can be bound as an index buffer.
        const INDEX = 1 << 5;
        /// The buffer can be bound as a shader constant buffer.
        const CONSTANT = 1 << 6;
    }
}

/// A descriptor used to create a [`BufferId`].
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The total size of the buffer in bytes.
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
}

/// An opaque handle to a GPU buffer resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// The width of the indices in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit unsigned indices.
    Uint16,
    /// 32-bit unsigned indices.
    Uint32,
}
