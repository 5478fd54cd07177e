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

//! Synchronization primitives exchanged with the backend.

/// An opaque handle to a timeline fence owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub usize);

/// A point on a fence's timeline. Every fence starts out completed at `0`.
pub type FenceValue = u64;

/// The device queues work can be submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// The queue frames are rendered and presented on.
    Graphics,
    /// The queue staging copies are executed on.
    Transfer,
}

/// A presentable image handed out by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceImage {
    /// The image's index in the surface's image array.
    pub index: u32,
    /// The texture frames render into.
    pub texture: super::resource::TextureId,
}

/// The outcome of a successful present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentStatus {
    /// The surface matches the window.
    Optimal,
    /// The image was shown, but the surface should be recreated.
    Suboptimal,
}
