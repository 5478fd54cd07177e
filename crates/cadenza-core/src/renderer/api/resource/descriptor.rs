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

//! Descriptor kinds, handles and the bindings a descriptor slot can refer to.

use super::texture::{SamplerDescriptor, TextureId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four descriptor tables the allocator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorKind {
    /// A shader-visible view of a texture.
    ShaderResource,
    /// A depth/stencil attachment view.
    DepthTarget,
    /// A color attachment view.
    ColorTarget,
    /// A sampler.
    Sampler,
}

impl DescriptorKind {
    /// Every kind, in table order.
    pub const ALL: [DescriptorKind; 4] = [
        DescriptorKind::ShaderResource,
        DescriptorKind::DepthTarget,
        DescriptorKind::ColorTarget,
        DescriptorKind::Sampler,
    ];

    /// The index of this kind's table.
    pub const fn table_index(&self) -> usize {
        match self {
            DescriptorKind::ShaderResource => 0,
            DescriptorKind::DepthTarget => 1,
            DescriptorKind::ColorTarget => 2,
            DescriptorKind::Sampler => 3,
        }
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorKind::ShaderResource => "shader_resource",
            DescriptorKind::DepthTarget => "depth_target",
            DescriptorKind::ColorTarget => "color_target",
            DescriptorKind::Sampler => "sampler",
        };
        f.write_str(name)
    }
}

/// An opaque reference to one slot of a descriptor table.
///
/// Handles are `Copy`. They carry their kind and the identity of the allocator
/// that issued them, so a handle presented to a different allocator is rejected
/// instead of freeing somebody else's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    pub(crate) kind: DescriptorKind,
    pub(crate) index: u32,
    pub(crate) allocator: u32,
}

impl DescriptorHandle {
    /// The table this handle belongs to.
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    /// The slot index inside its table.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The identity of the allocator that issued the handle.
    pub fn allocator_id(&self) -> u32 {
        self.allocator
    }
}

impl fmt::Display for DescriptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.kind, self.index, self.allocator)
    }
}

/// The fixed capacity of each descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorCapacities {
    /// Slots for shader-visible texture views.
    pub shader_resource: u32,
    /// Slots for depth/stencil views.
    pub depth_target: u32,
    /// Slots for color-target views.
    pub color_target: u32,
    /// Slots for samplers.
    pub sampler: u32,
}

impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            shader_resource: 1024,
            depth_target: 16,
            color_target: 64,
            sampler: 32,
        }
    }
}

impl DescriptorCapacities {
    /// The same capacity for every table.
    pub const fn uniform(capacity: u32) -> Self {
        Self {
            shader_resource: capacity,
            depth_target: capacity,
            color_target: capacity,
            sampler: capacity,
        }
    }

    /// The capacity of the table for `kind`.
    pub const fn get(&self, kind: DescriptorKind) -> u32 {
        match kind {
            DescriptorKind::ShaderResource => self.shader_resource,
            DescriptorKind::DepthTarget => self.depth_target,
            DescriptorKind::ColorTarget => self.color_target,
            DescriptorKind::Sampler => self.sampler,
        }
    }
}

/// What a descriptor slot refers to once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorBinding {
    /// A sampled view of a texture.
    ShaderResource(TextureId),
    /// A depth/stencil attachment view of a texture.
    DepthTarget(TextureId),
    /// A color attachment view of a texture.
    ColorTarget(TextureId),
    /// A sampler.
    Sampler(SamplerDescriptor),
}

impl DescriptorBinding {
    /// The descriptor kind this binding must be written into.
    pub const fn kind(&self) -> DescriptorKind {
        match self {
            DescriptorBinding::ShaderResource(_) => DescriptorKind::ShaderResource,
            DescriptorBinding::DepthTarget(_) => DescriptorKind::DepthTarget,
            DescriptorBinding::ColorTarget(_) => DescriptorKind::ColorTarget,
            DescriptorBinding::Sampler(_) => DescriptorKind::Sampler,
        }
    }

    /// The texture the binding views, if any.
    pub const fn texture(&self) -> Option<TextureId> {
        match self {
            DescriptorBinding::ShaderResource(t)
            | DescriptorBinding::DepthTarget(t)
            | DescriptorBinding::ColorTarget(t) => Some(*t),
            DescriptorBinding::Sampler(_) => None,
        }
    }
}
