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

//! Defines data structures related to GPU texture resources.

use crate::math::{Extent2D, Origin2D};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// The memory layout of a texture's texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// One 8-bit normalized channel.
    R8Unorm,
    /// Four 8-bit normalized channels.
    Rgba8Unorm,
    /// Four 8-bit normalized channels, sRGB encoded.
    Rgba8UnormSrgb,
    /// Four 8-bit normalized channels in BGRA order.
    Bgra8Unorm,
    /// Four 8-bit normalized channels in BGRA order, sRGB encoded.
    Bgra8UnormSrgb,
    /// Four 16-bit float channels.
    Rgba16Float,
    /// One 32-bit float channel.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
    /// 24-bit depth with an 8-bit stencil.
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// The size of one texel in bytes.
    pub const fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }

    /// Returns `true` for depth or depth/stencil formats.
    pub const fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    /// Returns `true` if the format has a stencil aspect.
    pub const fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }
}

cadenza_bitflags! {
    /// A set of flags describing the allowed usages of a [`TextureId`].
    pub struct TextureUsage: u32 {
        /// The texture can be the source of a copy command.
        const COPY_SRC = 1 << 0;
        /// The texture can be the destination of a copy command.
        const COPY_DST = 1 << 1;
        /// The texture can be sampled from shaders.
        const SAMPLED = 1 << 2;
        /// The texture can be rendered to as a color attachment.
        const RENDER_TARGET = 1 << 3;
        /// The texture can be used as a depth/stencil attachment.
        const DEPTH_STENCIL = 1 << 4;
    }
}

/// A descriptor used to create a [`TextureId`]. Textures are 2D with a single mip level.
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// An optional debug label for the texture.
    pub label: Option<Cow<'a, str>>,
    /// The size of the texture.
    pub size: Extent2D,
    /// The texel format.
    pub format: TextureFormat,
    /// How the texture will be used.
    pub usage: TextureUsage,
}

impl TextureDescriptor<'_> {
    /// Returns a descriptor borrowing nothing, suitable for storing.
    pub fn into_owned(self) -> TextureDescriptor<'static> {
        TextureDescriptor {
            label: self.label.map(|l| Cow::Owned(l.into_owned())),
            size: self.size,
            format: self.format,
            usage: self.usage,
        }
    }
}

/// An opaque handle to a GPU texture resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

/// A rectangular sub-region of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureRegion {
    /// The top-left texel of the region.
    pub origin: Origin2D,
    /// The size of the region.
    pub extent: Extent2D,
}

impl TextureRegion {
    /// Creates a region from its origin and size.
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            origin: Origin2D::new(x, y),
            extent: Extent2D::new(width, height),
        }
    }

    /// The region covering a whole texture of the given size.
    pub const fn full(extent: Extent2D) -> Self {
        Self {
            origin: Origin2D::ZERO,
            extent,
        }
    }

    /// Returns `true` if the region lies entirely inside a texture of size `bounds`.
    pub fn fits_within(&self, bounds: Extent2D) -> bool {
        let right = self.origin.x as u64 + self.extent.width as u64;
        let bottom = self.origin.y as u64 + self.extent.height as u64;
        right <= bounds.width as u64 && bottom <= bounds.height as u64
    }
}

/// Texel filtering used by a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest-texel sampling.
    #[default]
    Nearest,
    /// Linear interpolation between texels.
    Linear,
}

/// How a sampler handles coordinates outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Clamp to the edge texel.
    #[default]
    ClampToEdge,
    /// Repeat the texture.
    Repeat,
    /// Repeat the texture, mirroring on every repetition.
    MirrorRepeat,
}

/// The state of a sampler placed in the sampler descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDescriptor {
    /// Filter used when the texture is magnified.
    pub mag_filter: FilterMode,
    /// Filter used when the texture is minified.
    pub min_filter: FilterMode,
    /// Addressing mode for both axes.
    pub address_mode: AddressMode,
}
