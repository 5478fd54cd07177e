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
use cadenza_core::renderer::TextureFormat;
use std::time::Duration;

/// Options of the [`HeadlessBackend`](super::HeadlessBackend).
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Initial size of the presentable images.
    pub surface_extent: Extent2D,
    /// Format of the presentable images.
    pub surface_format: TextureFormat,
    /// Number of presentable images, cycled round-robin.
    pub image_count: u32,
    /// Time each queue worker sleeps before executing a submission.
    ///
    /// A non-zero latency keeps several frames in flight.
    pub submission_latency: Duration,
    /// Required alignment of `bytes_per_row` in buffer/texture copies.
    pub copy_pitch_alignment: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            surface_extent: Extent2D::new(256, 256),
            surface_format: TextureFormat::Rgba8Unorm,
            image_count: 3,
            submission_latency: Duration::ZERO,
            copy_pitch_alignment: 256,
        }
    }
}

impl HeadlessConfig {
    /// Sets the per-submission latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.submission_latency = latency;
        self
    }

    /// Sets the initial surface size.
    pub fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.surface_extent = Extent2D::new(width, height);
        self
    }

    /// Sets the number of presentable images.
    pub fn with_image_count(mut self, count: u32) -> Self {
        self.image_count = count.max(1);
        self
    }
}
