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

//! The emulated swapchain.

use cadenza_core::math::Extent2D;
use cadenza_core::renderer::{PresentStatus, SurfaceError, SurfaceImage, TextureFormat, TextureId};
use std::collections::VecDeque;

/// Presentable images handed out round-robin, plus scripted faults.
#[derive(Debug)]
pub(crate) struct HeadlessSurface {
    pub extent: Extent2D,
    pub format: TextureFormat,
    pub images: Vec<TextureId>,
    next: u32,
    acquire_faults: VecDeque<SurfaceError>,
    present_faults: VecDeque<Result<PresentStatus, SurfaceError>>,
}

impl HeadlessSurface {
    pub fn new(extent: Extent2D, format: TextureFormat, images: Vec<TextureId>) -> Self {
        Self {
            extent,
            format,
            images,
            next: 0,
            acquire_faults: VecDeque::new(),
            present_faults: VecDeque::new(),
        }
    }

    /// Replaces the images after a recreation. Pending faults are kept.
    pub fn replace_images(&mut self, extent: Extent2D, images: Vec<TextureId>) -> Vec<TextureId> {
        self.extent = extent;
        self.next = 0;
        std::mem::replace(&mut self.images, images)
    }

    pub fn acquire(&mut self) -> Result<SurfaceImage, SurfaceError> {
        if let Some(fault) = self.acquire_faults.pop_front() {
            return Err(fault);
        }
        let index = self.next;
        self.next = (self.next + 1) % self.images.len() as u32;
        Ok(SurfaceImage {
            index,
            texture: self.images[index as usize],
        })
    }

    pub fn present(&mut self, image: SurfaceImage) -> Result<PresentStatus, SurfaceError> {
        if self.images.get(image.index as usize) != Some(&image.texture) {
            // The image belongs to a swapchain that has since been rebuilt.
            return Err(SurfaceError::OutOfDate);
        }
        self.present_faults
            .pop_front()
            .unwrap_or(Ok(PresentStatus::Optimal))
    }

    pub fn push_acquire_fault(&mut self, fault: SurfaceError) {
        self.acquire_faults.push_back(fault);
    }

    pub fn push_present_result(&mut self, result: Result<PresentStatus, SurfaceError>) {
        self.present_faults.push_back(result);
    }
}
