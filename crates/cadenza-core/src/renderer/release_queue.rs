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

//! Releases deferred until the frames that may reference a resource have completed.
//!
//! A release is parked in the bucket of a frame slot. The bucket is drained the next
//! time that slot is reused, right after `begin_frame` has waited for the slot's
//! fence. All frames run on the graphics queue in order, so that wait also covers
//! every frame submitted before the release was requested.

use crate::renderer::api::{BufferId, TextureId};
use crate::renderer::descriptor::{DescriptorAllocator, OwnedDescriptor};
use crate::renderer::traits::GpuBackend;
use crate::renderer::transfer::ResourceRef;

/// A resource whose destruction waits for in-flight frames.
#[derive(Debug)]
pub enum DeferredRelease {
    /// Frees the descriptor slot and clears it on the backend.
    Descriptor(OwnedDescriptor),
    /// Destroys the texture.
    Texture(TextureId),
    /// Destroys the buffer.
    Buffer(BufferId),
}

impl DeferredRelease {
    /// The GPU resource destroyed by this release, if it is not a descriptor.
    pub fn resource(&self) -> Option<ResourceRef> {
        match self {
            DeferredRelease::Descriptor(_) => None,
            DeferredRelease::Texture(id) => Some(ResourceRef::Texture(*id)),
            DeferredRelease::Buffer(id) => Some(ResourceRef::Buffer(*id)),
        }
    }
}

/// Per-slot buckets of pending releases.
#[derive(Debug)]
pub struct ReleaseQueue {
    buckets: Vec<Vec<DeferredRelease>>,
}

impl ReleaseQueue {
    /// Creates one empty bucket per frame slot.
    pub fn new(slot_count: usize) -> Self {
        Self {
            buckets: (0..slot_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Parks a release until `slot` is next reused.
    pub fn push(&mut self, slot: usize, release: DeferredRelease) {
        self.buckets[slot].push(release);
    }

    /// Takes every release parked on `slot`.
    pub fn take(&mut self, slot: usize) -> Vec<DeferredRelease> {
        std::mem::take(&mut self.buckets[slot])
    }

    /// Takes every parked release.
    pub fn take_all(&mut self) -> Vec<DeferredRelease> {
        self.buckets.iter_mut().flat_map(std::mem::take).collect()
    }

    /// The number of parked releases.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Executes releases whose frames are known to have completed.
///
/// Failures are logged and do not stop the remaining releases. Returns how many succeeded.
pub fn execute_releases(
    releases: Vec<DeferredRelease>,
    backend: &dyn GpuBackend,
    descriptors: &DescriptorAllocator,
) -> usize {
    let mut released = 0;
    for release in releases {
        let result = match release {
            DeferredRelease::Descriptor(owned) => {
                let handle = owned.handle();
                backend
                    .clear_descriptor(handle)
                    .map_err(|e| e.to_string())
                    .and_then(|()| owned.release(descriptors).map_err(|e| e.to_string()))
            }
            DeferredRelease::Texture(id) => backend.destroy_texture(id).map_err(|e| e.to_string()),
            DeferredRelease::Buffer(id) => backend.destroy_buffer(id).map_err(|e| e.to_string()),
        };
        match result {
            Ok(()) => released += 1,
            Err(e) => log::warn!("ReleaseQueue: Deferred release failed: {e}"),
        }
    }
    released
}
