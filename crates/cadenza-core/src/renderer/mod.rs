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

//! Frame synchronization and GPU resource lifecycle, independent of any graphics API.
//!
//! The [`Engine`] drives an N-buffered [`FramePipeline`] of [`CommandRecorder`]s,
//! hands out [`DescriptorHandle`]s from fixed-capacity tables, streams CPU data into
//! GPU resources through the [`TransferEngine`] and delays destruction of resources
//! that in-flight frames may still read.
//!
//! Everything here talks to the device through the [`GpuBackend`] trait. The
//! concrete adapters (headless, wgpu) live in the `cadenza-infra` crate.

pub mod api;
pub mod constant_ring;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fence;
pub mod frame_pipeline;
#[cfg(test)]
pub(crate) mod mock;
pub mod recorder;
pub mod release_queue;
pub mod traits;
pub mod transfer;

// Re-export the most important traits and types for easier use.
pub use self::api::*;
pub use self::constant_ring::{ConstantAllocation, ConstantRing};
pub use self::descriptor::{DescriptorAllocator, OwnedDescriptor, ScopedDescriptor};
pub use self::engine::Engine;
pub use self::error::{ContractViolation, DeviceError, RenderError, SurfaceError, TransferError};
pub use self::fence::FenceTrackedResource;
pub use self::frame_pipeline::{FramePipeline, FrameSlot, MAX_SURFACE_RECREATION_ATTEMPTS};
pub use self::recorder::{CommandRecorder, RecorderState};
pub use self::release_queue::{DeferredRelease, ReleaseQueue};
pub use self::traits::GpuBackend;
pub use self::transfer::{
    ResourceRef, TransferEngine, TransferStats, UploadDestination, UploadRequest, UploadTicket,
};
