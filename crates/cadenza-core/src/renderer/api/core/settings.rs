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

//! Engine configuration.
//!
//! Configuration is fixed when the [`Engine`](crate::renderer::Engine) is initialized.
//! It can be built in code, starting from [`EngineConfig::default`], or loaded from JSON.

use crate::renderer::api::resource::{DescriptorCapacities, TextureFormat};
use crate::renderer::error::RenderError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The smallest supported number of frames in flight.
pub const MIN_FRAMES_IN_FLIGHT: usize = 2;
/// The largest supported number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Offsets handed out by the constant ring are multiples of this value.
pub const CONSTANT_ALIGNMENT: u64 = 256;

/// Everything the engine needs to size its renderer-lifetime resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The number of frame slots (`N`). The CPU may record up to `N - 1` frames ahead of the GPU.
    pub frames_in_flight: usize,
    /// Capacity of each descriptor table.
    pub descriptor_capacities: DescriptorCapacities,
    /// Maximum number of staging buffers the transfer engine may create.
    pub staging_pool_size: usize,
    /// Size in bytes of each staging buffer.
    pub staging_buffer_size: u64,
    /// Size in bytes of each per-frame constant buffer.
    pub constant_ring_size: u64,
    /// Upper bound on a single fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    /// Format of the depth/stencil target. `None` renders without one.
    pub depth_format: Option<TextureFormat>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MIN_FRAMES_IN_FLIGHT,
            descriptor_capacities: DescriptorCapacities::default(),
            staging_pool_size: 4,
            staging_buffer_size: 4 * 1024 * 1024,
            constant_ring_size: 64 * 1024,
            fence_timeout_ms: Some(10_000),
            depth_format: Some(TextureFormat::Depth24PlusStencil8),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON. Missing fields take their default value.
    pub fn from_json_str(json: &str) -> Result<Self, RenderError> {
        serde_json::from_str(json)
            .map_err(|e| RenderError::InvalidConfiguration(format!("malformed JSON: {e}")))
    }

    /// Serializes the configuration to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, RenderError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RenderError::InvalidConfiguration(e.to_string()))
    }

    /// The fence wait bound as a [`Duration`].
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), RenderError> {
        let invalid = |msg: String| Err(RenderError::InvalidConfiguration(msg));

        if !(MIN_FRAMES_IN_FLIGHT..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return invalid(format!(
                "frames_in_flight must be between {MIN_FRAMES_IN_FLIGHT} and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            ));
        }
        for kind in crate::renderer::api::resource::DescriptorKind::ALL {
            if self.descriptor_capacities.get(kind) == 0 {
                return invalid(format!("descriptor capacity for {kind} must be non-zero"));
            }
        }
        if self.staging_pool_size == 0 {
            return invalid("staging_pool_size must be at least 1".to_string());
        }
        if self.staging_buffer_size < CONSTANT_ALIGNMENT {
            return invalid(format!(
                "staging_buffer_size must be at least {CONSTANT_ALIGNMENT} bytes, got {}",
                self.staging_buffer_size
            ));
        }
        if self.constant_ring_size < CONSTANT_ALIGNMENT {
            return invalid(format!(
                "constant_ring_size must be at least {CONSTANT_ALIGNMENT} bytes, got {}",
                self.constant_ring_size
            ));
        }
        if self.fence_timeout_ms == Some(0) {
            return invalid("fence_timeout_ms must be non-zero (use null to wait forever)".to_string());
        }
        if let Some(format) = self.depth_format {
            if !format.is_depth() {
                return invalid(format!("depth_format {format:?} is not a depth format"));
            }
        }
        Ok(())
    }
}
