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

//! Adapter and device information.

use std::fmt;

/// The graphics API an adapter is driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GraphicsBackendType {
    /// The CPU-emulated backend used for tests and tooling.
    Headless,
    /// Vulkan.
    Vulkan,
    /// Apple Metal.
    Metal,
    /// Direct3D 12.
    Dx12,
    /// OpenGL / OpenGL ES.
    OpenGl,
    /// WebGPU running inside a browser.
    WebGpu,
    /// Any other or undetermined API.
    #[default]
    Unknown,
}

/// The physical kind of device behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RendererDeviceType {
    /// A GPU sharing memory with the CPU.
    IntegratedGpu,
    /// A GPU with dedicated memory.
    DiscreteGpu,
    /// A virtualized GPU.
    VirtualGpu,
    /// Software rendering on the CPU.
    Cpu,
    /// Unknown device type.
    #[default]
    Unknown,
}

/// Standardized, backend-agnostic information about the active adapter.
#[derive(Debug, Clone, Default)]
pub struct GraphicsAdapterInfo {
    /// The adapter's name as reported by the driver.
    pub name: String,
    /// The graphics API this adapter is used through.
    pub backend_type: GraphicsBackendType,
    /// The physical type of the adapter.
    pub device_type: RendererDeviceType,
}

impl fmt::Display for GraphicsAdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend_type, self.device_type
        )
    }
}
