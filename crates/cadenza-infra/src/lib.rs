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

//! Backend adapters for `cadenza-core`.
//!
//! * [`graphics::headless`] executes command lists on the CPU. It is used by the
//!   test suite and for offscreen work.
//! * [`graphics::wgpu`] drives a real GPU through `wgpu`.

pub mod graphics;

pub use graphics::headless::{HeadlessBackend, HeadlessConfig, HeadlessStats};
pub use graphics::wgpu::{WgpuContext, WgpuDevice};
