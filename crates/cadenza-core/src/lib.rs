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

//! # Cadenza Core
//!
//! Backend-agnostic frame synchronization and GPU resource lifecycle management.
//!
//! The crate is organized around one capability trait, [`renderer::GpuBackend`],
//! and the components layered on top of it: fences, descriptor tables, command
//! recorders, the staging upload path, the N-buffered frame pipeline and the
//! per-frame constant ring. [`renderer::Engine`] ties them together.

#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod math;
pub mod renderer;

pub use renderer::{Engine, EngineConfig, RenderError};
