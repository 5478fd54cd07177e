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

//! Backend-agnostic data types exchanged with a [`GpuBackend`](crate::renderer::GpuBackend).
//!
//! - **[`core`]**: adapter information and engine configuration.
//! - **[`resource`]**: buffer, texture and descriptor handles with their descriptors.
//! - **[`command`]**: recorded commands, command lists and pass state.
//! - **[`sync`]**: fences, queues and presentable surface images.

pub mod command;
pub mod core;
pub mod resource;
pub mod sync;

pub use self::command::*;
pub use self::core::*;
pub use self::resource::*;
pub use self::sync::*;
