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

//! Command recording types.
//!
//! A [`CommandList`] is a backend-agnostic sequence of [`RecordedCommand`]s. It is
//! filled by a [`CommandRecorder`](crate::renderer::CommandRecorder) and consumed
//! by [`GpuBackend::submit`](crate::renderer::GpuBackend::submit), which translates
//! it into the native API's command buffer.

pub mod list;
pub mod pass;

pub use self::list::*;
pub use self::pass::*;
