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

//! A CPU-emulated backend with real queue concurrency.
//!
//! Copies and clears are executed byte-for-byte on host memory by one worker
//! thread per queue, so the synchronization rules of the core are observable:
//! reading a staging buffer too early, or destroying a resource still used by
//! pending work, is counted as a hazard.

mod backend;
mod config;
mod fence;
mod memory;
mod queue;
mod surface;

pub use self::backend::{HeadlessBackend, HeadlessStats};
pub use self::config::HeadlessConfig;

pub(crate) use self::backend::HeadlessShared;
