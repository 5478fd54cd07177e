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

//! Per-frame and teardown statistics.

use crate::renderer::api::sync::FenceValue;
use std::time::Duration;

/// What happened during one `begin_frame` / `end_frame` pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// A sequential counter for rendered frames, starting at 0.
    pub frame_number: u64,
    /// The frame slot (`frame_number % frames_in_flight`) the frame was recorded into.
    pub slot: usize,
    /// The index of the presentable image the frame was rendered to.
    pub image_index: u32,
    /// The fence value signaled when the frame's work was submitted.
    pub fence_value: FenceValue,
    /// The slot fence value `begin_frame` waited for, `0` on the slot's first use.
    pub waited_fence_value: FenceValue,
    /// Time spent blocked waiting for the slot's previous submission.
    pub fence_wait: Duration,
    /// The number of draw calls recorded for the frame.
    pub draw_calls: u32,
    /// The total number of commands recorded for the frame.
    pub commands_recorded: usize,
    /// `true` if the surface reported that it no longer matches the window.
    pub suboptimal: bool,
}

/// The outcome of a clean engine shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The number of frames submitted over the engine's lifetime.
    pub frames_rendered: u64,
    /// Descriptor handles still allocated at shutdown.
    pub leaked_descriptors: u32,
    /// Fences whose last signaled value had not completed at shutdown.
    pub outstanding_fences: usize,
    /// Deferred releases executed during shutdown.
    pub released_resources: usize,
}

impl ShutdownReport {
    /// Returns `true` if nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.leaked_descriptors == 0 && self.outstanding_fences == 0
    }
}
