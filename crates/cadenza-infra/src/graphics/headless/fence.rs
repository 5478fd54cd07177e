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

//! Emulated timeline fences.

use cadenza_core::renderer::{DeviceError, FenceId, FenceValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TimelineState {
    signaled: FenceValue,
    completed: FenceValue,
}

/// A monotonically increasing counter raised by the queue workers.
#[derive(Debug, Default)]
pub struct FenceTimeline {
    state: Mutex<TimelineState>,
    cond: Condvar,
}

impl FenceTimeline {
    fn state(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records that a signal to `value` was enqueued.
    pub fn enqueue_signal(&self, value: FenceValue) {
        let mut state = self.state();
        state.signaled = state.signaled.max(value);
    }

    /// Raises the completed value and wakes every waiter.
    pub fn complete(&self, value: FenceValue) {
        let mut state = self.state();
        state.completed = state.completed.max(value);
        self.cond.notify_all();
    }

    /// Wakes every waiter without changing the value, so they re-check device loss.
    pub fn wake_all(&self) {
        let _state = self.state();
        self.cond.notify_all();
    }

    /// The completed value.
    pub fn completed(&self) -> FenceValue {
        self.state().completed
    }

    /// Returns `true` if a signal was enqueued that has not completed yet.
    pub fn is_pending(&self) -> bool {
        let state = self.state();
        state.completed < state.signaled
    }

    /// Blocks until the completed value reaches `value`.
    pub fn wait(
        &self,
        id: FenceId,
        value: FenceValue,
        timeout: Option<Duration>,
        device_lost: &AtomicBool,
    ) -> Result<(), DeviceError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state();
        loop {
            if state.completed >= value {
                return Ok(());
            }
            if device_lost.load(Ordering::Acquire) {
                return Err(DeviceError::DeviceLost(format!(
                    "fence {id:?} stopped at {} while waiting for {value}",
                    state.completed
                )));
            }
            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DeviceError::FenceTimeout {
                            fence: id,
                            value,
                            completed: state.completed,
                            timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
                        });
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }
}
