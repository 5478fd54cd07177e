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

//! CPU-side tracking of a GPU timeline fence.
//!
//! A [`FenceTrackedResource`] owns one backend fence and the last value it asked
//! the device to signal. Callers store the value returned by
//! [`signal`](FenceTrackedResource::signal) next to whatever CPU-side resource the
//! submission reads, and wait on exactly that value before touching it again.

use crate::renderer::api::{FenceId, FenceValue, QueueKind};
use crate::renderer::error::{ContractViolation, DeviceError, RenderError};
use crate::renderer::traits::GpuBackend;
use std::sync::Arc;
use std::time::Duration;

/// A backend fence plus the monotonically increasing value last requested from it.
#[derive(Debug)]
pub struct FenceTrackedResource {
    backend: Arc<dyn GpuBackend>,
    fence: FenceId,
    label: String,
    last_signaled: FenceValue,
    timeout: Option<Duration>,
    destroyed: bool,
}

impl FenceTrackedResource {
    /// Creates a fence whose completed and requested values are both `0`.
    ///
    /// `timeout` bounds every blocking wait; `None` waits forever.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        label: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, DeviceError> {
        let label = label.into();
        let fence = backend.create_fence(&label)?;
        log::debug!("FenceTrackedResource: Created fence {fence:?} ('{label}')");
        Ok(Self {
            backend,
            fence,
            label,
            last_signaled: 0,
            timeout,
            destroyed: false,
        })
    }

    /// Asks the device to raise the fence once all work submitted so far on `queue` completes.
    ///
    /// Returns the new target value, strictly greater than every value returned before.
    pub fn signal(&mut self, queue: QueueKind) -> Result<FenceValue, DeviceError> {
        let value = self.last_signaled + 1;
        self.backend.signal_fence(queue, self.fence, value)?;
        self.last_signaled = value;
        Ok(value)
    }

    /// The fence's completed value, as last observed by the device.
    pub fn completed_value(&self) -> Result<FenceValue, DeviceError> {
        self.backend.completed_fence_value(self.fence)
    }

    /// Returns `true` if the device has reached `value`. Never blocks.
    pub fn is_complete(&self, value: FenceValue) -> Result<bool, DeviceError> {
        Ok(self.completed_value()? >= value)
    }

    /// Blocks until the device has reached `value`.
    ///
    /// Returns immediately if `value` already completed. Waiting on a value that was
    /// never signaled is rejected, since it could never complete.
    pub fn wait_until(&self, value: FenceValue) -> Result<(), RenderError> {
        if value > self.last_signaled {
            let violation = ContractViolation::WaitOnUnsignaledValue {
                value,
                last_signaled: self.last_signaled,
            };
            log::error!("FenceTrackedResource '{}': {violation}", self.label);
            return Err(violation.into());
        }
        if self.is_complete(value)? {
            return Ok(());
        }

        log::trace!(
            "FenceTrackedResource '{}': Waiting for value {value}",
            self.label
        );
        self.backend
            .wait_fence(self.fence, value, self.timeout)
            .map_err(|e| {
                log::error!(
                    "FenceTrackedResource '{}': Wait for value {value} failed: {e}",
                    self.label
                );
                RenderError::from(e)
            })
    }

    /// Blocks until everything signaled so far has completed.
    pub fn wait_idle(&self) -> Result<(), RenderError> {
        self.wait_until(self.last_signaled)
    }

    /// Returns `true` if the last signaled value has not completed yet.
    pub fn is_outstanding(&self) -> Result<bool, DeviceError> {
        Ok(!self.is_complete(self.last_signaled)?)
    }

    /// The highest value passed to the device so far.
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// The backend fence.
    pub fn id(&self) -> FenceId {
        self.fence
    }

    /// The fence's debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waits for all signaled work, then destroys the backend fence.
    ///
    /// Calling it more than once is a no-op.
    pub fn destroy(&mut self) -> Result<(), RenderError> {
        if self.destroyed {
            return Ok(());
        }
        self.wait_idle()?;
        self.backend.destroy_fence(self.fence)?;
        self.destroyed = true;
        Ok(())
    }
}
