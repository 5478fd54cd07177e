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

//! Defines the hierarchy of error types for the rendering subsystem.
//!
//! Errors fall into three classes that callers handle differently:
//!
//! - [`DeviceError`]: fatal. The device or a renderer-lifetime resource is unusable.
//! - [`SurfaceError`]: recoverable. The presentable images must be rebuilt.
//! - [`ContractViolation`]: a programming error on the caller's side. The operation
//!   is rejected and no engine state is modified.
//!
//! [`RenderError`] wraps all of them for the engine-level API.

use crate::renderer::api::{DescriptorHandle, DescriptorKind, FenceId, FenceValue};
use crate::renderer::recorder::RecorderState;
use std::fmt;

/// An unrecoverable failure of the device or of a renderer-lifetime resource.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The device was lost (driver reset, GPU hang, removal).
    DeviceLost(String),
    /// A fence wait exceeded the configured bound.
    FenceTimeout {
        /// The fence being waited on.
        fence: FenceId,
        /// The value that was awaited.
        value: FenceValue,
        /// The fence's completed value when the wait gave up.
        completed: FenceValue,
        /// The bound that was exceeded, in milliseconds.
        timeout_ms: u64,
    },
    /// A descriptor table has no free slot left.
    DescriptorTableExhausted {
        /// The exhausted table.
        kind: DescriptorKind,
        /// The table's fixed capacity.
        capacity: u32,
    },
    /// The device rejected a submission.
    SubmissionRejected(String),
    /// The device could not allocate memory for a resource.
    OutOfMemory(String),
    /// A handle did not name a live backend object.
    ResourceNotFound(String),
    /// Any other backend-specific failure.
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::DeviceLost(reason) => write!(f, "The graphics device was lost: {reason}"),
            DeviceError::FenceTimeout {
                fence,
                value,
                completed,
                timeout_ms,
            } => write!(
                f,
                "Wait on {fence:?} for value {value} timed out after {timeout_ms} ms (completed: {completed})"
            ),
            DeviceError::DescriptorTableExhausted { kind, capacity } => write!(
                f,
                "Descriptor table '{kind}' is exhausted (capacity {capacity})"
            ),
            DeviceError::SubmissionRejected(msg) => write!(f, "Submission rejected: {msg}"),
            DeviceError::OutOfMemory(msg) => write!(f, "Out of device memory: {msg}"),
            DeviceError::ResourceNotFound(msg) => write!(f, "Resource not found: {msg}"),
            DeviceError::Backend(msg) => write!(f, "Backend error: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// A failure of the presentation surface that a rebuild of the presentable images can fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The surface no longer matches the window and must be reconfigured.
    OutOfDate,
    /// The surface was lost and must be recreated.
    Lost,
    /// No presentable image became available in time.
    Timeout,
    /// The surface cannot be configured with a zero-sized extent.
    ZeroSized {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// The surface could not be rebuilt within the allowed number of attempts.
    RecreationFailed {
        /// The number of attempts made.
        attempts: u32,
    },
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceError::OutOfDate => write!(f, "The surface is out of date"),
            SurfaceError::Lost => write!(f, "The surface was lost"),
            SurfaceError::Timeout => write!(f, "Timed out acquiring a presentable image"),
            SurfaceError::ZeroSized { width, height } => {
                write!(f, "Cannot configure a {width}x{height} surface")
            }
            SurfaceError::RecreationFailed { attempts } => {
                write!(f, "Surface recreation failed after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for SurfaceError {}

/// A caller broke an API contract. The offending call had no effect.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    /// The handle's slot is not currently allocated.
    DoubleFree(DescriptorHandle),
    /// The handle was issued by a different allocator.
    ForeignHandle(DescriptorHandle),
    /// The handle's slot was freed and may have been handed out again.
    StaleHandle(DescriptorHandle),
    /// A binding was written into a table of a different kind.
    DescriptorKindMismatch {
        /// The handle being written.
        handle: DescriptorHandle,
        /// The kind of the binding.
        binding: DescriptorKind,
    },
    /// `begin_recording` was called on a recorder that is not idle.
    ReentrantRecording {
        /// The recorder's label.
        label: String,
        /// The state the recorder was in.
        state: RecorderState,
    },
    /// `end_recording` was called on a recorder that is not recording.
    NotRecording {
        /// The recorder's label.
        label: String,
        /// The state the recorder was in.
        state: RecorderState,
    },
    /// `submit` was called on a recorder that was not closed.
    SubmitUnclosed {
        /// The recorder's label.
        label: String,
        /// The state the recorder was in.
        state: RecorderState,
    },
    /// A wait targeted a fence value that was never signaled.
    WaitOnUnsignaledValue {
        /// The awaited value.
        value: FenceValue,
        /// The highest value signaled so far.
        last_signaled: FenceValue,
    },
    /// `begin_frame` was called while a frame was already being recorded.
    FrameAlreadyInProgress,
    /// A frame-scoped call was made outside `begin_frame` / `end_frame`.
    NoFrameInProgress,
    /// The engine was already shut down.
    EngineShutDown,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::DoubleFree(handle) => {
                write!(f, "Descriptor {handle} was freed twice")
            }
            ContractViolation::ForeignHandle(handle) => {
                write!(f, "Descriptor {handle} belongs to another allocator")
            }
            ContractViolation::StaleHandle(handle) => {
                write!(f, "Descriptor {handle} is not allocated")
            }
            ContractViolation::DescriptorKindMismatch { handle, binding } => write!(
                f,
                "Cannot write a {binding} binding into descriptor {handle}"
            ),
            ContractViolation::ReentrantRecording { label, state } => write!(
                f,
                "Recorder '{label}' cannot begin recording while {state:?}"
            ),
            ContractViolation::NotRecording { label, state } => {
                write!(f, "Recorder '{label}' is not recording (state: {state:?})")
            }
            ContractViolation::SubmitUnclosed { label, state } => write!(
                f,
                "Recorder '{label}' must be closed before submission (state: {state:?})"
            ),
            ContractViolation::WaitOnUnsignaledValue {
                value,
                last_signaled,
            } => write!(
                f,
                "Wait on fence value {value} which was never signaled (last signaled: {last_signaled})"
            ),
            ContractViolation::FrameAlreadyInProgress => {
                write!(f, "begin_frame called while a frame is in progress")
            }
            ContractViolation::NoFrameInProgress => write!(f, "No frame is in progress"),
            ContractViolation::EngineShutDown => write!(f, "The engine has been shut down"),
        }
    }
}

impl std::error::Error for ContractViolation {}

/// A failure of the upload path.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferError {
    /// The device failed while staging or copying.
    Device(DeviceError),
    /// The request itself cannot be satisfied (bad sizes, out-of-bounds region).
    InvalidRequest(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Device(err) => write!(f, "Upload failed: {err}"),
            TransferError::InvalidRequest(msg) => write!(f, "Invalid upload request: {msg}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Device(err) => Some(err),
            TransferError::InvalidRequest(_) => None,
        }
    }
}

impl From<DeviceError> for TransferError {
    fn from(err: DeviceError) -> Self {
        TransferError::Device(err)
    }
}

/// The engine-level error type.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// See [`DeviceError`].
    Device(DeviceError),
    /// See [`SurfaceError`].
    Surface(SurfaceError),
    /// See [`ContractViolation`].
    Contract(ContractViolation),
    /// See [`TransferError`].
    Transfer(TransferError),
    /// The engine configuration was rejected.
    InvalidConfiguration(String),
}

impl RenderError {
    /// Returns `true` if the engine cannot continue and must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::Device(_) | RenderError::Transfer(TransferError::Device(_))
        )
    }

    /// Returns `true` if rebuilding the surface lets rendering resume.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::Surface(_))
    }

    /// Returns `true` if the device was lost, wherever the loss was observed.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            RenderError::Device(DeviceError::DeviceLost(_))
                | RenderError::Transfer(TransferError::Device(DeviceError::DeviceLost(_)))
        )
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Device(err) => write!(f, "Fatal device error: {err}"),
            RenderError::Surface(err) => write!(f, "Surface error: {err}"),
            RenderError::Contract(err) => write!(f, "Contract violation: {err}"),
            RenderError::Transfer(err) => write!(f, "Transfer error: {err}"),
            RenderError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Device(err) => Some(err),
            RenderError::Surface(err) => Some(err),
            RenderError::Contract(err) => Some(err),
            RenderError::Transfer(err) => Some(err),
            RenderError::InvalidConfiguration(_) => None,
        }
    }
}

impl From<DeviceError> for RenderError {
    fn from(err: DeviceError) -> Self {
        RenderError::Device(err)
    }
}

impl From<SurfaceError> for RenderError {
    fn from(err: SurfaceError) -> Self {
        RenderError::Surface(err)
    }
}

impl From<ContractViolation> for RenderError {
    fn from(err: ContractViolation) -> Self {
        RenderError::Contract(err)
    }
}

impl From<TransferError> for RenderError {
    fn from(err: TransferError) -> Self {
        RenderError::Transfer(err)
    }
}
