// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for device operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Coarse classification of failures.
///
/// Callers use it to choose between terminating (configuration and resource
/// failures) and answering with a client error (input validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or broken program image, missing entry point, no device
    Configuration,

    /// Buffer, queue, binding, dispatch or transfer failure
    Resource,

    /// Malformed request payload
    InputValidation,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Resource => write!(f, "resource"),
            Self::InputValidation => write!(f, "input validation"),
        }
    }
}

/// Errors that can occur during device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The backend reported no compute devices
    #[error("No compute devices detected")]
    NoDevicesFound,

    /// Program image missing at the expected path
    #[error("Program image not found: {path}")]
    ProgramNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Program image could not be decoded
    #[error("Invalid program image: {reason}")]
    InvalidProgram {
        /// Reason for failure
        reason: String,
    },

    /// Program image decoded but failed to build for the device
    #[error("Program build failed: {reason}")]
    BuildFailed {
        /// Reason for failure
        reason: String,
    },

    /// Entry point absent from the built program
    #[error("Kernel entry point not found: {name}")]
    KernelNotFound {
        /// Requested entry point
        name: String,
    },

    /// I/O error while reading the program image
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Buffer or queue allocation failed
    #[error("Allocation failed: {reason}")]
    AllocationFailed {
        /// Reason for failure
        reason: String,
    },

    /// Argument binding or launch geometry rejected
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for failure
        reason: String,
    },

    /// Kernel launch failed
    #[error("Dispatch failed: {reason}")]
    DispatchFailed {
        /// Reason for failure
        reason: String,
    },

    /// Host/device transfer failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Object used in an invalid state (released queue, poisoned lock, ...)
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },
}

impl DeviceError {
    /// Create an invalid program error
    pub fn invalid_program(reason: impl Into<String>) -> Self {
        Self::InvalidProgram {
            reason: reason.into(),
        }
    }

    /// Create a build failed error
    pub fn build_failed(reason: impl Into<String>) -> Self {
        Self::BuildFailed {
            reason: reason.into(),
        }
    }

    /// Create a kernel not found error
    pub fn kernel_not_found(name: impl Into<String>) -> Self {
        Self::KernelNotFound { name: name.into() }
    }

    /// Create an allocation failed error
    pub fn allocation_failed(reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a dispatch failed error
    pub fn dispatch_failed(reason: impl Into<String>) -> Self {
        Self::DispatchFailed {
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Classify the error
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NoDevicesFound
            | Self::ProgramNotFound { .. }
            | Self::InvalidProgram { .. }
            | Self::BuildFailed { .. }
            | Self::KernelNotFound { .. }
            | Self::Io { .. } => ErrorCategory::Configuration,
            Self::AllocationFailed { .. }
            | Self::InvalidArgument { .. }
            | Self::DispatchFailed { .. }
            | Self::TransferFailed { .. }
            | Self::InvalidState { .. } => ErrorCategory::Resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        assert_eq!(
            DeviceError::kernel_not_found("forwardNaive").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            DeviceError::ProgramNotFound {
                path: PathBuf::from("kernel_file.aocx")
            }
            .category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn resource_errors_are_classified() {
        assert_eq!(
            DeviceError::dispatch_failed("launch").category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            DeviceError::transfer_failed("read").category(),
            ErrorCategory::Resource
        );
    }
}
