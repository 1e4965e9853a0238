// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for pipeline operations

use clconv_device::{DeviceError, ErrorCategory};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while initializing or running the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Device layer failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Float file could not be read or written
    #[error("Float file {path}: {source}")]
    FloatFile {
        /// File that was accessed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A delimited value is not a decimal float
    #[error("Value {index} is not a float: {value:?}")]
    Parse {
        /// Zero-based position among the non-empty values
        index: usize,
        /// Offending text
        value: String,
    },

    /// Weight tensor missing, unreadable or of the wrong length
    #[error("Weight tensor {tensor}: {reason}")]
    WeightFile {
        /// Tensor name
        tensor: String,
        /// Reason for failure
        reason: String,
    },

    /// Request payload rejected before any device work
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Reason for failure
        reason: String,
    },

    /// Broadcast-add parameters that would index out of range
    #[error("Invalid broadcast: {reason}")]
    InvalidBroadcast {
        /// Reason for failure
        reason: String,
    },

    /// Unknown configuration value
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },
}

impl PipelineError {
    /// Create a weight file error
    pub fn weight_file(tensor: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::WeightFile {
            tensor: tensor.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create an invalid broadcast error
    pub fn invalid_broadcast(reason: impl Into<String>) -> Self {
        Self::InvalidBroadcast {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Classify the error
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Device(e) => e.category(),
            Self::FloatFile { .. } | Self::WeightFile { .. } | Self::Config { .. } => {
                ErrorCategory::Configuration
            }
            Self::InvalidBroadcast { .. } => ErrorCategory::Resource,
            Self::Parse { .. } | Self::InvalidInput { .. } => ErrorCategory::InputValidation,
        }
    }

    /// True if the caller sent a bad request rather than hitting a fault
    pub const fn is_client_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::InputValidation)
    }
}
