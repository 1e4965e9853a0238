// SPDX-License-Identifier: AGPL-3.0-only

//! Pipeline configuration and network geometry

use crate::error::{PipelineError, Result};
use clconv_device::{ConvGeometry, NdRange, DEFAULT_PROGRAM_PATH};
use std::path::PathBuf;
use std::str::FromStr;

/// Elements in one request input (one 32×32 plane)
pub const INPUT_LEN: usize = 1024;

/// Elements in one inference result
pub const OUTPUT_LEN: usize = 8;

/// Default directory holding the weight files
pub const DEFAULT_WEIGHTS_DIR: &str = "txt";

/// How consecutive dispatches are ordered on the session queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Full queue drain before and after every dispatch
    #[default]
    Drain,

    /// Each consumer waits on the completion event of its producer
    Events,
}

impl FromStr for SyncMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "events" => Ok(Self::Events),
            other => Err(PipelineError::config(format!(
                "unknown sync mode {other:?} (expected drain or events)"
            ))),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drain => f.pad("drain"),
            Self::Events => f.pad("events"),
        }
    }
}

/// Where the bias broadcast-add runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcastMode {
    /// Read back, add on the host, write back
    #[default]
    Host,

    /// Dispatch the `repeated_add` kernel
    Device,
}

impl FromStr for BroadcastMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "device" => Ok(Self::Device),
            other => Err(PipelineError::config(format!(
                "unknown broadcast mode {other:?} (expected host or device)"
            ))),
        }
    }
}

impl std::fmt::Display for BroadcastMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => f.pad("host"),
            Self::Device => f.pad("device"),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Device program image
    pub program_path: PathBuf,

    /// Dispatch ordering
    pub sync_mode: SyncMode,

    /// Bias broadcast-add placement
    pub broadcast_mode: BroadcastMode,

    /// Reject weight tensors whose length differs from [`LayerSpec`] at
    /// upload instead of at the first dispatch
    pub check_weight_shapes: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            program_path: PathBuf::from(DEFAULT_PROGRAM_PATH),
            sync_mode: SyncMode::default(),
            broadcast_mode: BroadcastMode::default(),
            check_weight_shapes: false,
        }
    }
}

impl PipelineConfig {
    /// Set the program image path
    #[must_use]
    pub fn with_program_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.program_path = path.into();
        self
    }

    /// Set the dispatch ordering
    #[must_use]
    pub const fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Set the broadcast-add placement
    #[must_use]
    pub const fn with_broadcast_mode(mut self, mode: BroadcastMode) -> Self {
        self.broadcast_mode = mode;
        self
    }

    /// Enable or disable the upload-time weight length check
    #[must_use]
    pub const fn with_weight_shape_check(mut self, enabled: bool) -> Self {
        self.check_weight_shapes = enabled;
        self
    }
}

/// One convolution layer followed by its bias broadcast-add
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    /// Short name used in logs
    pub name: &'static str,

    /// Value of the convolution kernel's layer flag
    pub flag: i32,

    /// Kernel geometry selected by `flag`
    pub geometry: ConvGeometry,

    /// Convolution launch
    pub conv_range: NdRange,

    /// Bias channels (broadcast source size)
    pub channels: usize,

    /// Consecutive output elements sharing one bias value
    pub repeat_size: usize,

    /// `repeated_add` launch when the add runs on the device
    pub bias_range: NdRange,
}

impl LayerSpec {
    /// conv1: 1024 → 8192, bias per 1024-element plane
    pub const FIRST: Self = Self {
        name: "conv1",
        flag: 1,
        geometry: ConvGeometry::FIRST,
        conv_range: NdRange::new(8192, 1024),
        channels: 8,
        repeat_size: 1024,
        bias_range: NdRange::new(8192, 1024),
    };

    /// conv2: 8192 → 8, one bias per output
    pub const SECOND: Self = Self {
        name: "conv2",
        flag: 0,
        geometry: ConvGeometry::SECOND,
        conv_range: NdRange::new(8, 8),
        channels: 8,
        repeat_size: 1,
        bias_range: NdRange::new(8, 8),
    };

    /// Convolution output elements
    pub const fn output_len(&self) -> usize {
        self.geometry.output_len()
    }

    /// Filter weight elements
    pub const fn weights_len(&self) -> usize {
        self.geometry.weights_len()
    }
}

/// Activation launch over the conv1 output
pub const ACTIVATION_RANGE: NdRange = NdRange::new(8192, 1024);
