// SPDX-License-Identifier: AGPL-3.0-only

//! Accelerator-resident inference pipeline for a fixed two-layer
//! convolutional network.
//!
//! # Lifecycle
//!
//! ```text
//! once per process          AcceleratorContext
//!                             ├── DeviceHandle        (device + program)
//!                             ├── PersistentWeightStore (4 read-only buffers)
//!                             └── KernelRegistry      (conv, tanh, [add])
//! once per request          InferenceSession          (queue + SessionBuffers)
//!                             └── ForwardPipeline      conv → add → tanh → conv → add
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use clconv_device::{standard_program, ProgramImage, SoftwareBackend};
//! use clconv_pipeline::{AcceleratorContext, InMemoryWeights, PipelineConfig, INPUT_LEN};
//!
//! # fn main() -> clconv_pipeline::Result<()> {
//! let context = AcceleratorContext::with_image(
//!     Arc::new(SoftwareBackend::new()),
//!     ProgramImage::from_bytes(standard_program())?,
//!     PipelineConfig::default(),
//!     &InMemoryWeights::zero_filters(vec![0.0; 8], vec![0.5; 8]),
//! )?;
//!
//! let output = context.infer(&[0.0; INPUT_LEN])?;
//! assert_eq!(output, vec![0.5; 8]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod config;
mod context;
mod error;
pub mod floats;
mod pipeline;
mod registry;
mod session;
pub mod stages;
mod weights;

pub use config::{
    BroadcastMode, LayerSpec, PipelineConfig, SyncMode, ACTIVATION_RANGE, DEFAULT_WEIGHTS_DIR,
    INPUT_LEN, OUTPUT_LEN,
};
pub use context::{AcceleratorContext, ContextCell};
pub use error::{PipelineError, Result};
pub use floats::{floats_from_file, floats_to_file, parse_floats, to_scientific_csv};
pub use pipeline::ForwardPipeline;
pub use registry::KernelRegistry;
pub use session::{InferenceSession, SessionBuffer};
pub use stages::{broadcast_add, ActivationStage, AddOutcome, BroadcastAddStage, ConvolutionStage, Staged};
pub use weights::{DirectoryWeights, InMemoryWeights, PersistentWeightStore, WeightSource, WeightTensor};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AcceleratorContext, BroadcastMode, ContextCell, DirectoryWeights, ForwardPipeline,
        InMemoryWeights, PipelineConfig, PipelineError, Result, SyncMode, WeightSource,
    };
}
