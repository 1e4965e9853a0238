// SPDX-License-Identifier: AGPL-3.0-only

//! Compute backend implementations
//!
//! - **Software**: host-simulated device running the reference kernels
//!   (CI, tests, machines without an accelerator)
//!
//! Hardware runtimes plug in by implementing
//! [`ComputeBackend`](crate::ComputeBackend).

pub mod reference_kernels;
pub mod software;

pub use reference_kernels::{ConvGeometry, ReferenceKernel};
pub use software::SoftwareBackend;
