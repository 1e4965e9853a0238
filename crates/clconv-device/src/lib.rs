// SPDX-License-Identifier: AGPL-3.0-only

//! Device layer for the clconv inference pipeline.
//!
//! Wraps a command-queue / kernel-dispatch compute API behind owned,
//! lifetime-checked handles: device memory is released on drop, queues
//! are drained before release, and kernel argument slots are bound under
//! a per-kernel lock.
//!
//! # Layout
//!
//! ```text
//! ComputeBackend (trait)      raw ids, one implementation per runtime
//!   └── SoftwareBackend       host-simulated device + reference kernels
//! DeviceHandle                first device + the one built program
//!   ├── CommandQueue / Event  in-order queue, completion markers
//!   ├── Buffer                owned device memory (Persistent | Session)
//!   └── KernelHandle          entry point + KernelArgs binding
//! ```
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use clconv_device::prelude::*;
//! use clconv_device::backends::software::standard_program;
//!
//! # fn main() -> clconv_device::Result<()> {
//! let device = DeviceHandle::with_image(
//!     Arc::new(SoftwareBackend::new()),
//!     ProgramImage::from_bytes(standard_program())?,
//! )?;
//! let queue = device.create_queue(QueueProperties::default())?;
//!
//! let mut input = device.create_buffer(4, MemAccess::ReadWrite, Ownership::Session)?;
//! let mut output = device.create_buffer(4, MemAccess::ReadWrite, Ownership::Session)?;
//! queue.write(&mut input, &[0.0, 0.5, -0.5, 1.0])?;
//!
//! let tanh = device.create_kernel("forwardNaive")?;
//! let done = tanh.dispatch(
//!     &queue,
//!     KernelArgs::new().output(&mut output).input(&input),
//!     NdRange::new(4, 4),
//!     &[],
//! )?;
//! let values = queue.read(&output, &[done])?;
//! assert_eq!(values[0], 0.0);
//! queue.release()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod buffer;
mod device;
mod error;
mod kernel;
mod program;
mod queue;

pub use backend::{
    BackendType, BufferId, ComputeBackend, DeviceId, DeviceInfo, EventId, KernelArg, KernelId,
    MemAccess, NdRange, ProgramId, QueueId, QueueProperties,
};
pub use backends::reference_kernels::{ConvGeometry, CONVOLVE, FORWARD_NAIVE, REPEATED_ADD};
pub use backends::software::{pack_software_program, standard_program, SoftwareBackend};
pub use buffer::{Buffer, Ownership, ELEMENT_BYTES};
pub use device::{DeviceHandle, Program};
pub use error::{DeviceError, ErrorCategory, Result};
pub use kernel::{KernelArgs, KernelHandle};
pub use program::{ProgramImage, DEFAULT_PROGRAM_PATH};
pub use queue::{CommandQueue, Event};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Buffer, CommandQueue, ComputeBackend, DeviceError, DeviceHandle, ErrorCategory, Event,
        KernelArgs, KernelHandle, MemAccess, NdRange, Ownership, ProgramImage, QueueProperties,
        Result, SoftwareBackend,
    };
}
