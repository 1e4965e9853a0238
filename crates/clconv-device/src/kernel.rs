// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel handles and per-dispatch argument lists
//!
//! A device kernel object carries a single mutable argument slot. Two
//! sessions binding the same handle concurrently would race on that slot,
//! so [`KernelHandle::dispatch`] holds a per-handle lock across
//! bind + enqueue. The backend captures the arguments at enqueue time,
//! after which the slot may be rebound.

use crate::backend::{ComputeBackend, KernelArg, KernelId, NdRange};
use crate::buffer::Buffer;
use crate::error::{DeviceError, Result};
use crate::queue::{CommandQueue, Event};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// Positional argument list for one dispatch
///
/// Buffers are borrowed for the lifetime of the list; output buffers are
/// borrowed mutably so a shared (`&Buffer`) persistent buffer can never be
/// bound as a kernel destination.
#[derive(Debug, Default)]
pub struct KernelArgs<'a> {
    args: Vec<KernelArg>,
    _buffers: PhantomData<&'a mut Buffer>,
}

impl<'a> KernelArgs<'a> {
    /// Empty argument list
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            _buffers: PhantomData,
        }
    }

    /// Append an `i32` scalar
    #[must_use]
    pub fn int(mut self, value: i32) -> Self {
        self.args.push(KernelArg::Int(value));
        self
    }

    /// Append a buffer the kernel reads
    #[must_use]
    pub fn input(mut self, buffer: &'a Buffer) -> Self {
        self.args.push(KernelArg::Buffer(buffer.id()));
        self
    }

    /// Append a buffer the kernel writes
    #[must_use]
    pub fn output(mut self, buffer: &'a mut Buffer) -> Self {
        self.args.push(KernelArg::Buffer(buffer.id()));
        self
    }

    /// Arguments in positional order
    pub fn as_slice(&self) -> &[KernelArg] {
        &self.args
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True if no argument has been appended
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Reusable handle to one kernel entry point
#[derive(Debug)]
pub struct KernelHandle {
    backend: Arc<dyn ComputeBackend>,
    id: KernelId,
    name: String,
    launch: Mutex<()>,
}

impl KernelHandle {
    pub(crate) fn new(backend: Arc<dyn ComputeBackend>, id: KernelId, name: &str) -> Self {
        Self {
            backend,
            id,
            name: name.to_string(),
            launch: Mutex::new(()),
        }
    }

    /// Entry point name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend id
    #[must_use]
    pub const fn id(&self) -> KernelId {
        self.id
    }

    /// Bind `args` and enqueue one launch on `queue`
    ///
    /// Every argument is rebound; nothing from a previous dispatch carries
    /// over. The launch starts only after every event in `wait` completed.
    ///
    /// # Errors
    ///
    /// Returns error if binding or enqueueing fails.
    pub fn dispatch(
        &self,
        queue: &CommandQueue,
        args: KernelArgs<'_>,
        range: NdRange,
        wait: &[Event],
    ) -> Result<Event> {
        let _bound = self
            .launch
            .lock()
            .map_err(|_| DeviceError::invalid_state(format!("kernel {} lock poisoned", self.name)))?;

        self.backend.set_kernel_args(self.id, args.as_slice())?;
        let event = queue.enqueue_kernel(self.id, range, wait)?;

        tracing::trace!(
            "Dispatched {} ({} args, global {}, local {})",
            self.name,
            args.len(),
            range.global,
            range.local
        );
        Ok(event)
    }
}
