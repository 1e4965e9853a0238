// SPDX-License-Identifier: AGPL-3.0-only

//! Device buffers
//!
//! A [`Buffer`] owns one block of device memory and releases it on drop.
//! Size and access mode are fixed at creation.

use crate::backend::{BufferId, ComputeBackend, MemAccess};
use crate::error::{DeviceError, Result};
use std::sync::Arc;

/// Width of one element in bytes (all tensors are `f32`)
pub const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();

/// Who a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created once, shared by every session, destroyed at teardown
    Persistent,

    /// Created and released within one inference request
    Session,
}

/// Device memory handle
#[derive(Debug)]
pub struct Buffer {
    backend: Arc<dyn ComputeBackend>,
    id: BufferId,
    size_bytes: usize,
    access: MemAccess,
    ownership: Ownership,
}

impl Buffer {
    /// Allocate a buffer holding `len` elements
    pub(crate) fn create(
        backend: Arc<dyn ComputeBackend>,
        len: usize,
        access: MemAccess,
        ownership: Ownership,
    ) -> Result<Self> {
        let size_bytes = len.checked_mul(ELEMENT_BYTES).ok_or_else(|| {
            DeviceError::allocation_failed(format!("{len} elements overflow a byte size"))
        })?;

        let id = backend.create_buffer(size_bytes, access)?;
        tracing::trace!("Allocated {ownership:?} buffer {} ({size_bytes} bytes)", id.raw());

        Ok(Self {
            backend,
            id,
            size_bytes,
            access,
            ownership,
        })
    }

    /// Backend id
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of `f32` elements
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size_bytes / ELEMENT_BYTES
    }

    /// True if the buffer holds no elements
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    /// Access mode
    #[must_use]
    pub const fn access(&self) -> MemAccess {
        self.access
    }

    /// Ownership tag
    #[must_use]
    pub const fn ownership(&self) -> Ownership {
        self.ownership
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Err(e) = self.backend.release_buffer(self.id) {
            tracing::warn!("Failed to release buffer {}: {e}", self.id.raw());
        }
    }
}
