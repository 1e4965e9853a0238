// SPDX-License-Identifier: AGPL-3.0-only

//! Backend abstraction for compute devices
//!
//! The trait mirrors a command-queue / kernel-dispatch API: programs are
//! built from opaque binaries, kernels carry an argument slot that is
//! overwritten on every bind, and queues execute launches in order,
//! asynchronously to the host, until drained.
//!
//! Handles crossing this seam are plain ids. Ownership and lifetimes are
//! enforced one level up by [`Buffer`](crate::Buffer),
//! [`CommandQueue`](crate::CommandQueue) and
//! [`KernelHandle`](crate::KernelHandle).

use crate::error::Result;
use std::fmt::Debug;

macro_rules! handle_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw backend id
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw backend id
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle_id!(
    /// Device identifier reported by discovery
    DeviceId
);
handle_id!(
    /// Built program identifier
    ProgramId
);
handle_id!(
    /// Kernel object identifier
    KernelId
);
handle_id!(
    /// Command queue identifier
    QueueId
);
handle_id!(
    /// Device memory identifier
    BufferId
);
handle_id!(
    /// Completion event identifier
    EventId
);

/// Information about a discovered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device id
    pub id: DeviceId,

    /// Human-readable device name
    pub name: String,

    /// Vendor string
    pub vendor: String,

    /// Largest local work-group size accepted by a launch
    pub max_work_group_size: usize,

    /// Global memory available for buffers (bytes)
    pub global_mem_bytes: usize,
}

/// Kernel access capability of a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    /// Kernels only read the buffer
    ReadOnly,

    /// Kernels only write the buffer
    WriteOnly,

    /// Kernels read and write the buffer
    ReadWrite,
}

/// Properties requested when creating a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueProperties {
    /// Record per-launch execution times
    pub profiling: bool,
}

/// One positional kernel argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    /// 32-bit signed integer scalar
    Int(i32),

    /// Device buffer
    Buffer(BufferId),
}

/// One-dimensional launch geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    /// Total number of work-items
    pub global: usize,

    /// Work-items per work-group
    pub local: usize,
}

impl NdRange {
    /// Create a launch geometry
    pub const fn new(global: usize, local: usize) -> Self {
        Self { global, local }
    }

    /// Number of work-groups in the launch
    pub const fn groups(&self) -> usize {
        if self.local == 0 {
            0
        } else {
            self.global / self.local
        }
    }
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Host-simulated device, no hardware required
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "Software"),
        }
    }
}

/// Compute backend trait: the device API the pipeline is written against
pub trait ComputeBackend: Debug + Send + Sync {
    /// Backend type for debugging
    fn backend_type(&self) -> BackendType;

    /// Enumerate the devices this backend can reach
    ///
    /// # Errors
    ///
    /// Returns error if platform enumeration fails.
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Build a program from an opaque binary image for one device
    ///
    /// # Errors
    ///
    /// Returns error if the image is malformed or does not build.
    fn build_program(&self, device: DeviceId, image: &[u8]) -> Result<ProgramId>;

    /// Entry points exposed by a built program
    ///
    /// # Errors
    ///
    /// Returns error if the program id is unknown.
    fn entry_points(&self, program: ProgramId) -> Result<Vec<String>>;

    /// Create a kernel object for a named entry point
    ///
    /// # Errors
    ///
    /// Returns error if the entry point does not exist.
    fn create_kernel(&self, program: ProgramId, name: &str) -> Result<KernelId>;

    /// Overwrite the kernel's argument slot
    ///
    /// # Errors
    ///
    /// Returns error if arity or argument kinds do not match the entry point.
    fn set_kernel_args(&self, kernel: KernelId, args: &[KernelArg]) -> Result<()>;

    /// Create an in-order command queue on a device
    ///
    /// # Errors
    ///
    /// Returns error if the queue cannot be allocated.
    fn create_queue(&self, device: DeviceId, properties: QueueProperties) -> Result<QueueId>;

    /// Drain and release a queue
    ///
    /// # Errors
    ///
    /// Returns error if the queue is unknown or draining fails.
    fn release_queue(&self, queue: QueueId) -> Result<()>;

    /// Allocate device memory
    ///
    /// # Errors
    ///
    /// Returns error if the size is invalid or memory is exhausted.
    fn create_buffer(&self, size_bytes: usize, access: MemAccess) -> Result<BufferId>;

    /// Release device memory (deferred until queued launches using it complete)
    ///
    /// # Errors
    ///
    /// Returns error if the buffer is unknown.
    fn release_buffer(&self, buffer: BufferId) -> Result<()>;

    /// Blocking write of the whole buffer
    ///
    /// # Errors
    ///
    /// Returns error if the length does not match the buffer size.
    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[f32]) -> Result<()>;

    /// Blocking read of the whole buffer after `wait` has completed
    ///
    /// # Errors
    ///
    /// Returns error if the length does not match or a prior launch failed.
    fn read_buffer(
        &self,
        queue: QueueId,
        buffer: BufferId,
        wait: &[EventId],
        out: &mut [f32],
    ) -> Result<()>;

    /// Enqueue a launch using the kernel's current argument slot
    ///
    /// # Errors
    ///
    /// Returns error if the slot is incomplete or the geometry is rejected.
    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        range: NdRange,
        wait: &[EventId],
    ) -> Result<EventId>;

    /// Block until every event has completed
    ///
    /// # Errors
    ///
    /// Returns error if a launch fails while completing.
    fn wait_for_events(&self, events: &[EventId]) -> Result<()>;

    /// Block until every command in the queue has completed
    ///
    /// # Errors
    ///
    /// Returns error if a launch fails while draining.
    fn finish(&self, queue: QueueId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nd_range_groups() {
        assert_eq!(NdRange::new(8192, 1024).groups(), 8);
        assert_eq!(NdRange::new(8, 8).groups(), 1);
        assert_eq!(NdRange::new(8, 0).groups(), 0);
    }

    #[test]
    fn ids_round_trip_raw_values() {
        let id = BufferId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(BackendType::Software.to_string(), "Software");
    }
}
