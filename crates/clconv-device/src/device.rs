// SPDX-License-Identifier: AGPL-3.0-only

//! Device handle: the discovered device plus its one built program

use std::path::Path;
use std::sync::Arc;

use crate::backend::{ComputeBackend, DeviceInfo, MemAccess, ProgramId, QueueProperties};
use crate::buffer::{Buffer, Ownership};
use crate::error::{DeviceError, Result};
use crate::kernel::KernelHandle;
use crate::program::ProgramImage;
use crate::queue::CommandQueue;

/// A program built for the device
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    image: ProgramImage,
    entry_points: Vec<String>,
}

impl Program {
    /// Backend id
    #[must_use]
    pub const fn id(&self) -> ProgramId {
        self.id
    }

    /// Image the program was built from
    #[must_use]
    pub const fn image(&self) -> &ProgramImage {
        &self.image
    }

    /// Entry point names
    #[must_use]
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    /// True if the program exposes `name`
    #[must_use]
    pub fn has_entry_point(&self, name: &str) -> bool {
        self.entry_points.iter().any(|e| e == name)
    }
}

/// The compute device and the process-wide program built for it
#[derive(Debug)]
pub struct DeviceHandle {
    backend: Arc<dyn ComputeBackend>,
    info: DeviceInfo,
    program: Program,
}

impl DeviceHandle {
    /// Discover the device, load the image at `program_path` and build it
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no device is found or the image is
    /// missing, malformed or fails to build.
    pub fn initialize(backend: Arc<dyn ComputeBackend>, program_path: &Path) -> Result<Self> {
        tracing::info!("Loading program image {}", program_path.display());
        let image = ProgramImage::load(program_path)?;
        Self::with_image(backend, image)
    }

    /// Discover the device and build an already-loaded image
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no device is found or the build fails.
    pub fn with_image(backend: Arc<dyn ComputeBackend>, image: ProgramImage) -> Result<Self> {
        tracing::info!("Discovering {} devices...", backend.backend_type());

        let devices = backend.devices()?;
        let info = devices
            .into_iter()
            .next()
            .ok_or(DeviceError::NoDevicesFound)?;

        tracing::info!(
            "Using device {}: {} ({}, max work-group {})",
            info.id.raw(),
            info.name,
            info.vendor,
            info.max_work_group_size
        );

        let id = backend.build_program(info.id, image.bytes())?;
        let entry_points = backend.entry_points(id)?;

        tracing::info!(
            "Built program ({} bytes, {} entry points: {})",
            image.len(),
            entry_points.len(),
            entry_points.join(", ")
        );

        Ok(Self {
            backend,
            info,
            program: Program {
                id,
                image,
                entry_points,
            },
        })
    }

    /// Device information
    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Built program
    #[must_use]
    pub const fn program(&self) -> &Program {
        &self.program
    }

    /// Backend the device lives on
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    /// Create an in-order queue on the device
    ///
    /// # Errors
    ///
    /// Returns error if the queue cannot be allocated.
    pub fn create_queue(&self, properties: QueueProperties) -> Result<CommandQueue> {
        CommandQueue::create(Arc::clone(&self.backend), self.info.id, properties)
    }

    /// Allocate an uninitialised buffer of `len` elements
    ///
    /// # Errors
    ///
    /// Returns error if allocation fails.
    pub fn create_buffer(&self, len: usize, access: MemAccess, ownership: Ownership) -> Result<Buffer> {
        Buffer::create(Arc::clone(&self.backend), len, access, ownership)
    }

    /// Create a kernel handle for a named entry point of the program
    ///
    /// # Errors
    ///
    /// Returns `KernelNotFound` if the program does not expose `name`.
    pub fn create_kernel(&self, name: &str) -> Result<KernelHandle> {
        if !self.program.has_entry_point(name) {
            return Err(DeviceError::kernel_not_found(name));
        }

        let id = self.backend.create_kernel(self.program.id, name)?;
        tracing::debug!("Created kernel {name} ({})", id.raw());
        Ok(KernelHandle::new(Arc::clone(&self.backend), id, name))
    }
}
