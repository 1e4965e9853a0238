// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel handles resolved once from the shared program

use crate::config::BroadcastMode;
use crate::error::Result;
use clconv_device::{DeviceError, DeviceHandle, KernelHandle, CONVOLVE, FORWARD_NAIVE, REPEATED_ADD};
use tracing::debug;

/// The three inference entry points
///
/// One convolution handle serves both layers; every dispatch rebinds all
/// of its arguments, including the layer flag.
#[derive(Debug)]
pub struct KernelRegistry {
    convolution: KernelHandle,
    activation: KernelHandle,
    broadcast: Option<KernelHandle>,
}

impl KernelRegistry {
    /// Resolve one entry point
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the program does not expose `name`.
    pub fn resolve(device: &DeviceHandle, name: &str) -> Result<KernelHandle> {
        let kernel = device.create_kernel(name)?;
        debug!("Resolved kernel {name}");
        Ok(kernel)
    }

    /// Resolve the kernels the configured pipeline needs
    ///
    /// `repeated_add` is only required when the broadcast-add runs on the
    /// device.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required entry point is missing.
    pub fn initialize(device: &DeviceHandle, broadcast_mode: BroadcastMode) -> Result<Self> {
        let convolution = Self::resolve(device, CONVOLVE)?;
        let activation = Self::resolve(device, FORWARD_NAIVE)?;
        let broadcast = match broadcast_mode {
            BroadcastMode::Device => Some(Self::resolve(device, REPEATED_ADD)?),
            BroadcastMode::Host => None,
        };

        Ok(Self {
            convolution,
            activation,
            broadcast,
        })
    }

    /// `convolve_imagecubes_float2`
    pub const fn convolution(&self) -> &KernelHandle {
        &self.convolution
    }

    /// `forwardNaive`
    pub const fn activation(&self) -> &KernelHandle {
        &self.activation
    }

    /// `repeated_add`
    ///
    /// # Errors
    ///
    /// Returns `KernelNotFound` if the registry was built for host-side
    /// broadcast.
    pub fn broadcast(&self) -> Result<&KernelHandle> {
        self.broadcast
            .as_ref()
            .ok_or_else(|| DeviceError::kernel_not_found(REPEATED_ADD).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clconv_device::{pack_software_program, standard_program, ProgramImage, SoftwareBackend};
    use std::sync::Arc;

    fn device(image: Vec<u8>) -> DeviceHandle {
        DeviceHandle::with_image(
            Arc::new(SoftwareBackend::new()),
            ProgramImage::from_bytes(image).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn host_mode_skips_repeated_add() {
        let device = device(pack_software_program(&[CONVOLVE, FORWARD_NAIVE]));
        let registry = KernelRegistry::initialize(&device, BroadcastMode::Host).unwrap();
        assert_eq!(registry.convolution().name(), CONVOLVE);
        assert_eq!(registry.activation().name(), FORWARD_NAIVE);
        assert!(registry.broadcast().is_err());
    }

    #[test]
    fn device_mode_requires_repeated_add() {
        let device = device(pack_software_program(&[CONVOLVE, FORWARD_NAIVE]));
        let err = KernelRegistry::initialize(&device, BroadcastMode::Device).unwrap_err();
        assert_eq!(err.category(), clconv_device::ErrorCategory::Configuration);
    }

    #[test]
    fn device_mode_resolves_all_three() {
        let device = device(standard_program());
        let registry = KernelRegistry::initialize(&device, BroadcastMode::Device).unwrap();
        assert_eq!(registry.broadcast().unwrap().name(), REPEATED_ADD);
    }
}
