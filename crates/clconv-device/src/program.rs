// SPDX-License-Identifier: AGPL-3.0-only

//! Device program images
//!
//! The image is an opaque precompiled binary. This module only reads it
//! and records where it came from; decoding and building is the backend's
//! business.

use crate::error::{DeviceError, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the program image, relative to the working directory
pub const DEFAULT_PROGRAM_PATH: &str = "./kernel_file.aocx";

/// Raw program binary ready to be built
#[derive(Debug, Clone)]
pub struct ProgramImage {
    data: Bytes,
    source: Option<PathBuf>,
    checksum: u32,
}

impl ProgramImage {
    /// Read the image from disk
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable or empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeviceError::ProgramNotFound {
                path: path.to_path_buf(),
            });
        }

        let data = std::fs::read(path)?;
        let mut image = Self::from_bytes(data)?;
        image.source = Some(path.to_path_buf());
        Ok(image)
    }

    /// Wrap an in-memory image
    ///
    /// # Errors
    ///
    /// Returns error if the image is empty.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(DeviceError::invalid_program("image is empty"));
        }

        let checksum = data
            .iter()
            .fold(0u32, |acc, &byte| acc.wrapping_add(u32::from(byte)));

        debug!("Program image: {} bytes, checksum 0x{checksum:08x}", data.len());

        Ok(Self {
            data,
            source: None,
            checksum,
        })
    }

    /// Image bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the image is empty (never, once constructed)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File the image was read from, if any
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Additive byte checksum, logged for identification
    #[must_use]
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_program_not_found() {
        let err = ProgramImage::load("/nonexistent/kernel_file.aocx").unwrap_err();
        assert!(matches!(err, DeviceError::ProgramNotFound { .. }));
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = ProgramImage::from_bytes(Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidProgram { .. }));
    }

    #[test]
    fn load_records_source_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel_file.aocx");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let image = ProgramImage::load(&path).unwrap();
        assert_eq!(image.len(), 3);
        assert_eq!(image.checksum(), 6);
        assert_eq!(image.source(), Some(path.as_path()));
    }
}
