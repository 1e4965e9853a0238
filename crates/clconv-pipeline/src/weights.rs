// SPDX-License-Identifier: AGPL-3.0-only

//! Persistent weight and bias buffers
//!
//! The four tensors are uploaded once per process and shared read-only by
//! every session. The store hands out `&Buffer` only; kernel outputs and
//! queue writes need `&mut Buffer`, so no session can overwrite a weight.

use crate::config::LayerSpec;
use crate::error::{PipelineError, Result};
use crate::floats::floats_from_file;
use clconv_device::{Buffer, DeviceHandle, MemAccess, Ownership, QueueProperties};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One of the four persistent tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightTensor {
    /// Layer-1 filters (8 × 5×5)
    Filters1,

    /// Layer-1 biases (one per filter)
    Biases1,

    /// Layer-2 filters (8 × 8×32×32)
    Filters2,

    /// Layer-2 biases (one per output)
    Biases2,
}

impl WeightTensor {
    /// Upload order
    pub const ALL: [Self; 4] = [Self::Filters1, Self::Biases1, Self::Filters2, Self::Biases2];

    /// File holding the tensor inside a weights directory
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Filters1 => "filters.txt",
            Self::Biases1 => "biases.txt",
            Self::Filters2 => "filters2.txt",
            Self::Biases2 => "bias2.txt",
        }
    }

    /// Element count the built-in layer geometry reads
    pub const fn expected_len(self) -> usize {
        match self {
            Self::Filters1 => LayerSpec::FIRST.weights_len(),
            Self::Biases1 => LayerSpec::FIRST.channels,
            Self::Filters2 => LayerSpec::SECOND.weights_len(),
            Self::Biases2 => LayerSpec::SECOND.channels,
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Filters1 => 0,
            Self::Biases1 => 1,
            Self::Filters2 => 2,
            Self::Biases2 => 3,
        }
    }
}

impl std::fmt::Display for WeightTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Where tensor values come from
pub trait WeightSource {
    /// Values of one tensor
    ///
    /// # Errors
    ///
    /// Returns error if the tensor cannot be produced.
    fn load(&self, tensor: WeightTensor) -> Result<Vec<f32>>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Newline-delimited weight files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryWeights {
    dir: PathBuf,
}

impl DirectoryWeights {
    /// Read tensors from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory being read
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl WeightSource for DirectoryWeights {
    fn load(&self, tensor: WeightTensor) -> Result<Vec<f32>> {
        floats_from_file(self.dir.join(tensor.file_name()), '\n')
            .map_err(|e| PipelineError::weight_file(tensor, e.to_string()))
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Tensors held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryWeights {
    tensors: HashMap<WeightTensor, Vec<f32>>,
}

impl InMemoryWeights {
    /// Build from the four tensors
    pub fn new(filters1: Vec<f32>, biases1: Vec<f32>, filters2: Vec<f32>, biases2: Vec<f32>) -> Self {
        Self::default()
            .with(WeightTensor::Filters1, filters1)
            .with(WeightTensor::Biases1, biases1)
            .with(WeightTensor::Filters2, filters2)
            .with(WeightTensor::Biases2, biases2)
    }

    /// Zero filters with the given biases
    pub fn zero_filters(biases1: Vec<f32>, biases2: Vec<f32>) -> Self {
        Self::new(
            vec![0.0; WeightTensor::Filters1.expected_len()],
            biases1,
            vec![0.0; WeightTensor::Filters2.expected_len()],
            biases2,
        )
    }

    /// Set one tensor
    #[must_use]
    pub fn with(mut self, tensor: WeightTensor, values: Vec<f32>) -> Self {
        self.tensors.insert(tensor, values);
        self
    }
}

impl WeightSource for InMemoryWeights {
    fn load(&self, tensor: WeightTensor) -> Result<Vec<f32>> {
        self.tensors
            .get(&tensor)
            .cloned()
            .ok_or_else(|| PipelineError::weight_file(tensor, "not provided"))
    }

    fn describe(&self) -> String {
        format!("{} in-memory tensors", self.tensors.len())
    }
}

/// Device-resident weight and bias buffers
///
/// Each buffer is sized to the vector it was uploaded from. Filter shapes
/// belong to the device program, so lengths are only compared with
/// [`WeightTensor::expected_len`] when the shape check is enabled.
#[derive(Debug, Default)]
pub struct PersistentWeightStore {
    slots: [Option<Buffer>; 4],
    check_shapes: bool,
}

impl PersistentWeightStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare tensor lengths with the built-in layer geometry at upload
    #[must_use]
    pub const fn with_shape_check(mut self, enabled: bool) -> Self {
        self.check_shapes = enabled;
        self
    }

    /// Upload every tensor not yet resident
    ///
    /// Slots already filled are left untouched, so calling this again never
    /// re-uploads.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a tensor is unreadable, empty or
    /// (with the shape check on) of the wrong length, a resource error if
    /// allocation or transfer fails.
    pub fn initialize(&mut self, device: &DeviceHandle, source: &dyn WeightSource) -> Result<()> {
        if self.is_initialized() {
            debug!("Weight store already resident");
            return Ok(());
        }

        info!("Uploading weights from {}", source.describe());
        let queue = device.create_queue(QueueProperties::default())?;

        for tensor in WeightTensor::ALL {
            if self.slots[tensor.slot()].is_some() {
                continue;
            }

            let values = source.load(tensor)?;
            if values.is_empty() {
                return Err(PipelineError::weight_file(tensor, "no values"));
            }
            if self.check_shapes && values.len() != tensor.expected_len() {
                return Err(PipelineError::weight_file(
                    tensor,
                    format!("{} values, expected {}", values.len(), tensor.expected_len()),
                ));
            }

            let mut buffer = device.create_buffer(values.len(), MemAccess::ReadOnly, Ownership::Persistent)?;
            queue.write(&mut buffer, &values)?;
            debug!("Uploaded {tensor} ({} values)", values.len());
            self.slots[tensor.slot()] = Some(buffer);
        }

        queue.release()?;
        Ok(())
    }

    /// True once all four tensors are resident
    pub fn is_initialized(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Shared read-only view of one tensor
    ///
    /// # Errors
    ///
    /// Returns an invalid-state error if the tensor was never uploaded.
    pub fn get(&self, tensor: WeightTensor) -> Result<&Buffer> {
        self.slots[tensor.slot()].as_ref().ok_or_else(|| {
            clconv_device::DeviceError::invalid_state(format!("weight {tensor} not resident")).into()
        })
    }
}
