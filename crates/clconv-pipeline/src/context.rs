// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide accelerator state
//!
//! Initialization is a dependency chain: device → program → weights →
//! kernels. The result is read-only and shared by every session.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::ForwardPipeline;
use crate::registry::KernelRegistry;
use crate::weights::{PersistentWeightStore, WeightSource};
use clconv_device::{ComputeBackend, DeviceHandle, ProgramImage};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::info;

/// Device, program, resident weights and resolved kernels
#[derive(Debug)]
pub struct AcceleratorContext {
    config: PipelineConfig,
    device: DeviceHandle,
    weights: PersistentWeightStore,
    kernels: KernelRegistry,
}

impl AcceleratorContext {
    /// Initialize against the program image at `config.program_path`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the device, program, weights or an
    /// entry point is unavailable, a resource error if uploads fail.
    pub fn initialize(
        backend: Arc<dyn ComputeBackend>,
        config: PipelineConfig,
        weights: &dyn WeightSource,
    ) -> Result<Self> {
        let device = DeviceHandle::initialize(backend, &config.program_path)?;
        Self::with_device(device, config, weights)
    }

    /// Initialize with an already-loaded program image
    ///
    /// # Errors
    ///
    /// Same as [`initialize`](Self::initialize), minus the image read.
    pub fn with_image(
        backend: Arc<dyn ComputeBackend>,
        image: ProgramImage,
        config: PipelineConfig,
        weights: &dyn WeightSource,
    ) -> Result<Self> {
        let device = DeviceHandle::with_image(backend, image)?;
        Self::with_device(device, config, weights)
    }

    fn with_device(device: DeviceHandle, config: PipelineConfig, source: &dyn WeightSource) -> Result<Self> {
        let mut weights = PersistentWeightStore::new().with_shape_check(config.check_weight_shapes);
        weights.initialize(&device, source)?;
        let kernels = KernelRegistry::initialize(&device, config.broadcast_mode)?;

        info!(
            "Accelerator ready: {} sync, {} broadcast-add",
            config.sync_mode, config.broadcast_mode
        );

        Ok(Self {
            config,
            device,
            weights,
            kernels,
        })
    }

    /// Configuration the context was built with
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Device and program
    pub const fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Resident weights
    pub const fn weights(&self) -> &PersistentWeightStore {
        &self.weights
    }

    /// Resolved kernels
    pub const fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    /// Run one inference in a fresh session
    ///
    /// # Errors
    ///
    /// See [`ForwardPipeline::run`].
    pub fn infer(&self, input: &[f32]) -> Result<Vec<f32>> {
        ForwardPipeline::new(self).run(input)
    }
}

/// Initialize-once holder for the shared context
///
/// The first successful initialization wins; every later call returns the
/// same `Arc` without running the initializer. A failed initialization
/// leaves the cell empty.
#[derive(Debug, Default)]
pub struct ContextCell {
    context: OnceLock<Arc<AcceleratorContext>>,
    init: Mutex<()>,
}

impl ContextCell {
    /// Empty cell
    pub fn new() -> Self {
        Self::default()
    }

    /// The context, initializing it with `init` on first use
    ///
    /// # Errors
    ///
    /// Returns the initializer's error; the cell stays empty.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<Arc<AcceleratorContext>>
    where
        F: FnOnce() -> Result<AcceleratorContext>,
    {
        if let Some(context) = self.context.get() {
            return Ok(Arc::clone(context));
        }

        let _guard = self.init.lock().map_err(|_| {
            clconv_device::DeviceError::invalid_state("context initialization lock poisoned")
        })?;
        if let Some(context) = self.context.get() {
            return Ok(Arc::clone(context));
        }

        let context = Arc::new(init()?);
        let _ = self.context.set(Arc::clone(&context));
        Ok(context)
    }

    /// The context, if initialized
    pub fn get(&self) -> Option<Arc<AcceleratorContext>> {
        self.context.get().cloned()
    }

    /// True once a context is stored
    pub fn is_initialized(&self) -> bool {
        self.context.get().is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::weights::InMemoryWeights;
    use clconv_device::{standard_program, SoftwareBackend};

    pub(crate) fn software_context(weights: &InMemoryWeights) -> (Arc<SoftwareBackend>, AcceleratorContext) {
        let backend = Arc::new(SoftwareBackend::new());
        let context = AcceleratorContext::with_image(
            Arc::clone(&backend) as Arc<dyn ComputeBackend>,
            ProgramImage::from_bytes(standard_program()).unwrap(),
            PipelineConfig::default(),
            weights,
        )
        .unwrap();
        (backend, context)
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn context_is_shareable_across_threads() {
        assert_send_sync::<AcceleratorContext>();
        assert_send_sync::<ContextCell>();
    }

    #[test]
    fn cell_initializes_once() {
        let cell = ContextCell::new();
        let weights = InMemoryWeights::zero_filters(vec![0.0; 8], vec![0.0; 8]);
        let mut runs = 0;

        let first = cell
            .get_or_try_init(|| {
                runs += 1;
                Ok(software_context(&weights).1)
            })
            .unwrap();
        let second = cell
            .get_or_try_init(|| {
                runs += 1;
                Ok(software_context(&weights).1)
            })
            .unwrap();

        assert_eq!(runs, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cell.is_initialized());
    }

    #[test]
    fn failed_initialization_leaves_cell_empty() {
        let cell = ContextCell::new();
        let result = cell.get_or_try_init(|| {
            AcceleratorContext::initialize(
                Arc::new(SoftwareBackend::new()),
                PipelineConfig::default().with_program_path("/nonexistent/kernel_file.aocx"),
                &InMemoryWeights::default(),
            )
        });

        assert_eq!(
            result.unwrap_err().category(),
            clconv_device::ErrorCategory::Configuration
        );
        assert!(cell.get().is_none());
    }
}
