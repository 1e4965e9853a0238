// SPDX-License-Identifier: AGPL-3.0-only

//! Shared server state
//!
//! The accelerator context is built once, on first use, and shared by every
//! request through an `Arc`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clconv_device::{ComputeBackend, SoftwareBackend};
use clconv_pipeline::{AcceleratorContext, ContextCell, DirectoryWeights, PipelineConfig};
use tracing::info;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Pipeline configuration (program image, sync and broadcast modes)
    pub pipeline: PipelineConfig,
    /// Directory holding filters.txt, biases.txt, filters2.txt and bias2.txt
    pub weights_dir: PathBuf,
}

/// State shared by all handlers
pub struct AppState {
    pub config: ServerConfig,
    backend: Arc<dyn ComputeBackend>,
    context: ContextCell,
    started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_backend(config, Arc::new(SoftwareBackend::new()))
    }

    pub fn with_backend(config: ServerConfig, backend: Arc<dyn ComputeBackend>) -> Self {
        Self {
            config,
            backend,
            context: ContextCell::new(),
            started_at: Instant::now(),
        }
    }

    /// The shared context, initializing it on first call
    pub fn context(&self) -> clconv_pipeline::Result<Arc<AcceleratorContext>> {
        self.context.get_or_try_init(|| {
            info!(
                "Initializing accelerator: program {}, weights {}",
                self.config.pipeline.program_path.display(),
                self.config.weights_dir.display()
            );
            AcceleratorContext::initialize(
                Arc::clone(&self.backend),
                self.config.pipeline.clone(),
                &DirectoryWeights::new(&self.config.weights_dir),
            )
        })
    }

    /// The shared context if already built
    pub fn ready_context(&self) -> Option<Arc<AcceleratorContext>> {
        self.context.get()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use clconv_device::standard_program;
    use clconv_pipeline::floats_to_file;

    /// Program image and zero filters in a temp dir; layer-2 biases are `bias2`
    pub fn fixture(bias2: &[f32]) -> (tempfile::TempDir, SharedState) {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("kernel_file.aocx");
        std::fs::write(&program, standard_program()).unwrap();

        floats_to_file(dir.path().join("filters.txt"), &[0.0; 200]).unwrap();
        floats_to_file(dir.path().join("biases.txt"), &[0.0; 8]).unwrap();
        floats_to_file(dir.path().join("filters2.txt"), &vec![0.0; 65536]).unwrap();
        floats_to_file(dir.path().join("bias2.txt"), bias2).unwrap();

        let config = ServerConfig {
            pipeline: PipelineConfig::default().with_program_path(program),
            weights_dir: dir.path().to_path_buf(),
        };
        (dir, Arc::new(AppState::new(config)))
    }

    #[test]
    fn context_is_built_once() {
        let (_dir, state) = fixture(&[0.0; 8]);
        assert!(state.ready_context().is_none());

        let first = state.context().unwrap();
        let second = state.context().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(state.ready_context().is_some());
    }
}
