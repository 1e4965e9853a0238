// SPDX-License-Identifier: AGPL-3.0-only

//! Example: run the forward pass on the software device
//!
//! Uses weight files from a directory when given one, otherwise zero
//! filters with distinct biases so the result is easy to check.

use std::sync::Arc;
use std::time::Instant;

use clconv_device::{standard_program, ProgramImage, SoftwareBackend};
use clconv_pipeline::{
    AcceleratorContext, BroadcastMode, DirectoryWeights, InMemoryWeights, PipelineConfig, SyncMode, WeightSource,
    INPUT_LEN,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("debug").init();

    let weights: Box<dyn WeightSource> = match std::env::args().nth(1) {
        Some(dir) => Box::new(DirectoryWeights::new(dir)),
        None => Box::new(InMemoryWeights::zero_filters(
            vec![0.0; 8],
            (0..8u8).map(|i| f32::from(i) * 0.5).collect(),
        )),
    };
    println!("Weights: {}", weights.describe());

    for sync in [SyncMode::Drain, SyncMode::Events] {
        for broadcast in [BroadcastMode::Host, BroadcastMode::Device] {
            let context = AcceleratorContext::with_image(
                Arc::new(SoftwareBackend::new()),
                ProgramImage::from_bytes(standard_program())?,
                PipelineConfig::default()
                    .with_sync_mode(sync)
                    .with_broadcast_mode(broadcast),
                weights.as_ref(),
            )?;

            let start = Instant::now();
            let output = context.infer(&[0.0; INPUT_LEN])?;
            println!("{sync:>6} / {broadcast:<6} {:>10.1?}  {output:?}", start.elapsed());
        }
    }

    Ok(())
}
