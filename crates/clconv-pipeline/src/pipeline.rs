// SPDX-License-Identifier: AGPL-3.0-only

//! Forward pass
//!
//! ```text
//! input[1024] ─► conv1 ─► +bias1 ─► tanh ─► conv2 ─► +bias2 ─► output[8]
//!                [8192]   (8×1024)  [8192]   [8]      (8×1)
//! ```
//!
//! Stages run strictly in sequence. The first error ends the pass; no
//! partial result is returned.

use crate::config::{LayerSpec, ACTIVATION_RANGE, INPUT_LEN};
use crate::context::AcceleratorContext;
use crate::error::{PipelineError, Result};
use crate::session::InferenceSession;
use crate::stages::{ActivationStage, BroadcastAddStage, ConvolutionStage};
use crate::weights::WeightTensor;
use clconv_device::DeviceError;
use std::time::Instant;
use tracing::debug;

/// Drives sessions through the five stages
#[derive(Debug, Clone, Copy)]
pub struct ForwardPipeline<'c> {
    context: &'c AcceleratorContext,
}

impl<'c> ForwardPipeline<'c> {
    /// Pipeline over a shared context
    pub const fn new(context: &'c AcceleratorContext) -> Self {
        Self { context }
    }

    /// Run one inference in a fresh session
    ///
    /// The session is closed on every path; a close failure is reported
    /// only if the pass itself succeeded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` before any device work if `input` is not
    /// exactly 1024 values, otherwise the first stage failure.
    pub fn run(&self, input: &[f32]) -> Result<Vec<f32>> {
        check_input(input)?;

        let session = InferenceSession::create(self.context)?;
        let output = self.forward(&session, input);
        let closed = session.close();

        let output = output?;
        closed?;
        Ok(output)
    }

    /// Run the five stages on an open session
    ///
    /// Weights, kernels and modes come from the session's own context.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure.
    pub fn forward(&self, session: &InferenceSession<'_>, input: &[f32]) -> Result<Vec<f32>> {
        check_input(input)?;

        let context = session.context();
        let config = context.config();
        let sync = config.sync_mode;
        let mode = config.broadcast_mode;
        let kernels = context.kernels();
        let weights = context.weights();
        let broadcast = kernels.broadcast().ok();

        let started = Instant::now();
        let input = session.upload_input(input)?;

        let stage = Instant::now();
        let mut conv1 = ConvolutionStage::new(LayerSpec::FIRST).run(
            session,
            kernels.convolution(),
            &input,
            weights.get(WeightTensor::Filters1)?,
            sync,
            &[],
        )?;
        debug!("{} convolve run time: {:?}", LayerSpec::FIRST.name, stage.elapsed());

        let stage = Instant::now();
        let added = BroadcastAddStage::for_layer(&LayerSpec::FIRST, false).run(
            session,
            mode,
            broadcast,
            &mut conv1.buffer,
            weights.get(WeightTensor::Biases1)?,
            sync,
            &[conv1.ready],
        )?;
        debug!("{} bias add run time: {:?}", LayerSpec::FIRST.name, stage.elapsed());

        let stage = Instant::now();
        let activated = ActivationStage::new(ACTIVATION_RANGE).run(
            session,
            kernels.activation(),
            &conv1.buffer,
            sync,
            &added.wait_list(),
        )?;
        debug!("tanh run time: {:?}", stage.elapsed());

        let stage = Instant::now();
        let mut conv2 = ConvolutionStage::new(LayerSpec::SECOND).run(
            session,
            kernels.convolution(),
            &activated.buffer,
            weights.get(WeightTensor::Filters2)?,
            sync,
            &[activated.ready],
        )?;
        debug!("{} convolve run time: {:?}", LayerSpec::SECOND.name, stage.elapsed());

        let stage = Instant::now();
        let output = BroadcastAddStage::for_layer(&LayerSpec::SECOND, true)
            .run(
                session,
                mode,
                broadcast,
                &mut conv2.buffer,
                weights.get(WeightTensor::Biases2)?,
                sync,
                &[conv2.ready],
            )?
            .into_values()
            .ok_or_else(|| DeviceError::invalid_state("terminal add returned no values"))?;
        debug!("{} bias add run time: {:?}", LayerSpec::SECOND.name, stage.elapsed());

        debug!("Forward pass ({sync}, {mode} add): {:?}", started.elapsed());
        Ok(output)
    }
}

fn check_input(input: &[f32]) -> Result<()> {
    if input.len() != INPUT_LEN {
        return Err(PipelineError::invalid_input(format!(
            "expected {INPUT_LEN} values, got {}",
            input.len()
        )));
    }
    Ok(())
}
