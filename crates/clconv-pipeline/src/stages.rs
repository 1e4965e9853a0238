// SPDX-License-Identifier: AGPL-3.0-only

//! Stage primitives
//!
//! Each stage is one kernel-dispatch round trip on the session queue:
//! bind arguments, launch, and optionally read back. Ordering between
//! stages follows [`SyncMode`]: `Drain` brackets every launch with full
//! queue drains, `Events` chains launches through completion events.

use crate::config::{BroadcastMode, LayerSpec, SyncMode};
use crate::error::{PipelineError, Result};
use crate::session::{InferenceSession, SessionBuffer};
use clconv_device::{Buffer, Event, KernelArgs, KernelHandle, NdRange};

/// Stage result: the buffer produced and the launch that writes it
#[derive(Debug)]
pub struct Staged<'s> {
    /// Freshly allocated output buffer
    pub buffer: SessionBuffer<'s>,

    /// Completion of the producing launch
    pub ready: Event,
}

/// Result of a broadcast-add
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Device add enqueued; consumers wait on the event
    Queued(Event),

    /// Host add written back with a blocking write
    Applied,

    /// Terminal add: the read-back values
    Read(Vec<f32>),
}

impl AddOutcome {
    /// Events a consumer of the output buffer must wait on
    pub fn wait_list(&self) -> Vec<Event> {
        match self {
            Self::Queued(event) => vec![*event],
            Self::Applied | Self::Read(_) => Vec::new(),
        }
    }

    /// Values read back by a terminal add
    pub fn into_values(self) -> Option<Vec<f32>> {
        match self {
            Self::Read(values) => Some(values),
            Self::Queued(_) | Self::Applied => None,
        }
    }
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| PipelineError::invalid_broadcast(format!("{what} {value} exceeds i32")))
}

/// Launch `kernel` honouring the sync mode
fn launch(
    session: &InferenceSession<'_>,
    kernel: &KernelHandle,
    args: KernelArgs<'_>,
    range: NdRange,
    sync: SyncMode,
    wait: &[Event],
) -> Result<Event> {
    match sync {
        SyncMode::Drain => {
            session.finish()?;
            let event = kernel.dispatch(session.queue(), args, range, &[])?;
            session.finish()?;
            Ok(event)
        }
        SyncMode::Events => Ok(kernel.dispatch(session.queue(), args, range, wait)?),
    }
}

/// `output[i] += source[(i / repeat_size) % source_size]` for every `i` in `output`
///
/// # Errors
///
/// Returns `InvalidBroadcast` if a size is zero or `source` is shorter than
/// `source_size`.
pub fn broadcast_add(output: &mut [f32], source: &[f32], source_size: usize, repeat_size: usize) -> Result<()> {
    if source_size == 0 || repeat_size == 0 {
        return Err(PipelineError::invalid_broadcast(format!(
            "sourceSize {source_size} and repeatSize {repeat_size} must be non-zero"
        )));
    }
    if source.len() < source_size {
        return Err(PipelineError::invalid_broadcast(format!(
            "source holds {} values, sourceSize is {source_size}",
            source.len()
        )));
    }

    for (i, out) in output.iter_mut().enumerate() {
        *out += source[(i / repeat_size) % source_size];
    }
    Ok(())
}

/// One convolution layer
#[derive(Debug, Clone, Copy)]
pub struct ConvolutionStage {
    layer: LayerSpec,
}

impl ConvolutionStage {
    /// Stage for one layer
    pub const fn new(layer: LayerSpec) -> Self {
        Self { layer }
    }

    /// Convolve `input` with `weights` into a new buffer
    ///
    /// Binds (1, input, weights, output, flag).
    ///
    /// # Errors
    ///
    /// Returns a resource error if allocation, binding or launch fails.
    pub fn run<'s>(
        &self,
        session: &'s InferenceSession<'_>,
        kernel: &KernelHandle,
        input: &Buffer,
        weights: &Buffer,
        sync: SyncMode,
        wait: &[Event],
    ) -> Result<Staged<'s>> {
        let mut output = session.create_buffer(self.layer.output_len())?;
        let args = KernelArgs::new()
            .int(1)
            .input(input)
            .input(weights)
            .output(&mut output)
            .int(self.layer.flag);

        let ready = launch(session, kernel, args, self.layer.conv_range, sync, wait)?;
        Ok(Staged { buffer: output, ready })
    }
}

/// Elementwise activation into a new buffer of the input's size
#[derive(Debug, Clone, Copy)]
pub struct ActivationStage {
    range: NdRange,
}

impl ActivationStage {
    /// Stage launching over `range`
    pub const fn new(range: NdRange) -> Self {
        Self { range }
    }

    /// Binds (output, input)
    ///
    /// # Errors
    ///
    /// Returns a resource error if allocation, binding or launch fails.
    pub fn run<'s>(
        &self,
        session: &'s InferenceSession<'_>,
        kernel: &KernelHandle,
        input: &Buffer,
        sync: SyncMode,
        wait: &[Event],
    ) -> Result<Staged<'s>> {
        let mut output = session.create_buffer(input.len())?;
        let args = KernelArgs::new().output(&mut output).input(input);

        let ready = launch(session, kernel, args, self.range, sync, wait)?;
        Ok(Staged { buffer: output, ready })
    }
}

/// In-place bias broadcast-add over the first `n` elements of a buffer
#[derive(Debug, Clone, Copy)]
pub struct BroadcastAddStage {
    n: usize,
    source_size: usize,
    repeat_size: usize,
    range: NdRange,
    terminal: bool,
}

impl BroadcastAddStage {
    /// Add for a layer's bias; `terminal` reads the result back
    pub const fn for_layer(layer: &LayerSpec, terminal: bool) -> Self {
        Self {
            n: layer.output_len(),
            source_size: layer.channels,
            repeat_size: layer.repeat_size,
            range: layer.bias_range,
            terminal,
        }
    }

    /// Add with explicit sizes
    pub const fn new(n: usize, source_size: usize, repeat_size: usize, range: NdRange, terminal: bool) -> Self {
        Self {
            n,
            source_size,
            repeat_size,
            range,
            terminal,
        }
    }

    fn validate(&self, output: &Buffer, source: &Buffer) -> Result<()> {
        if self.source_size == 0 || self.repeat_size == 0 {
            return Err(PipelineError::invalid_broadcast(format!(
                "sourceSize {} and repeatSize {} must be non-zero",
                self.source_size, self.repeat_size
            )));
        }
        if output.len() < self.n {
            return Err(PipelineError::invalid_broadcast(format!(
                "output holds {} values, N is {}",
                output.len(),
                self.n
            )));
        }
        if source.len() < self.source_size {
            return Err(PipelineError::invalid_broadcast(format!(
                "source holds {} values, sourceSize is {}",
                source.len(),
                self.source_size
            )));
        }
        Ok(())
    }

    /// Apply the add
    ///
    /// Host reads of `source` and `output` observe completion of `wait`,
    /// the last writers of both.
    ///
    /// # Errors
    ///
    /// Returns a resource error on invalid sizes or failed transfers and
    /// launches.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        session: &InferenceSession<'_>,
        mode: BroadcastMode,
        kernel: Option<&KernelHandle>,
        output: &mut Buffer,
        source: &Buffer,
        sync: SyncMode,
        wait: &[Event],
    ) -> Result<AddOutcome> {
        self.validate(output, source)?;

        match mode {
            BroadcastMode::Host => self.run_on_host(session, output, source, sync, wait),
            BroadcastMode::Device => {
                let kernel = kernel.ok_or_else(|| {
                    clconv_device::DeviceError::kernel_not_found(clconv_device::REPEATED_ADD)
                })?;
                self.run_on_device(session, kernel, output, source, sync, wait)
            }
        }
    }

    fn run_on_host(
        &self,
        session: &InferenceSession<'_>,
        output: &mut Buffer,
        source: &Buffer,
        sync: SyncMode,
        wait: &[Event],
    ) -> Result<AddOutcome> {
        if sync == SyncMode::Drain {
            session.finish()?;
        }

        let bias = session.read(source, wait)?;
        let mut values = session.read(output, wait)?;
        broadcast_add(&mut values[..self.n], &bias, self.source_size, self.repeat_size)?;

        if self.terminal {
            values.truncate(self.n);
            return Ok(AddOutcome::Read(values));
        }

        session.write(output, &values)?;
        if sync == SyncMode::Drain {
            session.finish()?;
        }
        Ok(AddOutcome::Applied)
    }

    fn run_on_device(
        &self,
        session: &InferenceSession<'_>,
        kernel: &KernelHandle,
        output: &mut Buffer,
        source: &Buffer,
        sync: SyncMode,
        wait: &[Event],
    ) -> Result<AddOutcome> {
        let args = KernelArgs::new()
            .int(to_i32(self.n, "N")?)
            .int(to_i32(self.source_size, "sourceSize")?)
            .int(to_i32(self.repeat_size, "repeatSize")?)
            .output(output)
            .input(source);

        let event = launch(session, kernel, args, self.range, sync, wait)?;
        if !self.terminal {
            return Ok(AddOutcome::Queued(event));
        }

        let mut values = session.read(output, &[event])?;
        values.truncate(self.n);
        Ok(AddOutcome::Read(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::software_context;
    use crate::weights::InMemoryWeights;

    #[test]
    fn broadcast_matches_channel_index() {
        for (s, r) in [(1, 1), (3, 4), (5, 7), (8, 1), (16, 3), (8, 1024)] {
            #[allow(clippy::cast_precision_loss)]
            let source: Vec<f32> = (0..s).map(|c| c as f32 * 0.5 + 1.0).collect();
            #[allow(clippy::cast_precision_loss)]
            let initial: Vec<f32> = (0..s * r).map(|i| i as f32 * 0.25).collect();

            let mut output = initial.clone();
            broadcast_add(&mut output, &source, s, r).unwrap();
            for (i, value) in output.iter().enumerate() {
                assert_eq!(*value, initial[i] + source[i / r], "S={s} R={r} i={i}");
            }
        }
    }

    #[test]
    fn device_add_wraps_source_like_host_add() {
        let (_, context) = software_context(&InMemoryWeights::zero_filters(vec![0.0; 8], vec![0.0; 8]));
        let kernel = context.device().create_kernel(clconv_device::REPEATED_ADD).unwrap();
        let session = InferenceSession::create(&context).unwrap();

        // N = 12 > S * R = 6: the second half reads the source again
        let (n, s, r) = (12, 2, 3);
        let bias = [10.0, 20.0];
        let initial: Vec<f32> = (0..12u8).map(f32::from).collect();
        let mut expected = initial.clone();
        broadcast_add(&mut expected, &bias, s, r).unwrap();
        assert_eq!(expected[6..9], [16.0, 17.0, 18.0]);
        assert_eq!(expected[9..], [29.0, 30.0, 31.0]);

        for (mode, sync) in [
            (BroadcastMode::Host, SyncMode::Drain),
            (BroadcastMode::Device, SyncMode::Drain),
            (BroadcastMode::Device, SyncMode::Events),
        ] {
            let mut source = session.create_buffer(s).unwrap();
            session.write(&mut source, &bias).unwrap();
            let mut output = session.create_buffer(n).unwrap();
            session.write(&mut output, &initial).unwrap();

            let outcome = BroadcastAddStage::new(n, s, r, NdRange::new(12, 4), true)
                .run(&session, mode, Some(&kernel), &mut output, &source, sync, &[])
                .unwrap();
            assert_eq!(outcome.into_values(), Some(expected.clone()), "{mode} add, {sync} sync");
        }
        session.close().unwrap();
    }

    #[test]
    fn repeat_one_is_elementwise() {
        let source = [1.0, 2.0, 3.0, 4.0];
        let mut output = vec![10.0; 4];
        broadcast_add(&mut output, &source, 4, 1).unwrap();
        assert_eq!(output, vec![11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn source_wraps_when_output_is_longer() {
        let mut output = vec![0.0; 6];
        broadcast_add(&mut output, &[1.0, 2.0], 2, 1).unwrap();
        assert_eq!(output, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut output = vec![0.0; 4];
        assert!(broadcast_add(&mut output, &[1.0], 1, 0).is_err());
        assert!(broadcast_add(&mut output, &[1.0], 0, 1).is_err());
        assert!(broadcast_add(&mut output, &[1.0], 2, 1).is_err());
    }

    #[test]
    fn outcome_wait_lists() {
        assert!(AddOutcome::Applied.wait_list().is_empty());
        assert_eq!(AddOutcome::Read(vec![1.0]).into_values(), Some(vec![1.0]));
        assert_eq!(AddOutcome::Applied.into_values(), None);
    }
}
