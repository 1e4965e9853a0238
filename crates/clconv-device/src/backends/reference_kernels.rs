// SPDX-License-Identifier: AGPL-3.0-only

//! Reference kernels executed by the software device
//!
//! Host implementations of the three entry points the inference program
//! exposes. Argument contracts match the accelerator binary:
//!
//! ```text
//! convolve_imagecubes_float2(int numExamples, in, filters, out, int firstLayer)
//! forwardNaive(out, in)
//! repeated_add(int N, int sourceSize, int repeatSize, out, source)
//! ```
//!
//! The convolution geometry is compiled into the device program, one
//! variant per layer, selected by the `firstLayer` flag.

use std::collections::HashMap;

use crate::backend::{BufferId, KernelArg, NdRange};
use crate::error::{DeviceError, Result};

/// Convolution entry point (both layers)
pub const CONVOLVE: &str = "convolve_imagecubes_float2";

/// Elementwise activation entry point
pub const FORWARD_NAIVE: &str = "forwardNaive";

/// Channel-broadcast add entry point
pub const REPEATED_ADD: &str = "repeated_add";

/// Buffer storage the kernels run against
pub(crate) type BufferMap = HashMap<BufferId, Vec<f32>>;

/// Shape of one convolution layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    /// Planes per input example
    pub input_planes: usize,

    /// Input image side length
    pub image_size: usize,

    /// Number of filters (output planes)
    pub num_filters: usize,

    /// Filter side length
    pub filter_size: usize,

    /// Zero-pad so the output keeps the input side length
    pub pad_zeros: bool,
}

impl ConvGeometry {
    /// Layer 1: one 32×32 plane, eight 5×5 filters, zero padded
    pub const FIRST: Self = Self {
        input_planes: 1,
        image_size: 32,
        num_filters: 8,
        filter_size: 5,
        pad_zeros: true,
    };

    /// Layer 2: eight 32×32 planes, eight full-image filters, one output each
    pub const SECOND: Self = Self {
        input_planes: 8,
        image_size: 32,
        num_filters: 8,
        filter_size: 32,
        pad_zeros: false,
    };

    /// Geometry selected by the kernel's layer flag
    pub const fn for_flag(first_layer: i32) -> Self {
        if first_layer == 0 {
            Self::SECOND
        } else {
            Self::FIRST
        }
    }

    /// Output side length
    pub const fn output_size(&self) -> usize {
        if self.pad_zeros {
            self.image_size
        } else {
            self.image_size - self.filter_size + 1
        }
    }

    /// Input elements per example
    pub const fn input_len(&self) -> usize {
        self.input_planes * self.image_size * self.image_size
    }

    /// Filter weight elements
    pub const fn weights_len(&self) -> usize {
        self.num_filters * self.input_planes * self.filter_size * self.filter_size
    }

    /// Output elements per example
    pub const fn output_len(&self) -> usize {
        self.num_filters * self.output_size() * self.output_size()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    Int,
    Buffer,
}

/// Entry points the software device can build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKernel {
    /// `convolve_imagecubes_float2`
    Convolve,

    /// `forwardNaive` (tanh)
    ForwardNaive,

    /// `repeated_add`
    RepeatedAdd,
}

impl ReferenceKernel {
    /// Look up an entry point by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            CONVOLVE => Some(Self::Convolve),
            FORWARD_NAIVE => Some(Self::ForwardNaive),
            REPEATED_ADD => Some(Self::RepeatedAdd),
            _ => None,
        }
    }

    /// Entry point name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Convolve => CONVOLVE,
            Self::ForwardNaive => FORWARD_NAIVE,
            Self::RepeatedAdd => REPEATED_ADD,
        }
    }

    const fn signature(self) -> &'static [ArgKind] {
        use ArgKind::{Buffer, Int};
        match self {
            Self::Convolve => &[Int, Buffer, Buffer, Buffer, Int],
            Self::ForwardNaive => &[Buffer, Buffer],
            Self::RepeatedAdd => &[Int, Int, Int, Buffer, Buffer],
        }
    }

    /// Number of positional arguments
    pub const fn arity(self) -> usize {
        self.signature().len()
    }

    /// Position of the buffer the kernel writes
    pub const fn output_index(self) -> usize {
        match self {
            Self::Convolve | Self::RepeatedAdd => 3,
            Self::ForwardNaive => 0,
        }
    }

    /// Check arity and argument kinds
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on mismatch.
    pub fn check_args(self, args: &[KernelArg]) -> Result<()> {
        let signature = self.signature();
        if args.len() != signature.len() {
            return Err(DeviceError::invalid_argument(format!(
                "{} takes {} arguments, got {}",
                self.name(),
                signature.len(),
                args.len()
            )));
        }

        for (index, (arg, kind)) in args.iter().zip(signature).enumerate() {
            let matches = matches!(
                (arg, kind),
                (KernelArg::Int(_), ArgKind::Int) | (KernelArg::Buffer(_), ArgKind::Buffer)
            );
            if !matches {
                return Err(DeviceError::invalid_argument(format!(
                    "{} argument {index}: expected {kind:?}, got {arg:?}",
                    self.name()
                )));
            }
        }
        Ok(())
    }

    /// Validate buffer sizes and scalar ranges before a launch is queued
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a launch with these arguments would
    /// read or write out of bounds.
    pub(crate) fn validate(self, args: &[KernelArg], buffers: &BufferMap) -> Result<()> {
        self.check_args(args)?;

        match self {
            Self::Convolve => {
                let examples = count_arg(args, 0, "numExamples")?;
                let (input, weights, output) = (buffer_arg(args, 1)?, buffer_arg(args, 2)?, buffer_arg(args, 3)?);
                let geometry = ConvGeometry::for_flag(int_arg(args, 4)?);

                distinct(output, &[input, weights])?;
                at_least(buffers, input, examples * geometry.input_len(), "input")?;
                exactly(buffers, weights, geometry.weights_len(), "filters")?;
                at_least(buffers, output, examples * geometry.output_len(), "output")
            }
            Self::ForwardNaive => {
                let (output, input) = (buffer_arg(args, 0)?, buffer_arg(args, 1)?);
                distinct(output, &[input])?;
                let len = lookup(buffers, input)?.len();
                exactly(buffers, output, len, "output")
            }
            Self::RepeatedAdd => {
                let n = count_arg(args, 0, "N")?;
                let source_size = count_arg(args, 1, "sourceSize")?;
                let repeat_size = count_arg(args, 2, "repeatSize")?;
                let (output, source) = (buffer_arg(args, 3)?, buffer_arg(args, 4)?);

                if source_size == 0 || repeat_size == 0 {
                    return Err(DeviceError::invalid_argument(
                        "repeated_add: sourceSize and repeatSize must be non-zero",
                    ));
                }
                distinct(output, &[source])?;
                at_least(buffers, output, n, "output")?;
                at_least(buffers, source, source_size, "source")
            }
        }
    }

    /// Run the launch against `buffers`
    ///
    /// # Errors
    ///
    /// Returns `DispatchFailed` if a bound buffer was released or resized
    /// since validation.
    pub(crate) fn execute(self, args: &[KernelArg], range: NdRange, buffers: &mut BufferMap) -> Result<()> {
        self.validate(args, buffers)
            .map_err(|e| DeviceError::dispatch_failed(format!("{}: {e}", self.name())))?;

        let output_id = buffer_arg(args, self.output_index())?;
        let mut output = buffers
            .remove(&output_id)
            .ok_or_else(|| DeviceError::dispatch_failed(format!("output buffer {} missing", output_id.raw())))?;

        let outcome = self.run(args, range, buffers, &mut output);
        buffers.insert(output_id, output);
        outcome
    }

    fn run(self, args: &[KernelArg], range: NdRange, buffers: &BufferMap, output: &mut [f32]) -> Result<()> {
        match self {
            Self::Convolve => {
                let examples = count_arg(args, 0, "numExamples")?;
                let input = lookup(buffers, buffer_arg(args, 1)?)?;
                let weights = lookup(buffers, buffer_arg(args, 2)?)?;
                let geometry = ConvGeometry::for_flag(int_arg(args, 4)?);
                convolve(&geometry, examples, input, weights, output, range.global);
            }
            Self::ForwardNaive => {
                let input = lookup(buffers, buffer_arg(args, 1)?)?;
                for (out, x) in output.iter_mut().zip(input).take(range.global) {
                    *out = x.tanh();
                }
            }
            Self::RepeatedAdd => {
                let n = count_arg(args, 0, "N")?;
                let source_size = count_arg(args, 1, "sourceSize")?;
                let repeat_size = count_arg(args, 2, "repeatSize")?;
                let source = lookup(buffers, buffer_arg(args, 4)?)?;
                for (i, out) in output.iter_mut().enumerate().take(n.min(range.global)) {
                    *out += source[(i / repeat_size) % source_size];
                }
            }
        }
        Ok(())
    }
}

/// One work-item per output element: example-major, then filter, then row, then column
fn convolve(
    geometry: &ConvGeometry,
    examples: usize,
    input: &[f32],
    weights: &[f32],
    output: &mut [f32],
    global: usize,
) {
    let image = geometry.image_size;
    let filter = geometry.filter_size;
    let planes = geometry.input_planes;
    let out_size = geometry.output_size();
    let out_area = out_size * out_size;
    let half = if geometry.pad_zeros { filter / 2 } else { 0 };
    let total = examples * geometry.num_filters * out_area;

    for gid in 0..global.min(total) {
        let example = gid / (geometry.num_filters * out_area);
        let filter_id = (gid / out_area) % geometry.num_filters;
        let row = (gid % out_area) / out_size;
        let col = gid % out_size;

        let mut sum = 0.0f32;
        for plane in 0..planes {
            let input_base = (example * planes + plane) * image * image;
            let weights_base = (filter_id * planes + plane) * filter * filter;
            for u in 0..filter {
                let Some(r) = (row + u).checked_sub(half).filter(|&r| r < image) else {
                    continue;
                };
                for v in 0..filter {
                    let Some(c) = (col + v).checked_sub(half).filter(|&c| c < image) else {
                        continue;
                    };
                    sum += input[input_base + r * image + c] * weights[weights_base + u * filter + v];
                }
            }
        }
        output[gid] = sum;
    }
}

fn int_arg(args: &[KernelArg], index: usize) -> Result<i32> {
    match args.get(index) {
        Some(KernelArg::Int(v)) => Ok(*v),
        other => Err(DeviceError::invalid_argument(format!(
            "argument {index}: expected Int, got {other:?}"
        ))),
    }
}

fn count_arg(args: &[KernelArg], index: usize, what: &str) -> Result<usize> {
    let value = int_arg(args, index)?;
    usize::try_from(value)
        .map_err(|_| DeviceError::invalid_argument(format!("{what} must be non-negative, got {value}")))
}

fn buffer_arg(args: &[KernelArg], index: usize) -> Result<BufferId> {
    match args.get(index) {
        Some(KernelArg::Buffer(id)) => Ok(*id),
        other => Err(DeviceError::invalid_argument(format!(
            "argument {index}: expected Buffer, got {other:?}"
        ))),
    }
}

fn lookup(buffers: &BufferMap, id: BufferId) -> Result<&[f32]> {
    buffers
        .get(&id)
        .map(Vec::as_slice)
        .ok_or_else(|| DeviceError::invalid_argument(format!("unknown buffer {}", id.raw())))
}

fn distinct(output: BufferId, inputs: &[BufferId]) -> Result<()> {
    if inputs.contains(&output) {
        return Err(DeviceError::invalid_argument(format!(
            "output buffer {} is also bound as an input",
            output.raw()
        )));
    }
    Ok(())
}

fn at_least(buffers: &BufferMap, id: BufferId, needed: usize, what: &str) -> Result<()> {
    let len = lookup(buffers, id)?.len();
    if len < needed {
        return Err(DeviceError::invalid_argument(format!(
            "{what} buffer holds {len} elements, launch needs {needed}"
        )));
    }
    Ok(())
}

fn exactly(buffers: &BufferMap, id: BufferId, needed: usize, what: &str) -> Result<()> {
    let len = lookup(buffers, id)?.len();
    if len != needed {
        return Err(DeviceError::invalid_argument(format!(
            "{what} buffer holds {len} elements, expected {needed}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers(entries: &[(u64, Vec<f32>)]) -> BufferMap {
        entries
            .iter()
            .map(|(id, data)| (BufferId::new(*id), data.clone()))
            .collect()
    }

    #[test]
    fn geometry_matches_network_shape() {
        assert_eq!(ConvGeometry::FIRST.input_len(), 1024);
        assert_eq!(ConvGeometry::FIRST.output_len(), 8192);
        assert_eq!(ConvGeometry::FIRST.weights_len(), 200);
        assert_eq!(ConvGeometry::SECOND.input_len(), 8192);
        assert_eq!(ConvGeometry::SECOND.output_len(), 8);
        assert_eq!(ConvGeometry::SECOND.weights_len(), 65_536);
        assert_eq!(ConvGeometry::for_flag(1), ConvGeometry::FIRST);
        assert_eq!(ConvGeometry::for_flag(0), ConvGeometry::SECOND);
    }

    #[test]
    fn names_round_trip() {
        for kernel in [
            ReferenceKernel::Convolve,
            ReferenceKernel::ForwardNaive,
            ReferenceKernel::RepeatedAdd,
        ] {
            assert_eq!(ReferenceKernel::from_name(kernel.name()), Some(kernel));
        }
        assert_eq!(ReferenceKernel::from_name("backpropNaive"), None);
    }

    #[test]
    fn wrong_argument_kind_is_rejected() {
        let args = [KernelArg::Int(1), KernelArg::Buffer(BufferId::new(1))];
        let err = ReferenceKernel::ForwardNaive.check_args(&args).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument { .. }));
    }

    #[test]
    fn forward_naive_applies_tanh() {
        let mut map = buffers(&[(1, vec![0.0; 3]), (2, vec![0.0, 1.0, -2.0])]);
        let args = [KernelArg::Buffer(BufferId::new(1)), KernelArg::Buffer(BufferId::new(2))];

        ReferenceKernel::ForwardNaive
            .execute(&args, NdRange::new(3, 3), &mut map)
            .unwrap();

        let out = &map[&BufferId::new(1)];
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 1.0f32.tanh()).abs() < 1e-7);
        assert!((out[2] - (-2.0f32).tanh()).abs() < 1e-7);
    }

    #[test]
    fn repeated_add_broadcasts_channels() {
        let mut map = buffers(&[(1, vec![0.0; 6]), (2, vec![10.0, 20.0])]);
        let args = [
            KernelArg::Int(6),
            KernelArg::Int(2),
            KernelArg::Int(3),
            KernelArg::Buffer(BufferId::new(1)),
            KernelArg::Buffer(BufferId::new(2)),
        ];

        ReferenceKernel::RepeatedAdd
            .execute(&args, NdRange::new(6, 6), &mut map)
            .unwrap();

        assert_eq!(map[&BufferId::new(1)], vec![10.0, 10.0, 10.0, 20.0, 20.0, 20.0]);
    }

    #[test]
    fn repeated_add_rejects_zero_repeat() {
        let map = buffers(&[(1, vec![0.0; 4]), (2, vec![1.0])]);
        let args = [
            KernelArg::Int(4),
            KernelArg::Int(1),
            KernelArg::Int(0),
            KernelArg::Buffer(BufferId::new(1)),
            KernelArg::Buffer(BufferId::new(2)),
        ];
        assert!(ReferenceKernel::RepeatedAdd.validate(&args, &map).is_err());
    }

    #[test]
    fn first_layer_centre_tap_copies_input() {
        // Each filter has a single 1.0 at its centre: output plane == input plane.
        let geometry = ConvGeometry::FIRST;
        let mut weights = vec![0.0f32; geometry.weights_len()];
        let centre = (geometry.filter_size / 2) * geometry.filter_size + geometry.filter_size / 2;
        for f in 0..geometry.num_filters {
            weights[f * geometry.filter_size * geometry.filter_size + centre] = 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let input: Vec<f32> = (0..geometry.input_len()).map(|i| i as f32).collect();
        let mut map = buffers(&[(1, input.clone()), (2, weights), (3, vec![0.0; 8192])]);
        let args = [
            KernelArg::Int(1),
            KernelArg::Buffer(BufferId::new(1)),
            KernelArg::Buffer(BufferId::new(2)),
            KernelArg::Buffer(BufferId::new(3)),
            KernelArg::Int(1),
        ];

        ReferenceKernel::Convolve
            .execute(&args, NdRange::new(8192, 1024), &mut map)
            .unwrap();

        let out = &map[&BufferId::new(3)];
        for plane in out.chunks(1024) {
            assert_eq!(plane, input.as_slice());
        }
    }

    #[test]
    fn second_layer_is_a_full_dot_product() {
        let geometry = ConvGeometry::SECOND;
        let input = vec![0.5f32; geometry.input_len()];
        let weights = vec![0.25f32; geometry.weights_len()];
        let mut map = buffers(&[(1, input), (2, weights), (3, vec![0.0; 8])]);
        let args = [
            KernelArg::Int(1),
            KernelArg::Buffer(BufferId::new(1)),
            KernelArg::Buffer(BufferId::new(2)),
            KernelArg::Buffer(BufferId::new(3)),
            KernelArg::Int(0),
        ];

        ReferenceKernel::Convolve
            .execute(&args, NdRange::new(8, 8), &mut map)
            .unwrap();

        // 8192 products of 0.125, all exactly representable
        assert_eq!(map[&BufferId::new(3)], vec![1024.0; 8]);
    }

    #[test]
    fn convolution_rejects_wrong_filter_size() {
        let map = buffers(&[(1, vec![0.0; 1024]), (2, vec![0.0; 199]), (3, vec![0.0; 8192])]);
        let args = [
            KernelArg::Int(1),
            KernelArg::Buffer(BufferId::new(1)),
            KernelArg::Buffer(BufferId::new(2)),
            KernelArg::Buffer(BufferId::new(3)),
            KernelArg::Int(1),
        ];
        assert!(ReferenceKernel::Convolve.validate(&args, &map).is_err());
    }
}
