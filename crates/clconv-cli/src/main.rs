// SPDX-License-Identifier: AGPL-3.0-only

//! `clconv`: command-line interface for the accelerator pipeline.
//!
//! ```text
//! USAGE:
//!   clconv run <dir>                 Bulk run from filters.txt, biases.txt, ...
//!   clconv pack-program <file>       Write a software-device program image
//!   clconv info                      Device and program entry points
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clconv_device::{
    pack_software_program, DeviceHandle, SoftwareBackend, CONVOLVE, DEFAULT_PROGRAM_PATH, FORWARD_NAIVE,
    REPEATED_ADD,
};
use clconv_pipeline::{
    floats_from_file, floats_to_file, AcceleratorContext, BroadcastMode, DirectoryWeights, PipelineConfig,
    SyncMode,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clconv", about = "Accelerator CNN inference CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run one inference from a directory of float files.
    Run(RunArgs),
    /// Write a program image for the software device.
    PackProgram {
        /// Output file.
        output: PathBuf,
        /// Entry points to expose (default: all three).
        #[arg(long = "entry")]
        entries: Vec<String>,
    },
    /// Print the device and the program's entry points.
    Info {
        /// Device program image.
        #[arg(long, env = "CLCONV_PROGRAM", default_value = DEFAULT_PROGRAM_PATH)]
        program: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding filters.txt, biases.txt, filters2.txt, bias2.txt,
    /// input.txt and out.txt.
    dir: Option<PathBuf>,

    /// Device program image.
    #[arg(long, env = "CLCONV_PROGRAM", default_value = DEFAULT_PROGRAM_PATH)]
    program: PathBuf,

    /// Write the result here, one value per line.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dispatch ordering: drain or events.
    #[arg(long, env = "CLCONV_SYNC_MODE", default_value = "drain")]
    sync: SyncMode,

    /// Bias broadcast-add placement: host or device.
    #[arg(long, env = "CLCONV_BROADCAST_MODE", default_value = "device")]
    broadcast: BroadcastMode,

    /// Reject weight files whose length differs from the built-in layer
    /// geometry before any kernel runs.
    #[arg(long)]
    check_weights: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Run(args) => cmd_run(&args)?,
        Cmd::PackProgram { output, entries } => cmd_pack_program(&output, &entries)?,
        Cmd::Info { program } => cmd_info(&program)?,
    }

    Ok(())
}

/// Result of checking the output against out.txt
#[derive(Debug, PartialEq)]
enum Comparison {
    /// No out.txt in the run directory
    Skipped,
    /// Largest |result - expected|
    MaxAbsDiff(f32),
    /// out.txt holds a different number of values
    LengthMismatch { expected: usize, actual: usize },
}

impl Comparison {
    fn new(output: &[f32], expected: Option<&[f32]>) -> Self {
        let Some(expected) = expected else {
            return Self::Skipped;
        };
        if expected.len() != output.len() {
            return Self::LengthMismatch {
                expected: expected.len(),
                actual: output.len(),
            };
        }
        let diff = output
            .iter()
            .zip(expected)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        Self::MaxAbsDiff(diff)
    }
}

/// Outcome of a bulk run
struct RunReport {
    setup: Duration,
    kernel: Duration,
    output: Vec<f32>,
    comparison: Comparison,
}

fn cmd_run(args: &RunArgs) -> Result<()> {
    let Some(dir) = &args.dir else {
        println!("Usage: clconv run <path to floats files>");
        return Ok(());
    };

    let report = run_dir(dir, args)?;

    println!("Setup time is ({:?})", report.setup);
    println!("Kernel time is ({:?})", report.kernel);
    println!("Results: {:?}", report.output);
    match report.comparison {
        Comparison::MaxAbsDiff(diff) => println!("Max abs difference vs out.txt: {diff:e}"),
        Comparison::LengthMismatch { expected, actual } => {
            tracing::warn!("out.txt length mismatch");
            println!("out.txt holds {expected} values, result has {actual}: comparison skipped");
        }
        Comparison::Skipped => println!("No out.txt, comparison skipped"),
    }

    if let Some(path) = &args.output {
        floats_to_file(path, &report.output)?;
        println!("Wrote {} values to {}", report.output.len(), path.display());
    }

    Ok(())
}

fn run_dir(dir: &Path, args: &RunArgs) -> Result<RunReport> {
    let start = Instant::now();

    let config = PipelineConfig::default()
        .with_program_path(&args.program)
        .with_sync_mode(args.sync)
        .with_broadcast_mode(args.broadcast)
        .with_weight_shape_check(args.check_weights);
    let context = AcceleratorContext::initialize(
        Arc::new(SoftwareBackend::new()),
        config,
        &DirectoryWeights::new(dir),
    )
    .context("accelerator setup failed")?;

    let input = floats_from_file(dir.join("input.txt"), '\n')?;
    let expected_path = dir.join("out.txt");
    let expected = if expected_path.exists() {
        Some(floats_from_file(&expected_path, '\n')?)
    } else {
        tracing::warn!("{} missing", expected_path.display());
        None
    };

    let setup = start.elapsed();

    let start = Instant::now();
    let output = context.infer(&input)?;
    let kernel = start.elapsed();

    let comparison = Comparison::new(&output, expected.as_deref());

    Ok(RunReport {
        setup,
        kernel,
        output,
        comparison,
    })
}

fn cmd_pack_program(output: &Path, entries: &[String]) -> Result<()> {
    let names: Vec<&str> = if entries.is_empty() {
        vec![CONVOLVE, FORWARD_NAIVE, REPEATED_ADD]
    } else {
        entries.iter().map(String::as_str).collect()
    };

    let image = pack_software_program(&names);
    std::fs::write(output, &image).with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {} ({} bytes): {}", output.display(), image.len(), names.join(", "));
    Ok(())
}

fn cmd_info(program: &Path) -> Result<()> {
    let device = DeviceHandle::initialize(Arc::new(SoftwareBackend::new()), program)?;

    let info = device.info();
    println!("Device       : {}", info.name);
    println!("Vendor       : {}", info.vendor);
    println!("Backend      : {}", device.backend().backend_type());
    println!("Work-group   : max {}", info.max_work_group_size);
    println!("Global mem   : {} MB", info.global_mem_bytes / (1024 * 1024));

    let image = device.program().image();
    println!("Program      : {} ({} bytes, checksum 0x{:08x})", program.display(), image.len(), image.checksum());
    for entry in device.program().entry_points() {
        println!("  entry      : {entry}");
    }

    Ok(())
}
