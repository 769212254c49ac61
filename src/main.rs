//! somgpu CLI - GPU distance kernel for Self-Organizing Maps
//!
//! `somgpu <input> <weights> <output>` writes the distance of every input
//! vector to every weight vector; `somgpu <input> <output>` runs the
//! `add_one` kernel over a single dataset.

use clap::{Parser, ValueEnum};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use log::error;
use somgpu::accel::shaders::{self, ADD_ONE, EUCLIDEAN_DIST};
use somgpu::accel::{ComputeBackend, ComputeContext, KernelProgram};
use somgpu::selection::Prompter;
use somgpu::{
    cpu, CompilePolicy, Config, DistancePipeline, IncrementPipeline, Metric, Result,
    VectorDataset,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Deviation between device and host results above which `--verify` warns.
const VERIFY_TOLERANCE: f32 = 1e-3;

#[derive(Parser)]
#[command(name = "somgpu")]
#[command(version)]
#[command(about = "GPU distance kernel for Self-Organizing Maps", long_about = None)]
struct Cli {
    /// <input> <weights> <output> for distances, or <input> <output> for add_one
    #[arg(required = true, num_args = 2..=3, value_name = "PATHS")]
    paths: Vec<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Platform to use (1-based); prompts when omitted
    #[arg(short, long)]
    platform: Option<usize>,

    /// Device to use (1-based); prompts when omitted
    #[arg(short, long)]
    device: Option<usize>,

    /// Work-group size
    #[arg(short, long)]
    local_size: Option<u32>,

    /// Distance metric
    #[arg(short, long, value_enum)]
    metric: Option<MetricArg>,

    /// Log the build diagnostics and keep going when the kernels fail to build
    #[arg(long)]
    log_and_continue: bool,

    /// WGSL kernel file to use instead of the built-in kernels
    #[arg(short, long)]
    kernel: Option<PathBuf>,

    /// Compare the device result with the CPU reference
    #[arg(long)]
    verify: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Euclidean,
    Squared,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Euclidean => Metric::Euclidean,
            MetricArg::Squared => Metric::SquaredEuclidean,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    if let Err(e) = run(cli) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if cli.platform.is_some() {
        config.backend.platform = cli.platform;
    }
    if cli.device.is_some() {
        config.backend.device = cli.device;
    }
    if let Some(local_size) = cli.local_size {
        config.kernel.local_size = local_size;
    }
    if let Some(metric) = cli.metric {
        config.distance.metric = metric.into();
    }
    if cli.log_and_continue {
        config.kernel.compile_policy = CompilePolicy::LogAndContinue;
    }

    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let start_time = Instant::now();
    let config = load_config(&cli)?;

    let context = select_context(&config)?;
    println!("✓ Using {}", context.info());

    let source = match &cli.kernel {
        Some(path) => std::fs::read_to_string(path)?,
        None => shaders::KERNELS_WGSL.to_string(),
    };
    let entry_point = if cli.paths.len() == 3 { EUCLIDEAN_DIST } else { ADD_ONE };
    let program = KernelProgram::build(
        &context,
        &source,
        &[entry_point],
        config.kernel.local_size,
        config.kernel.compile_policy,
    )?;

    match cli.paths.as_slice() {
        [input, weights, output] => {
            compute_distances(&context, &program, &config, input, weights, output, cli.verify)?
        }
        [input, output] => increment(&context, &program, input, output, cli.verify)?,
        _ => unreachable!("clap enforces two or three paths"),
    }

    let stats = context.buffer_stats();
    log::info!(
        "{} buffer(s) allocated, {} released",
        stats.allocated,
        stats.released
    );
    println!("Done in {}", HumanDuration(start_time.elapsed()));
    Ok(())
}

/// Lists platforms and devices and opens the chosen one, prompting for
/// anything the configuration leaves open.
fn select_context(config: &Config) -> Result<ComputeContext> {
    let backend = ComputeBackend::discover(&config.backend);
    let stdin = io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), io::stdout());

    let platforms = backend.enumerate_platforms()?;
    println!("Found {} platform(s)", platforms.len());
    let names: Vec<&str> = platforms.iter().map(|p| p.name()).collect();
    prompter.list(&names)?;
    let platform = match config.backend.platform {
        Some(p) => p,
        None => prompter.choose("platform", platforms)? + 1,
    };

    let devices = backend.enumerate_devices(platform)?;
    println!("Found {} device(s)", devices.len());
    let names: Vec<String> = devices.iter().map(|d| d.to_string()).collect();
    prompter.list(&names)?;
    let device = match config.backend.device {
        Some(d) => d,
        None => prompter.choose("device", devices)? + 1,
    };
    io::stdout().flush()?;

    backend.select_device(platform, device)
}

fn spinner(message: &'static str) -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let pb = ProgressBar::new_spinner();
    pb.set_style(style);
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn compute_distances(
    context: &ComputeContext,
    program: &KernelProgram,
    config: &Config,
    input_path: &Path,
    weights_path: &Path,
    output_path: &Path,
    verify: bool,
) -> Result<()> {
    let input = VectorDataset::load(input_path)?;
    let weights = VectorDataset::load(weights_path)?;
    println!(
        "✓ Loaded {} inputs and {} weight vector(s) of dimension {}",
        input.count(),
        weights.count(),
        input.dimension()
    );

    let pipeline = DistancePipeline::new(context, program, config.distance.metric)?;

    let pb = spinner("Computing distances...");
    let result = pipeline.compute(&input, &weights);
    pb.finish_and_clear();
    let result = result?;

    if verify {
        let reference = cpu::distances(&input, &weights, pipeline.metric())?;
        report_deviation(&result.values, &reference.values);
    }

    let count = result.values.len();
    result.into_dataset()?.save(output_path)?;
    println!("✓ Wrote {} distance(s) to {}", count, output_path.display());
    Ok(())
}

fn increment(
    context: &ComputeContext,
    program: &KernelProgram,
    input_path: &Path,
    output_path: &Path,
    verify: bool,
) -> Result<()> {
    let input = VectorDataset::load(input_path)?;
    println!(
        "✓ Loaded {} vectors of dimension {}",
        input.count(),
        input.dimension()
    );

    let pipeline = IncrementPipeline::new(context, program)?;

    let pb = spinner("Running add_one...");
    let output = pipeline.run(&input);
    pb.finish_and_clear();
    let output = output?;

    if verify {
        let reference = cpu::add_one(&input)?;
        report_deviation(output.as_slice(), reference.as_slice());
    }

    output.save(output_path)?;
    println!("✓ Wrote {} vectors to {}", output.count(), output_path.display());
    Ok(())
}

fn report_deviation(device: &[f32], host: &[f32]) {
    match cpu::max_abs_deviation(device, host) {
        Some(dev) if dev <= VERIFY_TOLERANCE => {
            println!("✓ Matches CPU reference (max deviation {:.2e})", dev)
        }
        Some(dev) => log::warn!("device result deviates from CPU reference by {:.2e}", dev),
        None => log::warn!(
            "device produced {} values, CPU reference {}",
            device.len(),
            host.len()
        ),
    }
}
