//! # Loopback
//!
//! Reads a file through a pipeline with a passthrough worker and writes the
//! records straight back out. Useful for checking format round trips and
//! measuring raw pipeline throughput.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use taskstream::config::PipelineConfig;
use taskstream::logging;
use taskstream::streams::formats::{FileFormat, SliceSource};
use taskstream::streams::{FileHandle, InputStream, OutputStream};
use taskstream::workers::PassthroughWorker;
use taskstream::{Pipeline, RunSummary};
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "loopback")]
#[command(about = "Read a file through the pipeline and write it straight back out")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one loopback pipeline
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input path (local, or s3:// for remote)
    #[arg(short, long)]
    input: String,

    /// Output path
    #[arg(short, long)]
    output: String,

    /// Directory relative paths are resolved against
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Input format tag (csv, json, jsonl)
    #[arg(long, default_value = "csv")]
    input_format: String,

    /// Output format tag (csv, json, jsonl)
    #[arg(long, default_value = "csv")]
    output_format: String,

    /// Number of records to skip
    #[arg(short, long)]
    start: Option<usize>,

    /// Maximum number of records to read
    #[arg(short, long)]
    limit: Option<usize>,

    /// Worker tasks, overriding the configuration
    #[arg(short, long)]
    workers: Option<usize>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overwrite the output file if it exists
    #[arg(short, long)]
    force: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> ExitCode {
    let mut config = match PipelineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_structured_logging();
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(workers) = args.workers {
        config.num_workers = workers;
    }
    logging::init_with_level(config.log_level.as_deref());

    debug!(
        input = %args.input,
        output = %args.output,
        "Running loopback test"
    );
    let started = Instant::now();
    let outcome = loopback(&args, &config).await;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Total time");

    match outcome {
        Ok(summary) => {
            info!(
                records_processed = summary.records_processed,
                records_written = summary.records_written,
                "🎉 Loopback completed"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Loopback failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn loopback(args: &RunArgs, config: &PipelineConfig) -> taskstream::Result<RunSummary> {
    let input_format: FileFormat = args.input_format.parse()?;
    let output_format: FileFormat = args.output_format.parse()?;

    let mut input_handle = FileHandle::new(&args.input, false);
    let mut output_handle = FileHandle::new(&args.output, args.force);
    if let Some(dir) = &args.dir {
        input_handle = input_handle.relative_to(dir);
        output_handle = output_handle.relative_to(dir);
    }

    let source = SliceSource::new(
        input_format.open_source(&input_handle)?,
        args.start,
        args.limit,
    );
    let input = InputStream::new(source, config.queue_capacity)?;
    let output =
        OutputStream::with_capacity(output_format.open_sink(&output_handle)?, config.queue_capacity)?;

    Pipeline::from_config(config, input, PassthroughWorker, output)?
        .run()
        .await
}
