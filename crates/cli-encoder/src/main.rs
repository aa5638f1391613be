use anyhow::{bail, Context, Result};
use clap::Parser;
use encoder::{batch::format_elapsed, run_batch, scan, BatchReport, EncoderConfig, Pipeline};
use humansize::{format_size, DECIMAL};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};

/// Batch video transcoder: re-encode every media file in a directory in place
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the batch report as JSON
    #[arg(long)]
    json: bool,

    /// A media directory, or media files sharing one directory
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; --verbose only raises the default
    let mut logger = env_logger::Builder::new();
    logger
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let cfg = EncoderConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    let profile = cfg.to_profile().context("Invalid encode settings")?;
    let settings = cfg.batch_settings().context("Invalid batch settings")?;

    info!("Configuration loaded:");
    info!(
        "  Codec: {} (CRF {}, speed {})",
        profile.encoder, profile.quality, profile.speed
    );
    info!("  Crop: {:?}", profile.crop);
    info!(
        "  CPU budget: {}% of {} cores, up to {} worker(s)",
        settings.max_cpu_usage, settings.logical_cores, settings.max_workers
    );

    let inputs = resolve_inputs(&args.inputs)?;
    let pipeline = Pipeline::new(cfg.tools.clone(), profile);

    // The error chain carries the failing tool's exit code and both streams
    let report = run_batch(&pipeline, settings, inputs)
        .await
        .context("Batch aborted")?;

    print_report(&report, args.json)?;
    Ok(())
}

/// Expand the positional arguments into the ordered batch input list.
fn resolve_inputs(args: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if let [single] = args {
        if single.is_dir() {
            return scan::collect_inputs(single)
                .with_context(|| format!("Failed to scan {}", single.display()));
        }
    }

    let mut parent: Option<&Path> = None;
    for path in args {
        if !path.is_file() {
            bail!("Input is not a file: {}", path.display());
        }
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        match parent {
            None => parent = Some(dir),
            Some(p) if p != dir => {
                bail!(
                    "Input files must share one directory: {} is not in {}",
                    path.display(),
                    p.display()
                )
            }
            _ => {}
        }
    }
    Ok(args.to_vec())
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    for outcome in report.outcomes.iter().flatten() {
        println!(
            "{} -> {}: {} -> {}",
            outcome.input.display(),
            outcome.final_name,
            format_size(outcome.sizes.initial_bytes, DECIMAL),
            format_size(outcome.sizes.resulting_bytes, DECIMAL)
        );
    }

    let elapsed = chrono::Duration::seconds(report.elapsed_secs);
    println!("Encoding time: {}", format_elapsed(elapsed));
    if let Some(summary) = report.savings_summary() {
        println!("{}", summary);
    }

    if json {
        let rendered = serde_json::to_string_pretty(report)
            .context("Failed to serialize batch report")?;
        println!("{}", rendered);
    }
    Ok(())
}
