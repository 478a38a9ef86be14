//! Main module for the Litsim CLI application (litsim).
//!
//! Parses the command line, loads the configuration (from `--config` or the
//! per-platform config directory), applies flag overrides and runs the requested
//! stage.
//!
//! # Examples
//!
//! ```sh
//! cargo run -- init
//! litsim run --embeddings data/embeddings.csv --top-n 20
//! ```

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use litsim::commands::{Cli, Commands};
use litsim::config::{self, LitsimConfig};
use litsim::{data_dir, default_config_path, pipeline};
use once_cell::sync::OnceCell;
use std::{error::Error, path::Path, process::ExitCode};
use tracing::{debug, error, info, warn};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> ExitCode {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Executes the parsed command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the selected stage fails.
fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    match cli.command {
        Commands::Init { force } => init(&config_path, force)?,
        Commands::Compute { compute } => {
            let mut config = load_or_default(&config_path)?;
            compute.apply(&mut config);
            let outcome = pipeline::compute_stage(&config, compute.force, Some(progress_bar()))?;
            report_compute(&outcome);
            info!("Similarity cache at {}", config.cache_path.display());
        }
        Commands::Emit { emit } => {
            let mut config = load_or_default(&config_path)?;
            emit.apply(&mut config);
            let result = pipeline::load_cached(&config)?;
            let summary = pipeline::emit_to_file(&result, &config, &config.edges_path)?;
            println!(
                "{} edges in {} batches written to {}",
                summary.edges,
                summary.batches,
                config.edges_path.display()
            );
        }
        Commands::Run { compute, emit } => {
            let mut config = load_or_default(&config_path)?;
            compute.apply(&mut config);
            emit.apply(&mut config);
            let (outcome, summary) = pipeline::run(&config, compute.force, Some(progress_bar()))?;
            report_compute(&outcome);
            println!(
                "{} edges in {} batches written to {}",
                summary.edges,
                summary.batches,
                config.edges_path.display()
            );
        }
        Commands::Neighbors { key, top_n, cache } => {
            let mut config = load_or_default(&config_path)?;
            if let Some(path) = cache {
                config.cache_path = path;
            }
            let top_n = top_n.unwrap_or(config.top_n);
            let neighbors = pipeline::neighbors_of(&config, &key, top_n)?;
            println!("Top {} neighbors of {key}:", neighbors.len());
            for (rank, (neighbor, score)) in neighbors.iter().enumerate() {
                println!("{:>4}. {neighbor:<16} {score:.4}", rank + 1);
            }
        }
    }

    Ok(())
}

/// Writes a default configuration file with data paths under the platform data dir.
///
/// # Errors
///
/// Returns an error if the file exists and `force` is not set, or if it cannot be
/// written.
fn init(config_path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if config_path.exists() && !force {
        return Err(format!(
            "{} already exists; pass --force to overwrite it",
            config_path.display()
        )
        .into());
    }
    let config = LitsimConfig::with_data_dir(&data_dir()?);
    info!("Creating config file: {}", config_path.display());
    config::write_config(config_path, &config)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

fn load_or_default(config_path: &Path) -> Result<LitsimConfig, Box<dyn Error>> {
    if config_path.exists() {
        let config = config::load_config(config_path)?;
        debug!("Config loaded: {:?}", config);
        return Ok(config);
    }
    warn!(
        "No config at {}; using defaults (run `litsim init` to create one)",
        config_path.display()
    );
    Ok(LitsimConfig::with_data_dir(&data_dir()?))
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} batches")
    {
        bar.set_style(style);
    }
    bar
}

fn report_compute(outcome: &pipeline::ComputeOutcome) {
    if outcome.from_cache {
        println!(
            "Reused cached top-{} similarities for {} documents",
            outcome.result.k(),
            outcome.result.len()
        );
    } else {
        println!(
            "Computed top-{} similarities for {} documents",
            outcome.result.k(),
            outcome.result.len()
        );
    }
    if !outcome.degenerate_rows.is_empty() {
        println!(
            "{} near-zero embeddings were floor-clamped",
            outcome.degenerate_rows.len()
        );
    }
}
