//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options. Flags given on the command line override the values of the config file.
//!
//! # Examples
//!
//! ```sh
//! litsim init
//! litsim compute --embeddings data/embeddings.csv --k 200
//! litsim emit --top-n 20 --out data/similarity_edges.jsonl
//! litsim neighbors 34567 --top-n 5
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::LitsimConfig;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Config file to use instead of `<config_dir>/config.yaml`.
    #[arg(long, short = 'c', global = true, env = "LITSIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// Compute top-k similarities and store them in the cache.
    #[clap(name = "compute", alias = "c")]
    Compute {
        #[command(flatten)]
        compute: ComputeArgs,
    },

    /// Emit cached similarities as batched graph upserts.
    #[clap(name = "emit", alias = "e")]
    Emit {
        #[command(flatten)]
        emit: EmitArgs,
    },

    /// Compute (or reuse the cache) and emit in one go.
    Run {
        #[command(flatten)]
        compute: ComputeArgs,

        #[command(flatten)]
        emit: EmitArgs,
    },

    /// Print the cached neighbors of one document.
    #[clap(name = "neighbors", alias = "n")]
    Neighbors {
        /// Document id.
        key: String,

        /// Number of neighbors to show.
        #[arg(long)]
        top_n: Option<usize>,

        #[arg(long)]
        cache: Option<PathBuf>,
    },
}

/// Options of the compute stage.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ComputeArgs {
    /// Embeddings file (`.csv` or `.jsonl`).
    #[arg(long)]
    pub embeddings: Option<PathBuf>,

    /// Neighbors computed per document.
    #[arg(long, short = 'k')]
    pub k: Option<usize>,

    /// Rows per similarity batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Similarity cache file.
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Score the rows of each batch in parallel.
    #[arg(long)]
    pub parallel: bool,

    /// Ignore a matching cache and recompute.
    #[arg(long)]
    pub force: bool,
}

/// Options of the emit stage.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct EmitArgs {
    /// Neighbors emitted per document.
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Edges per upsert batch.
    #[arg(long)]
    pub emit_batch_size: Option<usize>,

    /// Output file for the Cypher batches.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl ComputeArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut LitsimConfig) {
        if let Some(path) = &self.embeddings {
            config.embeddings_path = path.clone();
        }
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(path) = &self.cache {
            config.cache_path = path.clone();
        }
        config.parallel |= self.parallel;
    }
}

impl EmitArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut LitsimConfig) {
        if let Some(top_n) = self.top_n {
            config.top_n = top_n;
        }
        if let Some(size) = self.emit_batch_size {
            config.emit_batch_size = size;
        }
        if let Some(path) = &self.out {
            config.edges_path = path.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compute_flags() {
        let cli = Cli::parse_from([
            "litsim",
            "--config",
            "cfg.yaml",
            "compute",
            "-k",
            "50",
            "--batch-size",
            "64",
            "--parallel",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("cfg.yaml")));
        let Commands::Compute { compute } = cli.command else {
            panic!("expected compute");
        };

        let mut config = LitsimConfig::default();
        compute.apply(&mut config);
        assert_eq!(config.k, 50);
        assert_eq!(config.batch_size, 64);
        assert!(config.parallel);
        assert!(!compute.force);
    }

    #[test]
    fn test_unset_flags_keep_config_values() {
        let cli = Cli::parse_from(["litsim", "emit"]);
        let Commands::Emit { emit } = cli.command else {
            panic!("expected emit");
        };
        let mut config = LitsimConfig::default();
        emit.apply(&mut config);
        assert_eq!(config, LitsimConfig::default());
    }

    #[test]
    fn test_parse_neighbors_and_aliases() {
        let cli = Cli::parse_from(["litsim", "n", "34567", "--top-n", "3"]);
        match cli.command {
            Commands::Neighbors { key, top_n, cache } => {
                assert_eq!(key, "34567");
                assert_eq!(top_n, Some(3));
                assert!(cache.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
