//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `LitsimConfig` struct, which holds every knob of the similarity
//! pipeline, and `load_config` / `write_config` to move it to and from YAML.
//!
//! Every field has a default, so a config file only needs the values it changes.
//! The defaults mirror the production run: `k: 200` neighbors are computed and cached,
//! `top_n: 20` of them are emitted to the graph.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use litsim::config::{LitsimConfig, load_config};
//! use std::path::Path;
//!
//! let config: LitsimConfig = load_config(Path::new("/path/to/config.yaml")).unwrap();
//! println!("{:?}", config);
//! ```
//!
//! A minimal file:
//!
//! ```yaml
//! k: 50
//! top_n: 10
//! embeddings_path: data/breast_cancer_embeddings.csv
//! ```

use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::SimilarityError;
use crate::graph_writer::{
    DEFAULT_EMIT_BATCH_SIZE, DEFAULT_SCORE_DECIMALS, DEFAULT_TOP_N, EmitOptions,
};
use crate::similarity::{DEFAULT_BATCH_SIZE, DEFAULT_NORM_FLOOR, EngineOptions};

/// Neighbors computed and cached per document.
pub const DEFAULT_K: usize = 200;

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct LitsimConfig {
    /// Neighbors computed per document. Must be below the number of documents.
    pub k: usize,

    /// Neighbors emitted per document (`0 < top_n <= k`).
    pub top_n: usize,

    /// Rows per similarity batch.
    pub batch_size: usize,

    /// Edges per graph upsert batch.
    pub emit_batch_size: usize,

    /// Decimal places kept when emitting scores.
    pub score_decimals: u32,

    /// Norms below this are clamped before normalization.
    pub norm_floor: f64,

    /// Score the rows of each batch in parallel.
    pub parallel: bool,

    /// Embedding pipeline output (`.csv` or `.jsonl`).
    pub embeddings_path: PathBuf,

    /// Similarity cache artifact.
    pub cache_path: PathBuf,

    /// Output of the emit stage (one Cypher statement per line).
    pub edges_path: PathBuf,
}

impl Default for LitsimConfig {
    fn default() -> Self {
        Self::with_data_dir(Path::new("data"))
    }
}

impl LitsimConfig {
    /// Defaults with every file placed under `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            k: DEFAULT_K,
            top_n: DEFAULT_TOP_N,
            batch_size: DEFAULT_BATCH_SIZE,
            emit_batch_size: DEFAULT_EMIT_BATCH_SIZE,
            score_decimals: DEFAULT_SCORE_DECIMALS,
            norm_floor: DEFAULT_NORM_FLOOR,
            parallel: false,
            embeddings_path: data_dir.join("embeddings.csv"),
            cache_path: data_dir.join("topk_similarities.bin"),
            edges_path: data_dir.join("similarity_edges.jsonl"),
        }
    }

    /// Check ranges that do not depend on the data.
    ///
    /// `k < n` can only be checked once the embeddings are read.
    ///
    /// # Errors
    /// [`SimilarityError::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SimilarityError> {
        self.validate_compute()?;
        if self.top_n == 0 || self.top_n > self.k {
            return Err(SimilarityError::invalid(format!(
                "top_n must be greater than 0 and at most k ({}). Got top_n={}",
                self.k, self.top_n
            )));
        }
        if self.emit_batch_size == 0 {
            return Err(SimilarityError::invalid(
                "emit_batch_size must be greater than 0. Got emit_batch_size=0",
            ));
        }
        if self.score_decimals > 15 {
            return Err(SimilarityError::invalid(format!(
                "score_decimals must be at most 15. Got score_decimals={}",
                self.score_decimals
            )));
        }
        Ok(())
    }

    /// The subset of [`LitsimConfig::validate`] the compute stage depends on.
    ///
    /// `top_n` is left to the emit stage, so a cache can be built with a `k` below the
    /// configured `top_n`.
    pub fn validate_compute(&self) -> Result<(), SimilarityError> {
        if self.k == 0 {
            return Err(SimilarityError::invalid("k must be greater than 0. Got k=0"));
        }
        self.engine_options().validate()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            batch_size: self.batch_size,
            norm_floor: self.norm_floor,
            parallel: self.parallel,
        }
    }

    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            top_n: self.top_n,
            batch_size: self.emit_batch_size,
            score_decimals: self.score_decimals,
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(LitsimConfig)`: The loaded and validated configuration.
/// - `Err(Box<dyn Error>)`: The file could not be read, is not valid YAML, or holds
///   out-of-range values.
///
/// # Examples
///
/// ```no_run
/// use litsim::config::load_config;
/// use std::path::Path;
///
/// match load_config(Path::new("/path/to/config.yaml")) {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &Path) -> Result<LitsimConfig, Box<dyn Error>> {
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: LitsimConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Serializes `config` to YAML at `file`, creating parent directories.
pub fn write_config(file: &Path, config: &LitsimConfig) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)?;
    fs::write(file, yaml)?;
    Ok(())
}
