//! # Litsim (library root)
//!
//! Exact document-to-document similarity for a biomedical literature graph.
//!
//! Every document (a PubMed/PubTator record) carries an embedding. This crate finds,
//! for every document, its `k` most similar other documents by cosine similarity,
//! caches that result, and emits the best `top_n` of each list as batched, idempotent
//! `is_similar_to` edge upserts for the property graph.
//!
//! - Input vectors and their validation (`vector_store`).
//! - The brute-force top-k engine (`similarity`) and its result type (`result`).
//! - The on-disk result cache (`store`).
//! - The graph hand-off: truncation, rounding, batching, writers (`graph_writer`).
//! - Configuration, CLI definitions and the stage driver (`config`, `commands`,
//!   `pipeline`).
//!
//! Fetching literature, parsing annotation XML, generating embeddings and talking to
//! the live graph database are done by other tools; this crate starts from an
//! embeddings file and ends with upsert batches.
//!
//! ## Quick start
//! ```
//! use litsim::graph_writer::{EmitOptions, InMemoryGraph, emit};
//! use litsim::similarity::{EngineOptions, SimilarityEngine};
//! use litsim::vector_store::VectorStore;
//!
//! let store = VectorStore::new(
//!     vec!["1".to_string(), "2".to_string(), "3".to_string(), "4".to_string()],
//!     vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0], vec![0.1, 0.9]],
//! )?;
//! let engine = SimilarityEngine::new(EngineOptions::default())?;
//! let result = engine.compute(&store, 2)?;
//!
//! let mut graph = InMemoryGraph::new();
//! let options = EmitOptions { top_n: 1, ..EmitOptions::default() };
//! let summary = emit(&result, &mut graph, &options)?;
//! assert_eq!(summary.edges, 4);
//! assert_eq!(graph.len(), 2);
//! # Ok::<(), litsim::error::SimilarityError>(())
//! ```
//!
//! ## Files
//! Configuration lives in the per-platform config directory ([`config_dir`]):
//!
//! - macOS: `~/Library/Application Support/org.litsim.litsim/config.yaml`
//! - Linux (XDG): `~/.config/litsim/config.yaml`
//! - Windows: `C:\Users\<you>\AppData\Roaming\litsim\litsim\config\config.yaml`
//!
//! Data files (embeddings, cache, emitted edges) default to [`data_dir`].

use directories::ProjectDirs;
use std::error::Error;
use std::path::PathBuf;

pub mod commands;
pub mod config;
pub mod error;
pub mod graph_writer;
pub mod pipeline;
pub mod result;
pub mod similarity;
pub mod store;
pub mod vector_store;

fn project_dirs() -> Result<ProjectDirs, Box<dyn Error>> {
    ProjectDirs::from("org", "litsim", "litsim")
        .ok_or_else(|| "Unable to determine config directory".into())
}

/// Return the per-platform configuration directory used by Litsim.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Return the per-platform data directory: default home of the embeddings file, the
/// similarity cache and the emitted edges.
pub fn data_dir() -> Result<PathBuf, Box<dyn Error>> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// `config_dir()/config.yaml`.
pub fn default_config_path() -> Result<PathBuf, Box<dyn Error>> {
    Ok(config_dir()?.join("config.yaml"))
}
