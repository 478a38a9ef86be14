//! # Pipeline
//!
//! Drives the stages in order:
//!
//! ```text
//! embeddings file ──► VectorStore ──► SimilarityEngine ──► ResultStore (cache)
//!                                                              │
//!                                        GraphWriter ◄── emit (top_n, rounding, batches)
//! ```
//!
//! The compute stage is skipped when the cache was built from the same embeddings
//! (same [`VectorStore::fingerprint`]) with at least the requested `k`. The emit
//! stage only ever reads a result, so it can be rerun with other `top_n` values.

use indicatif::ProgressBar;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

use crate::config::LitsimConfig;
use crate::error::{Result, SimilarityError};
use crate::graph_writer::{CypherBatchWriter, EmitSummary, GraphWriter, emit};
use crate::result::{RankedNeighbors, SimilarityResult};
use crate::similarity::SimilarityEngine;
use crate::store::ResultStore;
use crate::vector_store::{VectorStore, read_embeddings};

/// Output of [`compute_stage`].
#[derive(Debug, Clone)]
pub struct ComputeOutcome {
    pub result: SimilarityResult<String>,
    /// `true` when the result came from the cache.
    pub from_cache: bool,
    /// Rows whose norm was floor-clamped; empty for cached results.
    pub degenerate_rows: Vec<usize>,
}

/// Top-`k` similarities for `store`, reusing `cache` when it matches.
///
/// A fresh result is written back to the cache. A failed cache write is logged and
/// does not discard the result.
pub fn compute_with_cache(
    store: &VectorStore<String>,
    config: &LitsimConfig,
    cache: &ResultStore,
    force: bool,
    progress: Option<ProgressBar>,
) -> Result<ComputeOutcome> {
    config.validate_compute()?;
    let fingerprint = store.fingerprint()?;

    if !force {
        if let Some(result) = cache.load_matching::<String>(&fingerprint, config.k) {
            info!(
                "Reusing cached top-{} similarities for {} documents from {}",
                config.k,
                result.len(),
                cache.path().display()
            );
            return Ok(ComputeOutcome {
                result,
                from_cache: true,
                degenerate_rows: Vec::new(),
            });
        }
    }

    let mut engine = SimilarityEngine::new(config.engine_options())?;
    if let Some(bar) = progress {
        engine = engine.with_progress(bar);
    }
    let (result, report) = engine.compute_with_report(store, config.k)?;

    if let Err(e) = cache.save(&result, Some(&fingerprint)) {
        warn!("Similarity results were computed but not cached: {e}");
    }
    Ok(ComputeOutcome {
        result,
        from_cache: false,
        degenerate_rows: report.degenerate_rows,
    })
}

/// Read `config.embeddings_path` and run [`compute_with_cache`] against `config.cache_path`.
pub fn compute_stage(
    config: &LitsimConfig,
    force: bool,
    progress: Option<ProgressBar>,
) -> Result<ComputeOutcome> {
    let store = read_embeddings(&config.embeddings_path)?;
    info!(
        "Fetched {} document embeddings of dimension {}",
        store.len(),
        store.dimension()
    );
    let cache = ResultStore::new(&config.cache_path);
    compute_with_cache(&store, config, &cache, force, progress)
}

/// Emit `result` into any [`GraphWriter`] with the config's emit options.
pub fn emit_stage<W>(
    result: &SimilarityResult<String>,
    config: &LitsimConfig,
    writer: &mut W,
) -> Result<EmitSummary>
where
    W: GraphWriter<String> + ?Sized,
{
    emit(result, writer, &config.emit_options())
}

/// Emit `result` as Cypher batch statements into `path`.
pub fn emit_to_file(
    result: &SimilarityResult<String>,
    config: &LitsimConfig,
    path: &Path,
) -> Result<EmitSummary> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = CypherBatchWriter::new(BufWriter::new(File::create(path)?));
    let summary = emit_stage(result, config, &mut writer)?;
    writer.into_inner()?;
    info!("Wrote {} batches to {}", summary.batches, path.display());
    Ok(summary)
}

/// Load the cached result at `config.cache_path`. The cache is required here.
pub fn load_cached(config: &LitsimConfig) -> Result<SimilarityResult<String>> {
    ResultStore::new(&config.cache_path)
        .load::<String>()
        .map(|cached| cached.result)
}

/// Both stages: compute (or reuse) and write edges to `config.edges_path`.
pub fn run(
    config: &LitsimConfig,
    force: bool,
    progress: Option<ProgressBar>,
) -> Result<(ComputeOutcome, EmitSummary)> {
    let outcome = compute_stage(config, force, progress)?;
    let summary = emit_to_file(&outcome.result, config, &config.edges_path)?;
    Ok((outcome, summary))
}

/// The first `top_n` cached neighbors of `key`.
///
/// # Errors
/// Cache errors from [`load_cached`], or [`SimilarityError::InvalidParameter`] when
/// `key` is unknown or `top_n` is outside `1..=k`.
pub fn neighbors_of(
    config: &LitsimConfig,
    key: &str,
    top_n: usize,
) -> Result<RankedNeighbors<String>> {
    let result = load_cached(config)?.truncated(top_n)?;
    result
        .get(&key.to_string())
        .cloned()
        .ok_or_else(|| SimilarityError::invalid(format!("unknown document {key:?}")))
}
