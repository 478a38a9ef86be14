//! # Graph hand-off
//!
//! Turns a [`SimilarityResult`] into `is_similar_to` edges for the property graph.
//!
//! The engine computes a generous `k`; this stage emits a narrower view:
//!
//! 1. keep the first `top_n` neighbors of every document (`0 < top_n <= k`),
//! 2. round each score to `score_decimals` places (rounding happens only here),
//! 3. chunk the edges into batches of `batch_size`,
//! 4. hand every batch to a [`GraphWriter`].
//!
//! A writer must *upsert*: an edge is identified by the unordered pair of its
//! endpoints and its weight is overwritten on every write, so re-running the stage
//! (or emitting both `a → b` and `b → a`) never duplicates edges. [`UPSERT_SIMILARITY_CYPHER`]
//! is the statement a Neo4j-backed writer runs for each batch.
//!
//! Two writers ship with the crate:
//! - [`CypherBatchWriter`]: one JSON line per batch, shaped as a statement plus
//!   parameters for a graph loader to replay.
//! - [`InMemoryGraph`]: applies the upsert semantics in memory (dry runs, tests).

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::error::Error;
use std::hash::Hash;
use std::io::Write;
use std::time::Instant;
use tracing::info;

use crate::error::{Result, SimilarityError};
use crate::result::SimilarityResult;

/// Statement applied to every batch; `$batch` holds `{id1, id2, similarity}` records.
///
/// `Document.id` is an integer (the PubMed id), so `id1`/`id2` must be integers or
/// strings of digits. [`CypherBatchWriter`] rejects a batch holding any other id,
/// since `toInteger` would turn it into `null` and the MATCH would drop the edge.
pub const UPSERT_SIMILARITY_CYPHER: &str = "UNWIND $batch AS relationship
MATCH (a:Document {id: toInteger(relationship.id1)})
MATCH (b:Document {id: toInteger(relationship.id2)})
MERGE (a)-[r:is_similar_to]-(b)
SET r.weight = relationship.similarity";

pub const DEFAULT_TOP_N: usize = 20;
pub const DEFAULT_EMIT_BATCH_SIZE: usize = 500;
pub const DEFAULT_SCORE_DECIMALS: u32 = 4;

/// One similarity edge as written to the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityEdge<K> {
    #[serde(rename = "id1")]
    pub source_key: K,
    #[serde(rename = "id2")]
    pub target_key: K,
    pub similarity: f64,
}

/// How much of a result to emit and in which chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitOptions {
    pub top_n: usize,
    pub batch_size: usize,
    pub score_decimals: u32,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            batch_size: DEFAULT_EMIT_BATCH_SIZE,
            score_decimals: DEFAULT_SCORE_DECIMALS,
        }
    }
}

/// Totals of one emit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitSummary {
    pub edges: usize,
    pub batches: usize,
}

/// Sink for batches of similarity edges.
///
/// Implementations must merge on the unordered endpoint pair and overwrite the
/// weight unconditionally.
pub trait GraphWriter<K> {
    fn upsert_similarity_edges(
        &mut self,
        batch: &[SimilarityEdge<K>],
    ) -> std::result::Result<(), Box<dyn Error + Send + Sync>>;
}

/// Round `value` to `decimals` places, half away from zero.
pub fn round_score(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// Edges for the first `top_n` neighbors of every key, scores rounded.
///
/// Order follows the result: documents in input order, neighbors best first.
///
/// # Errors
/// [`SimilarityError::InvalidParameter`] unless `0 < top_n <= result.k()`.
pub fn similarity_edges<K>(
    result: &SimilarityResult<K>,
    top_n: usize,
    score_decimals: u32,
) -> Result<Vec<SimilarityEdge<K>>>
where
    K: Clone + Eq + Hash,
{
    if top_n == 0 || top_n > result.k() {
        return Err(SimilarityError::invalid(format!(
            "top_n must be greater than 0 and at most k ({}). Got top_n={top_n}",
            result.k()
        )));
    }
    Ok(result
        .iter()
        .flat_map(|(source, neighbors)| {
            neighbors
                .iter()
                .take(top_n)
                .map(move |(target, score)| SimilarityEdge {
                    source_key: source.clone(),
                    target_key: target.clone(),
                    similarity: round_score(score, score_decimals),
                })
        })
        .collect())
}

/// Emit `result` into `writer` according to `options`.
///
/// # Errors
/// - [`SimilarityError::InvalidParameter`] for `top_n` outside `1..=k` or a zero batch size.
/// - [`SimilarityError::GraphWrite`] with the 1-based batch number if the writer fails;
///   earlier batches stay written (upserts make a rerun safe).
pub fn emit<K, W>(
    result: &SimilarityResult<K>,
    writer: &mut W,
    options: &EmitOptions,
) -> Result<EmitSummary>
where
    K: Clone + Eq + Hash,
    W: GraphWriter<K> + ?Sized,
{
    if options.batch_size == 0 {
        return Err(SimilarityError::invalid(
            "emit batch_size must be greater than 0. Got batch_size=0",
        ));
    }
    let edges = similarity_edges(result, options.top_n, options.score_decimals)?;
    let total_batches = edges.len().div_ceil(options.batch_size);
    info!(
        "Saving {} relationships in {} batches.",
        edges.len(),
        total_batches
    );

    let started = Instant::now();
    for (i, chunk) in edges.chunks(options.batch_size).enumerate() {
        info!("Processing batch {}/{}...", i + 1, total_batches);
        writer
            .upsert_similarity_edges(chunk)
            .map_err(|e| SimilarityError::GraphWrite {
                batch: i + 1,
                reason: e.to_string(),
            })?;
    }
    info!(
        "Created {} 'is_similar_to' relationships in {:.2} seconds.",
        edges.len(),
        started.elapsed().as_secs_f64()
    );

    Ok(EmitSummary {
        edges: edges.len(),
        batches: total_batches,
    })
}

#[derive(Serialize)]
struct Statement<'a, K> {
    statement: &'a str,
    parameters: Parameters<'a, K>,
}

#[derive(Serialize)]
struct Parameters<'a, K> {
    batch: &'a [SimilarityEdge<K>],
}

/// Writes each batch as one JSON line:
/// `{"statement": <cypher>, "parameters": {"batch": [{"id1", "id2", "similarity"}, ...]}}`.
pub struct CypherBatchWriter<W: Write> {
    out: W,
    batches: usize,
}

impl<W: Write> CypherBatchWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, batches: 0 }
    }

    /// Batches written so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Flush and return the inner writer.
    pub fn into_inner(mut self) -> std::io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<K: Serialize, W: Write> GraphWriter<K> for CypherBatchWriter<W> {
    fn upsert_similarity_edges(
        &mut self,
        batch: &[SimilarityEdge<K>],
    ) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
        for edge in batch {
            check_integer_id(&edge.source_key)?;
            check_integer_id(&edge.target_key)?;
        }
        let line = Statement {
            statement: UPSERT_SIMILARITY_CYPHER,
            parameters: Parameters { batch },
        };
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        self.batches += 1;
        Ok(())
    }
}

fn check_integer_id<K: Serialize>(
    key: &K,
) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
    let value = serde_json::to_value(key)?;
    let ok = match &value {
        JsonValue::Number(n) => n.is_i64() || n.is_u64(),
        JsonValue::String(s) => s.parse::<i64>().is_ok(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("document id {value} is not an integer").into())
    }
}

/// Undirected weighted edge set with MERGE semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryGraph<K: Ord> {
    edges: BTreeMap<(K, K), f64>,
    writes: usize,
}

impl<K: Ord + Clone> InMemoryGraph<K> {
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
            writes: 0,
        }
    }

    /// Number of distinct edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of edge records applied, including overwrites.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Weight of the edge between `a` and `b`, in either direction.
    pub fn weight(&self, a: &K, b: &K) -> Option<f64> {
        self.edges.get(&Self::pair(a, b)).copied()
    }

    fn pair(a: &K, b: &K) -> (K, K) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }
}

impl<K: Ord + Clone> Default for InMemoryGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> GraphWriter<K> for InMemoryGraph<K> {
    fn upsert_similarity_edges(
        &mut self,
        batch: &[SimilarityEdge<K>],
    ) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
        for edge in batch {
            let pair = Self::pair(&edge.source_key, &edge.target_key);
            self.edges.insert(pair, edge.similarity);
            self.writes += 1;
        }
        Ok(())
    }
}
