//! # Similarity engine
//!
//! Exact top-k cosine similarity for every document of a [`VectorStore`].
//!
//! ## Algorithm
//! 1. Validate `0 < k < n` (the store already guarantees consistent, finite rows).
//! 2. L2-normalize every row. Norms below [`EngineOptions::norm_floor`] are replaced by
//!    the floor, so an all-zero vector normalizes to zeros and scores `0.0` against
//!    everything instead of producing NaN. Floored rows are logged and reported.
//! 3. Walk the rows in contiguous batches of [`EngineOptions::batch_size`]. For each
//!    batch, fill a `rows × n` scratch matrix with dot products against *all* rows.
//! 4. Overwrite the self column with `-inf` so exactly `k` distinct neighbors survive.
//! 5. Select the best `k` columns of each row with a bounded heap (`O(n log k)`), then
//!    order just those `k`.
//!
//! Ranking is a total order: higher score first, then lower row index. Scores of a
//! pair do not depend on the batch they were computed in, so the result is
//! bit-identical for every batch size and with or without [`EngineOptions::parallel`].
//!
//! Peak scratch memory is `batch_size × n` scores plus the `n × k` selections.
//!
//! ## Quick Example
//! ```
//! use litsim::similarity::compute_topk_similarities;
//!
//! let keys = vec![0u32, 1, 2, 3, 4];
//! let vectors = vec![
//!     vec![1.0, 0.0],
//!     vec![1.0, 0.001],
//!     vec![0.0, 1.0],
//!     vec![0.0, 1.001],
//!     vec![1.0, 1.0],
//! ];
//! let result = compute_topk_similarities(&keys, &vectors, 2, 2).unwrap();
//! assert_eq!(result.get(&0).unwrap().top_keys(), &[1, 4]);
//! ```

use indicatif::ProgressBar;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, SimilarityError};
use crate::result::{RankedNeighbors, SimilarityResult};
use crate::vector_store::VectorStore;

/// Norms below this are clamped before normalization.
pub const DEFAULT_NORM_FLOOR: f64 = 1e-10;

/// Rows per similarity batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Tuning knobs. None of them changes the result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Rows per batch; bounds the scratch matrix to `batch_size × n` scores.
    pub batch_size: usize,
    /// Minimum norm used when normalizing.
    pub norm_floor: f64,
    /// Score the rows of a batch on the rayon pool.
    pub parallel: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            norm_floor: DEFAULT_NORM_FLOOR,
            parallel: false,
        }
    }
}

impl EngineOptions {
    /// # Errors
    /// [`SimilarityError::InvalidParameter`] for a zero batch size or a norm floor that
    /// is not a positive finite number.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SimilarityError::invalid(
                "batch_size must be greater than 0. Got batch_size=0",
            ));
        }
        if !(self.norm_floor.is_finite() && self.norm_floor > 0.0) {
            return Err(SimilarityError::invalid(format!(
                "norm_floor must be a positive finite number. Got norm_floor={}",
                self.norm_floor
            )));
        }
        Ok(())
    }
}

/// Shared flag for cooperative cancellation, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// What happened during a computation, besides the result itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeReport {
    /// Row indices whose norm was below the floor.
    pub degenerate_rows: Vec<usize>,
    pub batches: usize,
    pub elapsed: Duration,
}

/// Brute-force top-k cosine similarity over a [`VectorStore`].
#[derive(Clone)]
pub struct SimilarityEngine {
    options: EngineOptions,
    cancel: Option<CancellationFlag>,
    progress: Option<ProgressBar>,
}

impl fmt::Debug for SimilarityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimilarityEngine")
            .field("options", &self.options)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl SimilarityEngine {
    /// # Errors
    /// See [`EngineOptions::validate`].
    pub fn new(options: EngineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            cancel: None,
            progress: None,
        })
    }

    /// Check `flag` before every batch.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Advance `bar` once per batch. Its length is set to the batch count.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Top-`k` neighbors for every key of `store`.
    ///
    /// # Errors
    /// - [`SimilarityError::InvalidParameter`] unless `0 < k < store.len()`.
    /// - [`SimilarityError::Cancelled`] if the cancellation flag was raised.
    pub fn compute<K>(&self, store: &VectorStore<K>, k: usize) -> Result<SimilarityResult<K>>
    where
        K: Clone + Eq + Hash + Debug,
    {
        self.compute_with_report(store, k).map(|(result, _)| result)
    }

    /// Like [`SimilarityEngine::compute`], also returning a [`ComputeReport`].
    pub fn compute_with_report<K>(
        &self,
        store: &VectorStore<K>,
        k: usize,
    ) -> Result<(SimilarityResult<K>, ComputeReport)>
    where
        K: Clone + Eq + Hash + Debug,
    {
        let n = store.len();
        if !(0 < k && k < n) {
            return Err(SimilarityError::invalid(format!(
                "k must be greater than 0 and less than the number of vectors ({n}). Got k={k}"
            )));
        }

        let started = Instant::now();
        let dimension = store.dimension();
        let batch_size = self.options.batch_size;
        let total_batches = n.div_ceil(batch_size);

        let (normalized, degenerate_rows) =
            normalize_rows(store.as_flat(), dimension, self.options.norm_floor);
        if !degenerate_rows.is_empty() {
            warn!(
                "{} of {} vectors have a norm below {:e} and were floor-clamped (first: row {})",
                degenerate_rows.len(),
                n,
                self.options.norm_floor,
                degenerate_rows[0]
            );
        }

        info!(
            "Computing top-{k} similarities for {n} documents in {total_batches} batches of up to {batch_size} rows"
        );
        if let Some(bar) = &self.progress {
            bar.set_length(total_batches as u64);
        }

        let mut scratch = vec![0.0f64; batch_size.min(n) * n];
        let mut ranked: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);

        for (batch, start) in (0..n).step_by(batch_size).enumerate() {
            if self.cancel.as_ref().is_some_and(CancellationFlag::is_cancelled) {
                return Err(SimilarityError::Cancelled {
                    completed: batch,
                    total: total_batches,
                });
            }

            let end = (start + batch_size).min(n);
            let sims = &mut scratch[..(end - start) * n];

            let score_row = |(i, row): (usize, &mut [f64])| -> Vec<(usize, f64)> {
                let global = start + i;
                let query = &normalized[global * dimension..(global + 1) * dimension];
                for (slot, other) in row.iter_mut().zip(normalized.chunks_exact(dimension)) {
                    *slot = dot(query, other);
                }
                row[global] = f64::NEG_INFINITY;
                select_top_k(row, k)
            };

            let batch_top: Vec<Vec<(usize, f64)>> = if self.options.parallel {
                sims.par_chunks_mut(n).enumerate().map(&score_row).collect()
            } else {
                sims.chunks_mut(n).enumerate().map(&score_row).collect()
            };
            ranked.extend(batch_top);

            debug!("Processed batch {}/{} (rows {start}..{end})", batch + 1, total_batches);
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
        }

        let keys = store.keys();
        let entries = ranked
            .into_iter()
            .enumerate()
            .map(|(row, top)| {
                let (top_keys, similarities): (Vec<K>, Vec<f64>) = top
                    .into_iter()
                    .map(|(col, score)| (keys[col].clone(), score))
                    .unzip();
                let owner = keys[row].clone();
                let neighbors = RankedNeighbors::new(&owner, top_keys, similarities)?;
                Ok((owner, neighbors))
            })
            .collect::<Result<Vec<_>>>()?;
        let result = SimilarityResult::from_entries(k, entries)?;

        let report = ComputeReport {
            degenerate_rows,
            batches: total_batches,
            elapsed: started.elapsed(),
        };
        info!(
            "Similarity computation completed in {:.2} seconds.",
            report.elapsed.as_secs_f64()
        );
        Ok((result, report))
    }
}

/// Top-`k` neighbors of every `keys[i]` / `vectors[i]` pair, scored by cosine similarity.
///
/// Convenience wrapper building a [`VectorStore`] and a default [`SimilarityEngine`]
/// with the given `batch_size`.
///
/// # Errors
/// [`SimilarityError::InvalidParameter`] for mismatched lengths, ragged or non-finite
/// vectors, duplicate keys, `batch_size == 0`, or `k` outside `1..n`.
pub fn compute_topk_similarities<K>(
    keys: &[K],
    vectors: &[Vec<f64>],
    k: usize,
    batch_size: usize,
) -> Result<SimilarityResult<K>>
where
    K: Clone + Eq + Hash + Debug,
{
    let engine = SimilarityEngine::new(EngineOptions {
        batch_size,
        ..EngineOptions::default()
    })?;
    let store = VectorStore::new(keys.to_vec(), vectors.to_vec())?;
    engine.compute(&store, k)
}

/// L2-normalize each `dimension`-wide row of `data`, clamping norms to `norm_floor`.
///
/// Returns the normalized matrix and the indices of the clamped rows.
pub fn normalize_rows(data: &[f64], dimension: usize, norm_floor: f64) -> (Vec<f64>, Vec<usize>) {
    let mut degenerate = Vec::new();
    let mut out = Vec::with_capacity(data.len());
    for (i, row) in data.chunks_exact(dimension).enumerate() {
        let mut norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < norm_floor {
            degenerate.push(i);
            norm = norm_floor;
        }
        out.extend(row.iter().map(|v| v / norm));
    }
    (out, degenerate)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Heap entry; "greater" means ranked lower, so the heap top is the weakest survivor.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// The `k` best `(index, score)` entries of `row`: highest score first, lower index
/// first among equal scores.
///
/// `-0.0` is reported as `0.0` so that signed zeros rank as the tie they are.
pub fn select_top_k(row: &[f64], k: usize) -> Vec<(usize, f64)> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap = BinaryHeap::with_capacity(k);
    for (index, &score) in row.iter().enumerate() {
        let score = if score == 0.0 { 0.0 } else { score };
        let candidate = Candidate { score, index };
        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(mut weakest) = heap.peek_mut() {
            if candidate < *weakest {
                *weakest = candidate;
            }
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|c| (c.index, c.score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scenario() -> (Vec<u32>, Vec<Vec<f64>>) {
        (
            vec![0, 1, 2, 3, 4],
            vec![
                vec![1.0, 0.0],
                vec![1.0, 0.001],
                vec![0.0, 1.0],
                vec![0.0, 1.001],
                vec![1.0, 1.0],
            ],
        )
    }

    fn engine(batch_size: usize, parallel: bool) -> SimilarityEngine {
        SimilarityEngine::new(EngineOptions {
            batch_size,
            parallel,
            ..EngineOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_five_document_scenario() {
        let (keys, vectors) = scenario();
        let result = compute_topk_similarities(&keys, &vectors, 2, 500).unwrap();

        let mut first = result.get(&0).unwrap().top_keys().to_vec();
        first.sort();
        assert_eq!(first, vec![1, 4]);
        assert_eq!(result.get(&2).unwrap().top_keys(), &[3, 4]);
    }

    #[test]
    fn test_cardinality_no_self_and_descending() {
        let (keys, vectors) = scenario();
        let result = compute_topk_similarities(&keys, &vectors, 3, 2).unwrap();

        assert_eq!(result.len(), keys.len());
        assert_eq!(result.keys().copied().collect::<Vec<_>>(), keys);
        for (key, neighbors) in result.iter() {
            assert_eq!(neighbors.top_keys().len(), 3);
            assert_eq!(neighbors.similarities().len(), 3);
            assert!(!neighbors.top_keys().contains(key));
            assert!(neighbors.similarities().windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn test_k_range_guard() {
        let (keys, vectors) = scenario();
        for bad in [0, 5, 6] {
            let err = compute_topk_similarities(&keys, &vectors, bad, 2).unwrap_err();
            assert!(matches!(err, SimilarityError::InvalidParameter(_)));
            assert!(err.to_string().contains(&format!("Got k={bad}")));
        }
        let max = compute_topk_similarities(&keys, &vectors, 4, 2).unwrap();
        assert_eq!(max.k(), 4);
    }

    #[test]
    fn test_single_document_has_no_valid_k() {
        let err = compute_topk_similarities(&[1u32], &[vec![1.0, 2.0]], 1, 10).unwrap_err();
        assert!(err.to_string().contains("number of vectors (1)"));
    }

    #[test]
    fn test_bad_options_are_rejected() {
        let (keys, vectors) = scenario();
        assert!(compute_topk_similarities(&keys, &vectors, 2, 0).is_err());
        let floor = SimilarityEngine::new(EngineOptions {
            norm_floor: 0.0,
            ..EngineOptions::default()
        });
        assert!(floor.is_err());
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let (keys, vectors) = scenario();
        let err = compute_topk_similarities(&keys[..4], &vectors, 2, 2).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidParameter(_)));
    }

    #[test]
    fn test_zero_vector_is_defined() {
        let keys = vec!["zero", "a", "b"];
        let vectors = vec![vec![0.0, 0.0, 0.0], vec![1.0, 2.0, 3.0], vec![-1.0, 0.5, 2.0]];
        let store = VectorStore::new(keys, vectors).unwrap();
        let (result, report) = engine(2, false).compute_with_report(&store, 2).unwrap();

        assert_eq!(report.degenerate_rows, vec![0]);
        for (_, neighbors) in result.iter() {
            assert!(neighbors.similarities().iter().all(|s| s.is_finite()));
        }
        assert!(result.get(&"zero").unwrap().similarities().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_zero_vector_ties_follow_row_order_regardless_of_sign() {
        let vectors = vec![vec![0.0, 0.0], vec![-1.0, -1.0], vec![1.0, 1.0]];
        let result = compute_topk_similarities(&[0u32, 1, 2], &vectors, 2, 3).unwrap();

        let zero = result.get(&0).unwrap();
        assert_eq!(zero.top_keys(), &[1, 2]);
        assert!(zero.similarities().iter().all(|s| s.to_bits() == 0.0f64.to_bits()));

        let row = [-0.0, 0.0, -0.0];
        assert_eq!(select_top_k(&row, 3), vec![(0, 0.0), (1, 0.0), (2, 0.0)]);
    }

    #[test]
    fn test_norm_floor_is_configurable() {
        let data = [1e-6, 0.0, 3.0, 4.0];
        let (_, default_floor) = normalize_rows(&data, 2, DEFAULT_NORM_FLOOR);
        assert!(default_floor.is_empty());

        let (normalized, high_floor) = normalize_rows(&data, 2, 1e-3);
        assert_eq!(high_floor, vec![0]);
        assert!((normalized[0] - 1e-3).abs() < 1e-12);
        assert!((normalized[2] - 0.6).abs() < 1e-12);
        assert!((normalized[3] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_select_top_k_breaks_ties_by_index() {
        let row = [0.5, 0.9, 0.5, f64::NEG_INFINITY, 0.5, 0.1];
        assert_eq!(select_top_k(&row, 3), vec![(1, 0.9), (0, 0.5), (2, 0.5)]);
        assert_eq!(select_top_k(&row, 1), vec![(1, 0.9)]);
        assert!(select_top_k(&row, 0).is_empty());
        assert_eq!(select_top_k(&row, 10).len(), row.len());
    }

    #[test]
    fn test_truncation_matches_direct_computation() {
        let keys: Vec<u32> = (0..20).collect();
        let vectors: Vec<Vec<f64>> = keys
            .iter()
            .map(|&i| {
                let t = i as f64;
                vec![(t * 0.7).sin(), (t * 1.3).cos(), (t * 0.2).sin() + 0.5]
            })
            .collect();

        let wide = compute_topk_similarities(&keys, &vectors, 10, 7).unwrap();
        let narrow = compute_topk_similarities(&keys, &vectors, 3, 4).unwrap();
        assert_eq!(wide.truncated(3).unwrap(), narrow);
    }

    #[test]
    fn test_cancellation_between_batches() {
        let (keys, vectors) = scenario();
        let store = VectorStore::new(keys, vectors).unwrap();
        let flag = CancellationFlag::new();
        flag.cancel();
        let err = engine(2, false)
            .with_cancellation(flag)
            .compute(&store, 2)
            .unwrap_err();
        assert!(matches!(
            err,
            SimilarityError::Cancelled {
                completed: 0,
                total: 3
            }
        ));
    }

    #[test]
    fn test_progress_bar_counts_batches() {
        let (keys, vectors) = scenario();
        let store = VectorStore::new(keys, vectors).unwrap();
        let bar = ProgressBar::hidden();
        let (_, report) = engine(2, false)
            .with_progress(bar.clone())
            .compute_with_report(&store, 2)
            .unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(bar.position(), 3);
        assert_eq!(bar.length(), Some(3));
    }

    fn matrix() -> impl Strategy<Value = Vec<Vec<f64>>> {
        (2usize..24, 1usize..6).prop_flat_map(|(n, d)| {
            prop::collection::vec(prop::collection::vec(-10.0f64..10.0, d), n)
        })
    }

    proptest! {
        #[test]
        fn prop_batch_size_and_parallelism_do_not_change_result(
            vectors in matrix(),
            k_seed in any::<usize>(),
            batch_seed in any::<usize>(),
        ) {
            let n = vectors.len();
            let k = 1 + k_seed % (n - 1);
            let keys: Vec<usize> = (0..n).collect();
            let store = VectorStore::new(keys, vectors).unwrap();

            let reference = engine(1, false).compute(&store, k).unwrap();
            let whole = engine(n, false).compute(&store, k).unwrap();
            let random = engine(1 + batch_seed % n, true).compute(&store, k).unwrap();
            prop_assert_eq!(&reference, &whole);
            prop_assert_eq!(&reference, &random);
        }

        #[test]
        fn prop_power_of_two_scaling_is_invisible(vectors in matrix(), k_seed in any::<usize>()) {
            let n = vectors.len();
            let k = 1 + k_seed % (n - 1);
            let keys: Vec<usize> = (0..n).collect();
            let scaled: Vec<Vec<f64>> = vectors
                .iter()
                .map(|row| row.iter().map(|v| v * 4.0).collect())
                .collect();

            let base = compute_topk_similarities(&keys, &vectors, k, 3).unwrap();
            let big = compute_topk_similarities(&keys, &scaled, k, 3).unwrap();
            prop_assert_eq!(base, big);
        }
    }

    #[test]
    fn test_arbitrary_scaling_keeps_scores() {
        let (keys, vectors) = scenario();
        let scaled: Vec<Vec<f64>> = vectors
            .iter()
            .map(|row| row.iter().map(|v| v * 3.7).collect())
            .collect();
        let base = compute_topk_similarities(&keys, &vectors, 4, 2).unwrap();
        let big = compute_topk_similarities(&keys, &scaled, 4, 2).unwrap();
        for (key, neighbors) in base.iter() {
            let other = big.get(key).unwrap();
            for (a, b) in neighbors.similarities().iter().zip(other.similarities()) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }
}
