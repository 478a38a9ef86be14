//! # Similarity results
//!
//! [`SimilarityResult`] is the value object the engine produces and every later stage
//! consumes: an insertion-ordered mapping from a document key to its
//! [`RankedNeighbors`].
//!
//! All invariants are checked at construction, so any `SimilarityResult` in hand is
//! known to satisfy them:
//!
//! - a key never appears among its own neighbors,
//! - `top_keys` and `similarities` have the same length,
//! - every entry has the same length `k`,
//! - scores are finite and non-increasing.
//!
//! Results are never mutated. Narrower views (fewer neighbors per key) are produced
//! with [`SimilarityResult::truncated`], which copies.

use indexmap::IndexMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{Result, SimilarityError};

/// The ranked neighbors of one document, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedNeighbors<K> {
    top_keys: Vec<K>,
    similarities: Vec<f64>,
}

impl<K> RankedNeighbors<K>
where
    K: PartialEq + Debug,
{
    /// Validate and wrap a neighbor list for `owner`.
    ///
    /// # Errors
    /// [`SimilarityError::InvalidParameter`] if the lists differ in length, if `owner`
    /// appears among `top_keys`, or if the scores are non-finite or increase anywhere.
    pub fn new(owner: &K, top_keys: Vec<K>, similarities: Vec<f64>) -> Result<Self> {
        if top_keys.len() != similarities.len() {
            return Err(SimilarityError::invalid(format!(
                "neighbors of {owner:?}: {} keys but {} similarities",
                top_keys.len(),
                similarities.len()
            )));
        }
        if top_keys.iter().any(|k| k == owner) {
            return Err(SimilarityError::invalid(format!(
                "{owner:?} is listed as its own neighbor"
            )));
        }
        if similarities.iter().any(|s| !s.is_finite()) {
            return Err(SimilarityError::invalid(format!(
                "neighbors of {owner:?} contain a non-finite similarity"
            )));
        }
        if let Some(w) = similarities.windows(2).position(|w| w[0] < w[1]) {
            return Err(SimilarityError::invalid(format!(
                "neighbors of {owner:?} are not sorted: {} before {} at rank {w}",
                similarities[w],
                similarities[w + 1]
            )));
        }
        Ok(Self {
            top_keys,
            similarities,
        })
    }
}

impl<K> RankedNeighbors<K> {
    pub fn top_keys(&self) -> &[K] {
        &self.top_keys
    }

    pub fn similarities(&self) -> &[f64] {
        &self.similarities
    }

    pub fn len(&self) -> usize {
        self.top_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.top_keys.is_empty()
    }

    /// `(neighbor, similarity)` pairs, best first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
        self.top_keys.iter().zip(self.similarities.iter().copied())
    }

    pub fn into_parts(self) -> (Vec<K>, Vec<f64>) {
        (self.top_keys, self.similarities)
    }
}

impl<K: Clone> RankedNeighbors<K> {
    /// The first `n` neighbors (all of them when `n >= len()`).
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            top_keys: self.top_keys[..n].to_vec(),
            similarities: self.similarities[..n].to_vec(),
        }
    }
}

/// Per-document top-k neighbors, in the key order of the input store.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityResult<K: Eq + Hash> {
    k: usize,
    entries: IndexMap<K, RankedNeighbors<K>>,
}

impl<K> SimilarityResult<K>
where
    K: Clone + Eq + Hash + Debug,
{
    /// Assemble a result from already validated neighbor lists.
    ///
    /// # Errors
    /// [`SimilarityError::InvalidParameter`] if a key repeats or an entry's length is not `k`.
    pub fn from_entries<I>(k: usize, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, RankedNeighbors<K>)>,
    {
        let entries = entries.into_iter();
        let mut map = IndexMap::with_capacity(entries.size_hint().0);
        for (key, neighbors) in entries {
            if neighbors.len() != k {
                return Err(SimilarityError::invalid(format!(
                    "{key:?} has {} neighbors, expected {k}",
                    neighbors.len()
                )));
            }
            if map.contains_key(&key) {
                return Err(SimilarityError::invalid(format!("duplicate key {key:?}")));
            }
            map.insert(key, neighbors);
        }
        Ok(Self { k, entries: map })
    }

    /// A copy keeping only the first `top_n` neighbors of each key.
    ///
    /// Because rankings are totally ordered, this equals computing with `k = top_n`.
    ///
    /// # Errors
    /// [`SimilarityError::InvalidParameter`] unless `0 < top_n <= k`.
    pub fn truncated(&self, top_n: usize) -> Result<Self> {
        if top_n == 0 || top_n > self.k {
            return Err(SimilarityError::invalid(format!(
                "top_n must be greater than 0 and at most k ({}). Got top_n={top_n}",
                self.k
            )));
        }
        Ok(Self {
            k: top_n,
            entries: self
                .entries
                .iter()
                .map(|(key, n)| (key.clone(), n.head(top_n)))
                .collect(),
        })
    }
}

impl<K: Eq + Hash> SimilarityResult<K> {
    /// Number of neighbors per key.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&RankedNeighbors<K>> {
        self.entries.get(key)
    }

    /// Entries in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &RankedNeighbors<K>)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

impl<K: Eq + Hash> IntoIterator for SimilarityResult<K> {
    type Item = (K, RankedNeighbors<K>);
    type IntoIter = indexmap::map::IntoIter<K, RankedNeighbors<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbors(owner: u32, keys: &[u32], sims: &[f64]) -> RankedNeighbors<u32> {
        RankedNeighbors::new(&owner, keys.to_vec(), sims.to_vec()).unwrap()
    }

    #[test]
    fn test_ranked_neighbors_rejects_self() {
        let err = RankedNeighbors::new(&1u32, vec![2, 1], vec![0.9, 0.8]).unwrap_err();
        assert!(err.to_string().contains("own neighbor"));
    }

    #[test]
    fn test_ranked_neighbors_rejects_ascending_scores() {
        let err = RankedNeighbors::new(&1u32, vec![2, 3], vec![0.1, 0.8]).unwrap_err();
        assert!(err.to_string().contains("not sorted"));
    }

    #[test]
    fn test_ranked_neighbors_rejects_length_mismatch_and_nan() {
        assert!(RankedNeighbors::new(&1u32, vec![2, 3], vec![0.1]).is_err());
        assert!(RankedNeighbors::new(&1u32, vec![2], vec![f64::NAN]).is_err());
    }

    #[test]
    fn test_ties_are_accepted() {
        let n = neighbors(0, &[1, 2, 3], &[0.5, 0.5, 0.5]);
        assert_eq!(n.len(), 3);
    }

    #[test]
    fn test_from_entries_enforces_uniform_k() {
        let entries = vec![
            (1u32, neighbors(1, &[2, 3], &[0.9, 0.1])),
            (2u32, neighbors(2, &[1], &[0.9])),
        ];
        assert!(SimilarityResult::from_entries(2, entries).is_err());
    }

    #[test]
    fn test_from_entries_rejects_duplicate_keys() {
        let entries = vec![
            (1u32, neighbors(1, &[2], &[0.9])),
            (1u32, neighbors(1, &[3], &[0.2])),
        ];
        let err = SimilarityResult::from_entries(1, entries).unwrap_err();
        assert!(err.to_string().contains("duplicate key 1"));
    }

    #[test]
    fn test_truncated_keeps_prefix_and_order() {
        let result = SimilarityResult::from_entries(
            3,
            vec![
                (1u32, neighbors(1, &[4, 2, 3], &[0.9, 0.5, 0.1])),
                (2u32, neighbors(2, &[3, 1, 4], &[0.7, 0.5, -0.2])),
            ],
        )
        .unwrap();

        let head = result.truncated(2).unwrap();
        assert_eq!(head.k(), 2);
        assert_eq!(head.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(head.get(&1).unwrap().top_keys(), &[4, 2]);
        assert_eq!(head.get(&2).unwrap().similarities(), &[0.7, 0.5]);

        assert!(result.truncated(0).is_err());
        assert!(result.truncated(4).is_err());
        assert_eq!(result.truncated(3).unwrap(), result);
    }
}
