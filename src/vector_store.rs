//! # VectorStore
//!
//! Read-only input of the similarity engine: an ordered list of document keys and
//! one embedding row per key, all of the same dimensionality.
//!
//! ## Responsibilities
//! - **Validation**: every invariant the engine relies on is checked once, here:
//!   `len(keys) == rows`, uniform non-zero dimension, finite values, unique keys.
//! - **Layout**: rows are stored in one contiguous row-major `Vec<f64>` so batches
//!   are plain slices.
//! - **Ingest**: [`read_embeddings`] parses the files produced by the embedding
//!   pipeline (`.csv` or `.jsonl`).
//! - **Fingerprinting**: [`VectorStore::fingerprint`] identifies an input snapshot so
//!   a cached result is only reused for the exact same keys and vectors.
//!
//! Row order is significant: row `i` belongs to `keys()[i]`, and the engine reports
//! neighbors in terms of that order when breaking ties.
//!
//! ## Quick Example
//! ```
//! use litsim::vector_store::VectorStore;
//!
//! let store = VectorStore::new(
//!     vec!["a", "b", "c"],
//!     vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
//! ).unwrap();
//! assert_eq!(store.len(), 3);
//! assert_eq!(store.dimension(), 2);
//! assert_eq!(store.row(2), &[1.0, 1.0]);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt::Debug;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, SimilarityError};

/// Ordered `(key, vector)` collection with a shared dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore<K> {
    keys: Vec<K>,
    /// Row-major `keys.len() × dimension` matrix.
    data: Vec<f64>,
    dimension: usize,
}

impl<K> VectorStore<K>
where
    K: Clone + Eq + Hash + Debug,
{
    /// Build a store from one row per key.
    ///
    /// # Errors
    /// [`SimilarityError::InvalidParameter`] when the store would be empty, when the
    /// number of keys and rows differ, when rows have different or zero length, when a
    /// value is NaN or infinite, or when a key repeats.
    pub fn new(keys: Vec<K>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if keys.len() != rows.len() {
            return Err(SimilarityError::invalid(format!(
                "keys length must match vectors count: {} keys for {} vectors",
                keys.len(),
                rows.len()
            )));
        }
        let dimension = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                return Err(SimilarityError::invalid(format!(
                    "vector {i} has dimension {} but the first vector has dimension {dimension}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Self::from_flat(keys, data, dimension)
    }

    /// Build a store from an already flattened row-major matrix.
    ///
    /// # Errors
    /// Same conditions as [`VectorStore::new`], plus `data.len() != keys.len() * dimension`.
    pub fn from_flat(keys: Vec<K>, data: Vec<f64>, dimension: usize) -> Result<Self> {
        if keys.is_empty() {
            return Err(SimilarityError::invalid("vector store must hold at least one vector"));
        }
        if dimension == 0 {
            return Err(SimilarityError::invalid("vectors must have at least one dimension"));
        }
        if data.len() != keys.len() * dimension {
            return Err(SimilarityError::invalid(format!(
                "keys length must match vectors count: {} keys for {} values of dimension {dimension}",
                keys.len(),
                data.len()
            )));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(SimilarityError::invalid(format!(
                "vector {} contains a non-finite value ({})",
                pos / dimension,
                data[pos]
            )));
        }

        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(key) {
                return Err(SimilarityError::invalid(format!("duplicate key {key:?}")));
            }
        }

        Ok(Self {
            keys,
            data,
            dimension,
        })
    }
}

impl<K> VectorStore<K> {
    /// Number of documents.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always `false` for a constructed store; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Keys in row order.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// Row `i` of the matrix.
    ///
    /// # Panics
    /// Panics if `i >= len()`.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    /// The whole row-major matrix.
    pub fn as_flat(&self) -> &[f64] {
        &self.data
    }

    /// Iterate `(key, row)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &[f64])> {
        self.keys.iter().zip(self.data.chunks_exact(self.dimension))
    }
}

impl<K: Serialize> VectorStore<K> {
    /// Hex blake3 digest over the keys, the dimension and the exact bit pattern of
    /// every value. Two stores with the same fingerprint produce the same result.
    pub fn fingerprint(&self) -> Result<String> {
        let key_bytes = bincode::serde::encode_to_vec(&self.keys, bincode::config::standard())
            .map_err(|e| SimilarityError::invalid(format!("keys cannot be fingerprinted: {e}")))?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&key_bytes);
        hasher.update(&(self.dimension as u64).to_le_bytes());
        for v in &self.data {
            hasher.update(&v.to_le_bytes());
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// One line of a `.jsonl` embeddings export.
#[derive(Debug, Deserialize)]
struct EmbeddingRecord {
    id: JsonValue,
    embedding: Vec<f64>,
}

/// Read an embeddings file into a store keyed by document id.
///
/// The format is picked by extension:
/// - `.jsonl`: `{"id": 123, "embedding": [0.1, ...]}` per line; numeric ids are
///   stringified.
/// - anything else is read as the embedding pipeline's CSV:
///   `|123|,|[0.1, 0.2, ...]|` per line (the `|` or `"` quotes are optional).
///
/// Blank lines are skipped. Any id is accepted here; only
/// [`crate::graph_writer::CypherBatchWriter`] requires integer ids.
///
/// # Errors
/// - [`SimilarityError::Io`] if the file cannot be opened or read.
/// - [`SimilarityError::EmbeddingsFormat`] for an unparsable line (1-based line number).
/// - [`SimilarityError::InvalidParameter`] if the parsed rows violate a
///   [`VectorStore`] invariant.
pub fn read_embeddings(path: &Path) -> Result<VectorStore<String>> {
    let jsonl = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
    info!("Reading embeddings from {}", path.display());

    let reader = BufReader::new(File::open(path)?);
    let mut keys = Vec::new();
    let mut rows = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, row) = if jsonl {
            parse_jsonl_line(line)
        } else {
            parse_csv_line(line)
        }
        .map_err(|reason| SimilarityError::EmbeddingsFormat {
            line: idx + 1,
            reason,
        })?;
        keys.push(key);
        rows.push(row);
    }

    debug!("Parsed {} embedding rows", rows.len());
    VectorStore::new(keys, rows)
}

fn strip_quotes(field: &str) -> &str {
    field.trim().trim_matches(|c| c == '|' || c == '"').trim()
}

fn parse_csv_line(line: &str) -> std::result::Result<(String, Vec<f64>), String> {
    let (id, vector) = line
        .split_once(',')
        .ok_or_else(|| "expected `<id>,<vector>`".to_string())?;
    let id = strip_quotes(id);
    if id.is_empty() {
        return Err("empty document id".into());
    }
    let row: Vec<f64> =
        serde_json::from_str(strip_quotes(vector)).map_err(|e| format!("bad vector: {e}"))?;
    Ok((id.to_string(), row))
}

fn parse_jsonl_line(line: &str) -> std::result::Result<(String, Vec<f64>), String> {
    let record: EmbeddingRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let id = match record.id {
        JsonValue::String(s) if !s.is_empty() => s,
        JsonValue::Number(n) => n.to_string(),
        other => return Err(format!("unsupported document id {other}")),
    };
    Ok((id, record.embedding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_new_rejects_length_mismatch() {
        let err = VectorStore::new(vec![1, 2, 3], vec![vec![1.0], vec![2.0]]).unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidParameter(_)));
        assert!(err.to_string().contains("3 keys for 2 vectors"));
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = VectorStore::new(vec![1, 2], vec![vec![1.0, 0.0], vec![2.0]]).unwrap_err();
        assert!(err.to_string().contains("vector 1 has dimension 1"));
    }

    #[test]
    fn test_new_rejects_non_finite_and_duplicates() {
        let nan = VectorStore::new(vec![1, 2], vec![vec![1.0], vec![f64::NAN]]);
        assert!(matches!(nan, Err(SimilarityError::InvalidParameter(_))));

        let dup = VectorStore::new(vec![7, 7], vec![vec![1.0], vec![2.0]]).unwrap_err();
        assert!(dup.to_string().contains("duplicate key 7"));
    }

    #[test]
    fn test_new_rejects_empty_and_zero_dimension() {
        let empty = VectorStore::<u32>::new(vec![], vec![]);
        assert!(matches!(empty, Err(SimilarityError::InvalidParameter(_))));
        let zero_dim = VectorStore::new(vec![1], vec![vec![]]);
        assert!(matches!(zero_dim, Err(SimilarityError::InvalidParameter(_))));
    }

    #[test]
    fn test_rows_and_iteration_follow_key_order() {
        let store =
            VectorStore::new(vec!["x", "y"], vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(store.row(1), &[3.0, 4.0]);
        let collected: Vec<_> = store.iter().map(|(k, r)| (*k, r.to_vec())).collect();
        assert_eq!(
            collected,
            vec![("x", vec![1.0, 2.0]), ("y", vec![3.0, 4.0])]
        );
    }

    #[test]
    fn test_fingerprint_tracks_keys_and_values() {
        let a = VectorStore::new(vec![1u32, 2], vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let same = a.clone();
        let moved = VectorStore::new(vec![1u32, 2], vec![vec![1.0, 0.0], vec![0.0, 1.5]]).unwrap();
        let renamed = VectorStore::new(vec![1u32, 3], vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();

        let fp = a.fingerprint().unwrap();
        assert_eq!(fp, same.fingerprint().unwrap());
        assert_ne!(fp, moved.fingerprint().unwrap());
        assert_ne!(fp, renamed.fingerprint().unwrap());
    }

    #[test]
    fn test_read_embeddings_csv() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "|34567|,|[0.1, 0.2, 0.3]|").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "\"34568\",\"[1e-05, -0.5, 2]\"").unwrap();
        writeln!(file, "34569,[0, 0, 1]").unwrap();

        let store = read_embeddings(file.path()).unwrap();
        assert_eq!(store.keys(), &["34567", "34568", "34569"]);
        assert_eq!(store.dimension(), 3);
        assert_eq!(store.row(1), &[1e-05, -0.5, 2.0]);
    }

    #[test]
    fn test_read_embeddings_jsonl() {
        let mut file = Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"id": 101, "embedding": [1.0, 0.0]}}"#).unwrap();
        writeln!(file, r#"{{"id": "PMC9", "embedding": [0.0, 1.0]}}"#).unwrap();

        let store = read_embeddings(file.path()).unwrap();
        assert_eq!(store.keys(), &["101", "PMC9"]);
        assert_eq!(store.row(0), &[1.0, 0.0]);
    }

    #[test]
    fn test_read_embeddings_reports_bad_line() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "|1|,|[0.1, 0.2]|").unwrap();
        writeln!(file, "|2|,|[0.1, oops]|").unwrap();

        match read_embeddings(file.path()) {
            Err(SimilarityError::EmbeddingsFormat { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected EmbeddingsFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_read_embeddings_missing_file() {
        let err = read_embeddings(Path::new("definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, SimilarityError::Io(_)));
    }
}
