//! # ResultStore
//!
//! Durable cache for a [`SimilarityResult`], so the `O(n²)` computation runs once and
//! the emit stage can be repeated with different `top_n` values.
//!
//! ## File layout
//! One `bincode` document:
//!
//! ```text
//! CacheFile {
//!     magic:          b"LITSIMTK",
//!     format_version: u32,
//!     checksum:       blake3(payload),
//!     payload:        bincode(Payload { k, created_at, fingerprint, entries }),
//! }
//! ```
//!
//! Entries keep the key order of the result and carry the full-precision `f64`
//! scores, so a round trip is exact.
//!
//! Files are written to a temporary sibling and renamed into place, so readers never
//! observe a half-written cache.
//!
//! ## Failure policy
//! - missing / unopenable file → [`SimilarityError::StorageUnavailable`]
//! - bad magic, other version, checksum mismatch, undecodable payload or an entry that
//!   breaks a result invariant → [`SimilarityError::Deserialization`]
//!
//! Both are cache misses: [`ResultStore::load_or_none`] and
//! [`ResultStore::load_matching`] log them and return `None` so the caller recomputes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs;
use std::hash::Hash;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, SimilarityError};
use crate::result::{RankedNeighbors, SimilarityResult};

const MAGIC: [u8; 8] = *b"LITSIMTK";

/// Bumped whenever the payload layout changes; older files become cache misses.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CacheFile {
    magic: [u8; 8],
    format_version: u32,
    checksum: [u8; 32],
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Payload<E> {
    k: usize,
    created_at: String,
    fingerprint: Option<String>,
    entries: Vec<E>,
}

#[derive(Serialize)]
struct EntryRef<'a, K> {
    key: &'a K,
    top_keys: &'a [K],
    similarities: &'a [f64],
}

#[derive(Deserialize)]
struct Entry<K> {
    key: K,
    top_keys: Vec<K>,
    similarities: Vec<f64>,
}

/// Descriptive fields stored next to a cached result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetadata {
    pub k: usize,
    pub documents: usize,
    pub created_at: DateTime<Utc>,
    /// [`crate::vector_store::VectorStore::fingerprint`] of the input, when known.
    pub fingerprint: Option<String>,
}

/// A result read back from disk together with its metadata.
#[derive(Debug, Clone)]
pub struct CachedResult<K: Eq + Hash> {
    pub metadata: CacheMetadata,
    pub result: SimilarityResult<K>,
}

/// File-backed cache for one similarity result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `result` atomically, replacing any previous cache.
    ///
    /// # Errors
    /// [`SimilarityError::Storage`] if the directory cannot be created or the file
    /// cannot be written or renamed into place.
    pub fn save<K>(&self, result: &SimilarityResult<K>, fingerprint: Option<&str>) -> Result<()>
    where
        K: Serialize + Eq + Hash,
    {
        let storage_err = |reason: String| SimilarityError::Storage {
            path: self.path.clone(),
            reason,
        };
        let config = bincode::config::standard();

        let payload = Payload {
            k: result.k(),
            created_at: Utc::now().to_rfc3339(),
            fingerprint: fingerprint.map(str::to_string),
            entries: result
                .iter()
                .map(|(key, neighbors)| EntryRef {
                    key,
                    top_keys: neighbors.top_keys(),
                    similarities: neighbors.similarities(),
                })
                .collect::<Vec<_>>(),
        };
        let payload = bincode::serde::encode_to_vec(&payload, config)
            .map_err(|e| storage_err(format!("encoding failed: {e}")))?;
        let file = CacheFile {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            checksum: *blake3::hash(&payload).as_bytes(),
            payload,
        };
        let bytes = bincode::serde::encode_to_vec(&file, config)
            .map_err(|e| storage_err(format!("encoding failed: {e}")))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| storage_err(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| storage_err(e.to_string()))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| storage_err(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| storage_err(e.error.to_string()))?;

        info!(
            "Similarity results saved to {} ({} documents, k={}, {} bytes).",
            self.path.display(),
            result.len(),
            result.k(),
            bytes.len()
        );
        Ok(())
    }

    /// Read the cached result back.
    ///
    /// # Errors
    /// [`SimilarityError::StorageUnavailable`] or [`SimilarityError::Deserialization`],
    /// see the module docs.
    pub fn load<K>(&self) -> Result<CachedResult<K>>
    where
        K: DeserializeOwned + Clone + Eq + Hash + Debug,
    {
        let bytes = fs::read(&self.path).map_err(|source| SimilarityError::StorageUnavailable {
            path: self.path.clone(),
            source,
        })?;
        let corrupt = |reason: String| SimilarityError::Deserialization {
            path: self.path.clone(),
            reason,
        };
        let config = bincode::config::standard();

        let (file, read): (CacheFile, usize) = bincode::serde::decode_from_slice(&bytes, config)
            .map_err(|e| corrupt(format!("invalid container: {e}")))?;
        if read != bytes.len() {
            return Err(corrupt(format!(
                "{} trailing bytes after container",
                bytes.len() - read
            )));
        }
        if file.magic != MAGIC {
            return Err(corrupt("not a similarity cache file".into()));
        }
        if file.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} is not supported (expected {FORMAT_VERSION})",
                file.format_version
            )));
        }
        if blake3::hash(&file.payload).as_bytes() != &file.checksum {
            return Err(corrupt("checksum mismatch".into()));
        }

        let (payload, _): (Payload<Entry<K>>, usize) =
            bincode::serde::decode_from_slice(&file.payload, config)
                .map_err(|e| corrupt(format!("invalid payload: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&payload.created_at)
            .map_err(|e| corrupt(format!("invalid timestamp: {e}")))?
            .with_timezone(&Utc);

        let entries = payload
            .entries
            .into_iter()
            .map(|entry| {
                RankedNeighbors::new(&entry.key, entry.top_keys, entry.similarities)
                    .map(|neighbors| (entry.key, neighbors))
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| corrupt(e.to_string()))?;
        let result =
            SimilarityResult::from_entries(payload.k, entries).map_err(|e| corrupt(e.to_string()))?;

        info!("Similarity results loaded from {}.", self.path.display());
        Ok(CachedResult {
            metadata: CacheMetadata {
                k: payload.k,
                documents: result.len(),
                created_at,
                fingerprint: payload.fingerprint,
            },
            result,
        })
    }

    /// [`ResultStore::load`], turning cache misses into `None`.
    ///
    /// Errors other than cache misses cannot occur here; anything unexpected is logged
    /// and also treated as a miss.
    pub fn load_or_none<K>(&self) -> Option<CachedResult<K>>
    where
        K: DeserializeOwned + Clone + Eq + Hash + Debug,
    {
        match self.load() {
            Ok(cached) => Some(cached),
            Err(SimilarityError::StorageUnavailable { path, source }) => {
                warn!("No cached similarities at {}: {source}", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unusable similarity cache: {e}");
                None
            }
        }
    }

    /// A cached result usable for input `fingerprint` with at least `k` neighbors,
    /// truncated to exactly `k`.
    pub fn load_matching<K>(&self, fingerprint: &str, k: usize) -> Option<SimilarityResult<K>>
    where
        K: DeserializeOwned + Clone + Eq + Hash + Debug,
    {
        let cached = self.load_or_none::<K>()?;
        if cached.metadata.fingerprint.as_deref() != Some(fingerprint) {
            info!("Cached similarities were computed for different embeddings; recomputing.");
            return None;
        }
        if cached.metadata.k < k {
            info!(
                "Cached similarities hold top-{} but top-{k} was requested; recomputing.",
                cached.metadata.k
            );
            return None;
        }
        debug!(
            "Reusing cached top-{} similarities from {}",
            cached.metadata.k, cached.metadata.created_at
        );
        cached.result.truncated(k).ok()
    }
}

/// Save `result` to `path` without a fingerprint.
pub fn save<K>(result: &SimilarityResult<K>, path: &Path) -> Result<()>
where
    K: Serialize + Eq + Hash,
{
    ResultStore::new(path).save(result, None)
}

/// Load the result stored at `path`.
pub fn load<K>(path: &Path) -> Result<SimilarityResult<K>>
where
    K: DeserializeOwned + Clone + Eq + Hash + Debug,
{
    ResultStore::new(path).load().map(|cached| cached.result)
}
