//! # Errors
//!
//! A single error type for the similarity core. Variants fall in three groups:
//!
//! - **Fatal input errors** ([`SimilarityError::InvalidParameter`],
//!   [`SimilarityError::EmbeddingsFormat`]): raised before any computation begins.
//!   Retrying without fixing the input is pointless.
//! - **Recoverable cache errors** ([`SimilarityError::StorageUnavailable`],
//!   [`SimilarityError::Deserialization`]): the caller treats them as "no cached
//!   result" and recomputes. See [`SimilarityError::is_cache_miss`].
//! - **Everything else**: write failures, cancellation, graph writer failures and
//!   plain I/O.
//!
//! Near-zero vectors are *not* an error. They are floored, logged with
//! `tracing::warn!` and listed in [`crate::similarity::ComputeReport`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the similarity engine, the result cache and the emit stage.
#[derive(Debug, Error)]
pub enum SimilarityError {
    /// Malformed input: `k` out of range, key/vector length mismatch, ragged or
    /// non-finite vectors, duplicate keys, zero batch sizes.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The cache artifact is missing or cannot be opened.
    #[error("similarity cache unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The cache artifact exists but is corrupt, truncated or from another format version.
    #[error("similarity cache at {} could not be decoded: {reason}", path.display())]
    Deserialization { path: PathBuf, reason: String },

    /// The cache artifact could not be written.
    #[error("failed to write similarity cache to {}: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },

    /// A line of the embeddings input could not be parsed.
    #[error("malformed embeddings input at line {line}: {reason}")]
    EmbeddingsFormat { line: usize, reason: String },

    /// Cooperative cancellation was observed between two batches.
    #[error("similarity computation cancelled after {completed} of {total} batches")]
    Cancelled { completed: usize, total: usize },

    /// A [`crate::graph_writer::GraphWriter`] rejected a batch.
    #[error("graph writer failed on batch {batch}: {reason}")]
    GraphWrite { batch: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SimilarityError {
    /// Shorthand for [`SimilarityError::InvalidParameter`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// `true` for the cache errors that mean "recompute instead".
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::Deserialization { .. }
        )
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, SimilarityError>;
