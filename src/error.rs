//! # Errors
//!
//! A single error type for the whole pipeline. The variants follow the three
//! failure families the pipeline has to contain:
//!
//! - **provider** failures: the embedding model or the completion endpoint
//!   failed, or did not answer in time ([`RagError::Provider`], [`RagError::Timeout`]),
//! - **index** failures: a collection is missing, not yet sealed, or rejected
//!   a write ([`RagError::Index`], [`RagError::CollectionNotFound`],
//!   [`RagError::DimensionMismatch`]),
//! - **data** failures: a corpus entry cannot be turned into canonical text
//!   ([`RagError::Data`]).
//!
//! The remaining variants cover configuration and I/O at the edges.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RagError>;

/// Everything that can go wrong while ingesting, retrieving or generating.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding model or the generative model failed.
    #[error("provider error ({provider}): {message}")]
    Provider {
        /// Which provider failed (`"embedding"`, `"completion"`, ...).
        provider: String,
        /// What went wrong.
        message: String,
    },

    /// An external call did not complete before its deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// The call that was abandoned.
        operation: &'static str,
        /// The deadline that was exceeded.
        elapsed: Duration,
    },

    /// The vector index refused or could not serve a request.
    #[error("index error ({collection}): {message}")]
    Index {
        /// Collection (or alias) involved.
        collection: String,
        /// What went wrong.
        message: String,
    },

    /// The named collection or alias does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A vector did not match the collection dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A corpus entry could not be canonicalized.
    #[error("data error: {0}")]
    Data(String),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl RagError {
    /// Shorthand for a [`RagError::Provider`].
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a [`RagError::Index`].
    pub fn index(collection: impl Into<String>, message: impl ToString) -> Self {
        Self::Index {
            collection: collection.into(),
            message: message.to_string(),
        }
    }

    /// `true` when the error only says a collection was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CollectionNotFound(_))
    }
}

impl From<async_openai::error::OpenAIError> for RagError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Self::provider("completion", err)
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        Self::provider("corpus-http", err)
    }
}

impl From<candle_core::Error> for RagError {
    fn from(err: candle_core::Error) -> Self {
        Self::provider("embedding", err)
    }
}
