//! Error taxonomy shared by every component.
//!
//! Errors fall into four groups:
//!
//! | Variant | Handling |
//! |---------|----------|
//! | [`Error::Config`] | fatal at startup; the process does not start |
//! | [`Error::Ingestion`] | per document; the batch continues |
//! | [`Error::Gateway`], [`Error::RateLimited`], [`Error::Generation`] | retried with backoff, then surfaced as "temporarily unavailable" |
//! | [`Error::DimensionMismatch`], [`Error::ModelMismatch`] | fatal for the index; surfaced, never retried |

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single document could not be ingested.
    #[error("failed to ingest {source_name}: {reason}")]
    Ingestion { source_name: String, reason: String },

    /// Transport or protocol failure talking to the embedding API.
    #[error("embedding gateway error: {message}")]
    Gateway { message: String, retryable: bool },

    /// The external quota is exhausted (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport, quota, or protocol failure talking to the generation API.
    #[error("generation error: {message}")]
    Generation { message: String, retryable: bool },

    /// A vector's length differs from the dimension the index is bound to.
    #[error("vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector was produced by a different embedding model than the index holds.
    #[error("embedding model mismatch: index holds '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    /// Backend storage failure (SQLite, I/O).
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn ingestion(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Ingestion {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// A retryable gateway error (network failure, 5xx, timeout).
    pub fn gateway(message: impl Into<String>) -> Self {
        Error::Gateway {
            message: message.into(),
            retryable: true,
        }
    }

    /// A gateway error that retrying cannot fix (4xx other than 429, bad response shape).
    pub fn gateway_fatal(message: impl Into<String>) -> Self {
        Error::Gateway {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Error::Generation {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn generation_fatal(message: impl Into<String>) -> Self {
        Error::Generation {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited(_) => true,
            Error::Gateway { retryable, .. } | Error::Generation { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Whether the error comes from an external call (embedding or generation)
    /// and should be reported to the user as a temporary outage.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Error::Gateway { .. } | Error::RateLimited(_) | Error::Generation { .. }
        )
    }

    /// Index-integrity failures: the stored vectors and the configured model disagree.
    pub fn is_index_mismatch(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. } | Error::ModelMismatch { .. }
        )
    }
}
