//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors raised while bootstrapping or ingesting blocks.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The node could not be reached or answered with something unusable.
    #[error("RPC source unavailable: {0}")]
    SourceUnavailable(String),

    /// Fetching the transactions of a single block failed (timeout, transport, bad body).
    #[error("Fetching block {block} failed: {cause}")]
    FetchFailed { block: u64, cause: String },

    /// A store write failed for a reason other than a duplicate hash.
    #[error("Transaction sink failed: {0}")]
    SinkFailed(String),

    /// Blocks that exhausted their retry budget during backfill.
    #[error("Permanent gap at block(s) {blocks:?}")]
    PermanentGap { blocks: Vec<u64> },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IndexerError {
    /// Returns `true` for failures that a later attempt may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_) | Self::FetchFailed { .. } | Self::SinkFailed(_)
        )
    }
}

pub type Result<T, E = IndexerError> = std::result::Result<T, E>;
