//! Persistence: the checkpoint singleton and the transactions table.
//!
//! Both are reached through traits so the ingestion pipeline can run against
//! Postgres in production and the in-memory stores in tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{InsertOutcome, Transaction};

pub mod checkpoint;
pub mod memory;
pub mod transactions;

pub use checkpoint::PgCheckpointStore;
pub use memory::{MemoryCheckpointStore, MemoryTransactionSink};
pub use transactions::PgTransactionSink;

/// Key of the singleton checkpoint row.
pub const CHECKPOINT_ID: &str = "lastIndexedBlock";

/// Persists the highest block whose transactions are all durably stored.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `None` until the first checkpoint is ever written.
    async fn get(&self) -> Result<Option<u64>>;

    /// Move the checkpoint to `block_number` if it is strictly greater than the
    /// stored value. Returns `true` when the stored value changed.
    async fn advance(&self, block_number: u64) -> Result<bool>;
}

/// Idempotent bulk insert keyed on transaction hash.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    async fn insert_batch(&self, records: &[Transaction]) -> Result<InsertOutcome>;
}
