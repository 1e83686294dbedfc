//! In-memory stores backing the pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CheckpointStore, TransactionSink};
use crate::error::{IndexerError, Result};
use crate::types::{InsertOutcome, Transaction};

/// In-memory checkpoint with the same forward-only semantics as the Postgres one.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    value: Mutex<Option<u64>>,
    history: Mutex<Vec<u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(block_number: u64) -> Self {
        Self {
            value: Mutex::new(Some(block_number)),
            history: Mutex::new(vec![block_number]),
        }
    }

    pub fn current(&self) -> Option<u64> {
        *self.value.lock().unwrap()
    }

    /// Every value the checkpoint has held, in write order.
    pub fn history(&self) -> Vec<u64> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self) -> Result<Option<u64>> {
        Ok(self.current())
    }

    async fn advance(&self, block_number: u64) -> Result<bool> {
        let mut value = self.value.lock().unwrap();
        match *value {
            Some(stored) if stored >= block_number => Ok(false),
            _ => {
                *value = Some(block_number);
                self.history.lock().unwrap().push(block_number);
                Ok(true)
            }
        }
    }
}

/// In-memory transaction table keyed by hash.
///
/// `fail_next` makes the next N `insert_batch` calls fail with `SinkFailed`,
/// which lets tests exercise the non-duplicate failure path.
#[derive(Default)]
pub struct MemoryTransactionSink {
    rows: Mutex<HashMap<String, Transaction>>,
    fail_next: AtomicU32,
}

impl MemoryTransactionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: u32) {
        self.fail_next.store(times, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.rows.lock().unwrap().contains_key(hash)
    }

    pub fn blocks(&self) -> Vec<i64> {
        let mut blocks: Vec<i64> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .map(|t| t.block_number)
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        blocks
    }
}

#[async_trait]
impl TransactionSink for MemoryTransactionSink {
    async fn insert_batch(&self, records: &[Transaction]) -> Result<InsertOutcome> {
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(IndexerError::SinkFailed("injected write failure".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        let mut outcome = InsertOutcome::default();
        for record in records {
            if rows.contains_key(&record.hash) {
                outcome.duplicates += 1;
            } else {
                rows.insert(record.hash.clone(), record.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: &str, block: i64) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            block_number: block,
            timestamp: 1_708_815_974_854,
            confirmations: 1,
            from_address: "NQ81 C01N BASE 0000 0000 0000 0000 0000 0000".to_string(),
            from_type: 0,
            to_address: "NQ57 M1NT JRQA FGD2 HX1P FN2G 611P JNAE K7HN".to_string(),
            to_type: 0,
            value: 1,
            fee: 0,
            sender_data: String::new(),
            recipient_data: String::new(),
            flags: 0,
            validity_start_height: block,
            proof: String::new(),
            network_id: 5,
            execution_result: true,
        }
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.get().await.unwrap(), None);
        assert!(store.advance(105).await.unwrap());
        assert!(!store.advance(103).await.unwrap());
        assert!(!store.advance(105).await.unwrap());
        assert_eq!(store.get().await.unwrap(), Some(105));
        assert_eq!(store.history(), vec![105]);
    }

    #[tokio::test]
    async fn duplicate_only_batch_is_a_success() {
        let sink = MemoryTransactionSink::new();
        let batch = vec![tx("a", 1), tx("b", 1)];
        let first = sink.insert_batch(&batch).await.unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, duplicates: 0 });

        let again = sink.insert_batch(&batch).await.unwrap();
        assert_eq!(again, InsertOutcome { inserted: 0, duplicates: 2 });
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn injected_failure_is_not_a_duplicate() {
        let sink = MemoryTransactionSink::new();
        sink.fail_next(1);
        let err = sink.insert_batch(&[tx("a", 1)]).await.unwrap_err();
        assert!(matches!(err, IndexerError::SinkFailed(_)));
        assert!(sink.is_empty());

        let ok = sink.insert_batch(&[tx("a", 1)]).await.unwrap();
        assert_eq!(ok.inserted, 1);
    }
}
