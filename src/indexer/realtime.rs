use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::provider::BlockSource;
use super::retry::{sleep_or_cancel, Backoff};
use crate::config::IndexerConfig;
use crate::db::{CheckpointStore, TransactionSink};
use crate::error::Result;
use crate::types::InsertOutcome;

/// Sequential, cadence-paced ingestion of new blocks.
///
/// Block `n + 1` is never fetched before block `n`'s checkpoint write has
/// completed. A failure leaves `n` in place and retries it after a backoff.
/// Blocks at or below the last observed tip are taken back to back; the block
/// time only paces the tailer once it has caught up.
pub struct RealtimeTailer {
    source: Arc<dyn BlockSource>,
    sink: Arc<dyn TransactionSink>,
    checkpoint: Arc<dyn CheckpointStore>,
    block_time: Duration,
    backoff: Backoff,
}

/// Result of one tailer step, exposed for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Block ingested and checkpointed.
    Advanced(InsertOutcome),
    /// Block not produced yet; nothing written.
    Waiting,
    /// Fetch, insert, or checkpoint failed; nothing skipped.
    Failed,
}

impl RealtimeTailer {
    pub fn new(
        source: Arc<dyn BlockSource>,
        sink: Arc<dyn TransactionSink>,
        checkpoint: Arc<dyn CheckpointStore>,
        config: &IndexerConfig,
    ) -> Self {
        Self {
            source,
            sink,
            checkpoint,
            block_time: config.block_time,
            backoff: Backoff::new(config.retry_base, config.retry_max),
        }
    }

    /// Tail from `next_block` until `cancel` fires. Returns the next block that
    /// would have been ingested.
    pub async fn run(&self, next_block: u64, cancel: &CancellationToken) -> u64 {
        tracing::info!(
            block = next_block,
            "Real-time tailing from block {} (block time {:?})",
            next_block,
            self.block_time
        );

        let mut current = next_block;
        let mut tip: Option<u64> = None;
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = match self.step(current, &mut tip).await {
                Step::Advanced(outcome) => {
                    if outcome.inserted > 0 {
                        tracing::info!(
                            block = current,
                            "{} - Inserted {} transactions ({} duplicates). Tip: {:?}",
                            current,
                            outcome.inserted,
                            outcome.duplicates,
                            tip
                        );
                    } else {
                        tracing::debug!(block = current, "{} - No new transactions", current);
                    }
                    current += 1;
                    failures = 0;
                    // Still behind the known tip: catch up without waiting for the cadence.
                    if tip.is_some_and(|t| current <= t) {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    self.block_time
                }
                Step::Waiting => self.block_time,
                Step::Failed => {
                    failures += 1;
                    self.backoff.delay(failures).max(self.block_time)
                }
            };

            if !sleep_or_cancel(delay, cancel).await {
                break;
            }
        }

        tracing::info!(block = current, "Real-time tailer stopped before block {}", current);
        current
    }

    /// Process `block` once. `tip` caches the last observed chain height so the
    /// node is only asked again once we have caught up with it.
    pub async fn step(&self, block: u64, tip: &mut Option<u64>) -> Step {
        if tip.map_or(true, |t| block > t) {
            match self.source.latest_block_number().await {
                Ok(latest) => *tip = Some(latest),
                Err(e) => {
                    tracing::warn!(block = block, "Failed to refresh chain tip: {}", e);
                    return Step::Failed;
                }
            }
            if tip.is_some_and(|t| block > t) {
                tracing::debug!(block = block, "Block not produced yet, waiting");
                return Step::Waiting;
            }
        }

        match self.ingest(block).await {
            Ok(outcome) => Step::Advanced(outcome),
            Err(e) => {
                tracing::error!(block = block, "Real-time ingestion failed, will retry same block: {}", e);
                Step::Failed
            }
        }
    }

    async fn ingest(&self, block: u64) -> Result<InsertOutcome> {
        let transactions = self.source.transactions_for_block(block).await?;
        let outcome = self.sink.insert_batch(&transactions).await?;
        self.checkpoint.advance(block).await?;
        Ok(outcome)
    }
}
