use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::provider::BlockSource;
use super::retry::{sleep_or_cancel, Backoff};
use crate::config::IndexerConfig;
use crate::db::{CheckpointStore, TransactionSink};
use crate::error::{IndexerError, Result};
use crate::types::{BlockRange, InsertOutcome};

/// Tracks which blocks of a range are done and exposes the highest block
/// below which nothing is missing.
///
/// Completions arrive in any order; only the contiguous prefix counts.
#[derive(Debug)]
pub struct Watermark {
    start: u64,
    end: u64,
    /// Lowest block of the range not yet confirmed.
    next: u64,
    /// Completed blocks above `next`, waiting for the hole to fill.
    pending: BTreeSet<u64>,
}

impl Watermark {
    pub fn new(range: BlockRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
            next: range.start,
            pending: BTreeSet::new(),
        }
    }

    /// Highest block `k` such that every block from the range start through `k`
    /// has completed, or `None` while the first block is outstanding.
    pub fn confirmed(&self) -> Option<u64> {
        if self.next > self.start {
            Some(self.next - 1)
        } else {
            None
        }
    }

    /// Record `block` as done. Returns the new confirmed block if the prefix grew.
    pub fn complete(&mut self, block: u64) -> Option<u64> {
        if block < self.next || block > self.end {
            return None;
        }
        self.pending.insert(block);

        let before = self.next;
        while self.pending.remove(&self.next) {
            self.next += 1;
        }

        if self.next > before {
            Some(self.next - 1)
        } else {
            None
        }
    }

    /// Blocks completed out of order that cannot be confirmed yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// What happened to a single block task.
#[derive(Debug)]
enum BlockOutcome {
    Ingested(InsertOutcome),
    /// Retry budget exhausted.
    Failed(IndexerError),
    /// Stopped by the cancellation token before finishing.
    Cancelled,
}

/// Summary of a backfill run, handed back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub range: BlockRange,
    /// Highest contiguously confirmed block of the range, if any.
    pub watermark: Option<u64>,
    /// Blocks that exhausted their attempts. The watermark never passes the lowest one.
    pub gaps: Vec<u64>,
    /// Rows written and duplicates skipped across every ingested block.
    pub totals: InsertOutcome,
    pub cancelled: bool,
}

impl BackfillReport {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty() && self.watermark == Some(self.range.end)
    }
}

/// Ingests a historical block range with bounded parallelism.
///
/// Workers only fetch and insert. The coordinator owns the [`Watermark`] and is
/// the only caller of [`CheckpointStore::advance`] during the run.
pub struct BackfillCoordinator {
    source: Arc<dyn BlockSource>,
    sink: Arc<dyn TransactionSink>,
    checkpoint: Arc<dyn CheckpointStore>,
    concurrency: usize,
    max_attempts: u32,
    backoff: Backoff,
}

impl BackfillCoordinator {
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
            concurrency: config.backfill_concurrency.max(1),
            max_attempts: config.max_block_attempts.max(1),
            backoff: Backoff::new(config.retry_base, config.retry_max),
        }
    }

    pub async fn run(&self, range: BlockRange, cancel: &CancellationToken) -> Result<BackfillReport> {
        let mut report = BackfillReport {
            range,
            watermark: None,
            gaps: Vec::new(),
            totals: InsertOutcome::default(),
            cancelled: false,
        };
        if range.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            "Backfill {} starting | blocks={} | concurrency={} | max_attempts={}",
            range,
            range.len(),
            self.concurrency,
            self.max_attempts
        );

        let mut watermark = Watermark::new(range);
        let mut persisted: Option<u64> = None;
        let mut blocks = range.iter();
        let mut join_set = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, u64> = HashMap::new();

        loop {
            // Top up to the concurrency limit; nothing new starts after cancellation.
            while join_set.len() < self.concurrency && !cancel.is_cancelled() {
                let Some(block) = blocks.next() else { break };
                let source = self.source.clone();
                let sink = self.sink.clone();
                let cancel = cancel.clone();
                let max_attempts = self.max_attempts;
                let backoff = self.backoff;
                let handle = join_set.spawn(async move {
                    ingest_block(source.as_ref(), sink.as_ref(), block, max_attempts, backoff, &cancel).await
                });
                in_flight.insert(handle.id(), block);
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };

            let id = match &joined {
                Ok((id, _)) => *id,
                Err(e) => e.id(),
            };
            let Some(block) = in_flight.remove(&id) else { continue };
            let outcome = joined.map(|(_, outcome)| outcome).unwrap_or_else(|e| {
                BlockOutcome::Failed(IndexerError::FetchFailed {
                    block,
                    cause: format!("block task panicked: {e}"),
                })
            });

            match outcome {
                BlockOutcome::Ingested(outcome) => {
                    report.totals += outcome;
                    if outcome.total() > 0 {
                        tracing::debug!(
                            block = block,
                            "Inserted {} transactions ({} duplicates)",
                            outcome.inserted,
                            outcome.duplicates
                        );
                    }

                    if let Some(confirmed) = watermark.complete(block) {
                        if self.persist(confirmed).await {
                            persisted = Some(confirmed);
                        }
                        tracing::info!(
                            block = confirmed,
                            "Backfill watermark {}/{} ({} blocks left, {} waiting on a lower block)",
                            confirmed,
                            range.end,
                            range.end - confirmed,
                            watermark.pending()
                        );
                    }
                }
                BlockOutcome::Failed(e) => {
                    tracing::error!(
                        block = block,
                        "Block failed after {} attempts, recording permanent gap: {}",
                        self.max_attempts,
                        e
                    );
                    report.gaps.push(block);
                }
                BlockOutcome::Cancelled => {
                    tracing::debug!(block = block, "Block abandoned on shutdown");
                }
            }
        }

        report.gaps.sort_unstable();
        report.watermark = watermark.confirmed();
        report.cancelled = cancel.is_cancelled();

        // A checkpoint write may have failed mid-run; the final one must land.
        if let Some(confirmed) = report.watermark {
            if persisted != Some(confirmed) {
                self.checkpoint.advance(confirmed).await?;
            }
        }

        if !report.gaps.is_empty() {
            tracing::error!(
                "Backfill {} left {} permanent gap(s): {}",
                range,
                report.gaps.len(),
                IndexerError::PermanentGap { blocks: report.gaps.clone() }
            );
        }
        tracing::info!(
            "Backfill {} finished | watermark={:?} | inserted={} | duplicates={} | cancelled={}",
            range,
            report.watermark,
            report.totals.inserted,
            report.totals.duplicates,
            report.cancelled
        );

        Ok(report)
    }

    /// Write the watermark; failures are logged and retried on the next advance.
    async fn persist(&self, confirmed: u64) -> bool {
        match self.checkpoint.advance(confirmed).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(block = confirmed, "Failed to advance checkpoint: {}", e);
                false
            }
        }
    }
}

/// Fetch and insert one block, retrying the pair up to `max_attempts` times.
async fn ingest_block(
    source: &dyn BlockSource,
    sink: &dyn TransactionSink,
    block: u64,
    max_attempts: u32,
    backoff: Backoff,
    cancel: &CancellationToken,
) -> BlockOutcome {
    let mut attempt = 1;
    loop {
        let result = match source.transactions_for_block(block).await {
            Ok(transactions) => sink.insert_batch(&transactions).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => return BlockOutcome::Ingested(outcome),
            Err(e) if attempt >= max_attempts || !e.is_retryable() => return BlockOutcome::Failed(e),
            Err(e) => {
                let delay = backoff.delay(attempt);
                tracing::warn!(
                    block = block,
                    "Attempt {}/{} failed: {}, retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                if !sleep_or_cancel(delay, cancel).await {
                    return BlockOutcome::Cancelled;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_completions_advance_one_by_one() {
        let mut w = Watermark::new(BlockRange::new(100, 104));
        assert_eq!(w.confirmed(), None);
        assert_eq!(w.complete(100), Some(100));
        assert_eq!(w.complete(101), Some(101));
        assert_eq!(w.confirmed(), Some(101));
    }

    #[test]
    fn out_of_order_completion_waits_for_the_hole() {
        let mut w = Watermark::new(BlockRange::new(100, 105));
        assert_eq!(w.complete(103), None);
        assert_eq!(w.complete(105), None);
        assert_eq!(w.complete(101), None);
        assert_eq!(w.pending(), 3);
        assert_eq!(w.confirmed(), None);

        assert_eq!(w.complete(100), Some(101));
        assert_eq!(w.complete(102), Some(103));
        assert_eq!(w.complete(104), Some(105));
        assert_eq!(w.pending(), 0);
    }

    #[test]
    fn gap_pins_the_watermark() {
        let mut w = Watermark::new(BlockRange::new(524, 550));
        for b in (524..=529).chain(531..=550) {
            w.complete(b);
        }
        assert_eq!(w.confirmed(), Some(529));
        assert_eq!(w.pending(), 20);
    }

    #[test]
    fn repeated_and_out_of_range_completions_are_ignored() {
        let mut w = Watermark::new(BlockRange::new(10, 12));
        assert_eq!(w.complete(10), Some(10));
        assert_eq!(w.complete(10), None);
        assert_eq!(w.complete(9), None);
        assert_eq!(w.complete(13), None);
        assert_eq!(w.confirmed(), Some(10));
    }

    #[test]
    fn watermark_from_block_zero() {
        let mut w = Watermark::new(BlockRange::new(0, 3));
        assert_eq!(w.confirmed(), None);
        assert_eq!(w.complete(0), Some(0));
        assert_eq!(w.confirmed(), Some(0));
    }

    #[test]
    fn report_completeness() {
        let report = BackfillReport {
            range: BlockRange::new(1, 5),
            watermark: Some(5),
            gaps: vec![],
            totals: InsertOutcome::default(),
            cancelled: false,
        };
        assert!(report.is_complete());

        let gapped = BackfillReport { gaps: vec![3], watermark: Some(2), ..report };
        assert!(!gapped.is_complete());
    }
}
