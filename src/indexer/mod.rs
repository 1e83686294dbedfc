pub mod backfill;
pub mod provider;
pub mod realtime;
pub mod retry;

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, IndexerConfig};
use crate::db::{CheckpointStore, PgCheckpointStore, PgTransactionSink, TransactionSink};
use crate::error::Result;
use crate::types::BlockRange;
use backfill::{BackfillCoordinator, BackfillReport};
use provider::{BlockSource, RpcBlockSource};
use realtime::RealtimeTailer;

/// Lifecycle phases. `Realtime` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrap,
    Backfill(BlockRange),
    Realtime(u64),
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Bootstrap => write!(f, "BOOTSTRAP"),
            Phase::Backfill(range) => write!(f, "BACKFILL {range}"),
            Phase::Realtime(next) => write!(f, "REALTIME from {next}"),
        }
    }
}

/// Where ingestion starts and whether a backfill precedes the tailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPlan {
    pub genesis: u64,
    pub latest: u64,
    pub checkpoint: Option<u64>,
    /// First block not yet ingested.
    pub next_block: u64,
    /// Distance from `next_block` to the chain tip.
    pub gap: u64,
    pub backfill: Option<BlockRange>,
}

impl StartPlan {
    /// The phase entered after bootstrap.
    pub fn first_phase(&self) -> Phase {
        match self.backfill {
            Some(range) => Phase::Backfill(range),
            None => Phase::Realtime(self.next_block),
        }
    }
}

/// Decide the resume point and the backfill range from the chain bounds and
/// the stored checkpoint.
///
/// The resume point is the first block after `max(checkpoint, start_block - 1, genesis - 1)`.
/// Backfill covers `[next_block, latest - tip_buffer]` when the gap exceeds the
/// threshold and that range is non-empty; the tailer handles the rest.
pub fn plan_start(genesis: u64, latest: u64, checkpoint: Option<u64>, config: &IndexerConfig) -> StartPlan {
    let after_checkpoint = checkpoint.map_or(0, |c| c + 1);
    let next_block = after_checkpoint.max(config.start_block).max(genesis);
    let gap = latest.saturating_sub(next_block);

    let backfill = if gap > config.backfill_threshold {
        let range = BlockRange::new(next_block, latest.saturating_sub(config.tip_buffer));
        (!range.is_empty()).then_some(range)
    } else {
        None
    };

    StartPlan {
        genesis,
        latest,
        checkpoint,
        next_block,
        gap,
        backfill,
    }
}

/// Drives bootstrap, backfill, and real-time tailing over injected components.
pub struct Indexer {
    source: Arc<dyn BlockSource>,
    sink: Arc<dyn TransactionSink>,
    checkpoint: Arc<dyn CheckpointStore>,
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(
        source: Arc<dyn BlockSource>,
        sink: Arc<dyn TransactionSink>,
        checkpoint: Arc<dyn CheckpointStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            source,
            sink,
            checkpoint,
            config,
        }
    }

    /// Read chain bounds and the checkpoint. Any failure here is fatal: the
    /// indexer must not start ingesting with unknown bounds.
    pub async fn bootstrap(&self) -> Result<StartPlan> {
        let genesis = self.source.genesis_block_number().await?;
        let latest = self.source.latest_block_number().await?;
        let checkpoint = self.checkpoint.get().await?;

        tracing::info!("Genesis block: {}", genesis);
        tracing::info!("Latest block: {}", latest);
        tracing::info!("Stored checkpoint: {:?}", checkpoint);

        let plan = plan_start(genesis, latest, checkpoint, &self.config);
        tracing::info!(
            "Resuming from block {} ({} blocks behind tip, threshold {})",
            plan.next_block,
            plan.gap,
            self.config.backfill_threshold
        );
        if plan.backfill.is_none() && plan.gap > self.config.backfill_threshold {
            tracing::info!(
                "Gap is within the {}-block tip buffer, leaving it to the real-time tailer",
                self.config.tip_buffer
            );
        }
        Ok(plan)
    }

    /// Run the full lifecycle until `cancel` fires. Returns `Err` only when
    /// bootstrap fails.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!("Phase: {}", Phase::Bootstrap);
        let plan = self.bootstrap().await?;

        let next_block = match plan.backfill {
            Some(range) => {
                tracing::info!("Phase: {}", plan.first_phase());
                let report = self.backfill(range, cancel).await;
                match report {
                    Ok(report) if report.cancelled => {
                        tracing::info!("Shutdown during backfill, watermark {:?}", report.watermark);
                        return Ok(());
                    }
                    Ok(report) => {
                        if let Some(first_gap) = report.gaps.first() {
                            tracing::warn!(
                                block = *first_gap,
                                "Real-time tailer will revisit from the first gap ({} gap(s) total)",
                                report.gaps.len()
                            );
                        }
                        report.watermark.map_or(plan.next_block, |w| w + 1)
                    }
                    Err(e) => {
                        tracing::error!("Backfill could not persist its watermark: {}", e);
                        self.resume_after_failed_backfill(plan.next_block).await
                    }
                }
            }
            None => plan.next_block,
        };

        if cancel.is_cancelled() {
            return Ok(());
        }

        tracing::info!("Phase: {}", Phase::Realtime(next_block));
        let tailer = RealtimeTailer::new(
            self.source.clone(),
            self.sink.clone(),
            self.checkpoint.clone(),
            &self.config,
        );
        tailer.run(next_block, cancel).await;
        Ok(())
    }

    pub async fn backfill(&self, range: BlockRange, cancel: &CancellationToken) -> Result<BackfillReport> {
        let coordinator = BackfillCoordinator::new(
            self.source.clone(),
            self.sink.clone(),
            self.checkpoint.clone(),
            &self.config,
        );
        coordinator.run(range, cancel).await
    }

    async fn resume_after_failed_backfill(&self, fallback: u64) -> u64 {
        match self.checkpoint.get().await {
            Ok(Some(stored)) => (stored + 1).max(fallback),
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!("Could not re-read checkpoint, resuming from {}: {}", fallback, e);
                fallback
            }
        }
    }
}

/// Wire the Postgres stores and the RPC source, then run the indexer.
pub async fn run_indexer(pool: PgPool, config: &Config, cancel: CancellationToken) -> Result<()> {
    let source = RpcBlockSource::new(config.rpc_url.clone(), config.indexer.rpc_timeout)?;

    tracing::info!(
        "Starting indexer | rpc={} | start_block={} | concurrency={} | threshold={} | tip_buffer={} | block_time={:?}",
        config.masked_rpc_url(),
        config.indexer.start_block,
        config.indexer.backfill_concurrency,
        config.indexer.backfill_threshold,
        config.indexer.tip_buffer,
        config.indexer.block_time
    );

    let indexer = Indexer::new(
        Arc::new(source),
        Arc::new(PgTransactionSink::new(pool.clone())),
        Arc::new(PgCheckpointStore::new(pool)),
        config.indexer.clone(),
    );
    indexer.run(&cancel).await
}
