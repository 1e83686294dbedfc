use async_trait::async_trait;
use sqlx::PgPool;

use super::{CheckpointStore, CHECKPOINT_ID};
use crate::error::{IndexerError, Result};

/// Postgres-backed checkpoint stored in the `last_indexed_block` table.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Block numbers are `u64` in the pipeline and `BIGINT` in Postgres.
pub(crate) fn to_db_block(block_number: u64) -> Result<i64> {
    i64::try_from(block_number)
        .map_err(|_| IndexerError::Config(format!("block {block_number} does not fit in BIGINT")))
}

pub(crate) fn from_db_block(stored: i64) -> Result<u64> {
    u64::try_from(stored).map_err(|_| IndexerError::Config(format!("stored checkpoint {stored} is negative")))
}

/// Get the last indexed block number, if one was ever written.
pub async fn get_last_block(pool: &PgPool) -> Result<Option<i64>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT block_number
        FROM last_indexed_block
        WHERE id = $1
        "#,
    )
    .bind(CHECKPOINT_ID)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0))
}

/// Upsert the checkpoint, but only forward. The comparison and the write are
/// one statement, so the stored value never decreases.
///
/// Returns `true` when a row was inserted or updated.
pub async fn advance_last_block(pool: &PgPool, block_number: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO last_indexed_block (id, block_number, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (id) DO UPDATE SET
            block_number = EXCLUDED.block_number,
            updated_at = NOW()
        WHERE last_indexed_block.block_number < EXCLUDED.block_number
        "#,
    )
    .bind(CHECKPOINT_ID)
    .bind(block_number)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get(&self) -> Result<Option<u64>> {
        get_last_block(&self.pool).await?.map(from_db_block).transpose()
    }

    async fn advance(&self, block_number: u64) -> Result<bool> {
        let advanced = advance_last_block(&self.pool, to_db_block(block_number)?).await?;
        if !advanced {
            tracing::warn!(block = block_number, "Ignored non-advancing checkpoint write");
        }
        Ok(advanced)
    }
}
