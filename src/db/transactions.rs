use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::TransactionSink;
use crate::error::{IndexerError, Result};
use crate::types::{InsertOutcome, Transaction};

/// Rows per INSERT statement. 17 binds per row keeps us well under
/// Postgres' 65535 bind-parameter limit.
const INSERT_CHUNK_SIZE: usize = 1000;

const SELECT_COLUMNS: &str = r#"
    hash, block_number, "timestamp", confirmations,
    from_address, from_type, to_address, to_type,
    value, fee, sender_data, recipient_data, flags,
    validity_start_height, proof, network_id, execution_result
"#;

/// Postgres-backed transaction sink writing to the `transactions` table.
#[derive(Clone)]
pub struct PgTransactionSink {
    pool: PgPool,
}

impl PgTransactionSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Insert transactions, skipping hashes that are already stored.
/// All chunks commit together or not at all. Returns the number of new rows.
pub async fn insert_transactions(pool: &PgPool, records: &[Transaction]) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for chunk in records.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"INSERT INTO transactions (
                hash, block_number, "timestamp", confirmations,
                from_address, from_type, to_address, to_type,
                value, fee, sender_data, recipient_data, flags,
                validity_start_height, proof, network_id, execution_result
            ) "#,
        );
        builder.push_values(chunk, |mut row, t| {
            row.push_bind(&t.hash)
                .push_bind(t.block_number)
                .push_bind(t.timestamp)
                .push_bind(t.confirmations)
                .push_bind(&t.from_address)
                .push_bind(t.from_type)
                .push_bind(&t.to_address)
                .push_bind(t.to_type)
                .push_bind(t.value)
                .push_bind(t.fee)
                .push_bind(&t.sender_data)
                .push_bind(&t.recipient_data)
                .push_bind(t.flags)
                .push_bind(t.validity_start_height)
                .push_bind(&t.proof)
                .push_bind(t.network_id)
                .push_bind(t.execution_result);
        });
        builder.push(" ON CONFLICT (hash) DO NOTHING");

        let result = builder.build().execute(&mut *tx).await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

#[async_trait]
impl TransactionSink for PgTransactionSink {
    async fn insert_batch(&self, records: &[Transaction]) -> Result<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let inserted = insert_transactions(&self.pool, records)
            .await
            .map_err(|e| IndexerError::SinkFailed(e.to_string()))?;

        Ok(InsertOutcome {
            inserted,
            duplicates: records.len() as u64 - inserted,
        })
    }
}

// ─── Read queries (API) ────────────────────────────────────────────────

pub async fn get_by_block(pool: &PgPool, block_number: i64) -> Result<Vec<Transaction>, sqlx::Error> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM transactions WHERE block_number = $1 ORDER BY hash");
    sqlx::query_as(&sql).bind(block_number).fetch_all(pool).await
}

pub async fn get_by_hash(pool: &PgPool, hash: &str) -> Result<Option<Transaction>, sqlx::Error> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM transactions WHERE hash = $1");
    sqlx::query_as(&sql).bind(hash).fetch_optional(pool).await
}

/// Transactions where `address` is either the sender or the recipient, newest first.
pub async fn get_by_address(
    pool: &PgPool,
    address: &str,
    limit: i64,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {SELECT_COLUMNS}
        FROM transactions
        WHERE from_address = $1 OR to_address = $1
        ORDER BY block_number DESC
        LIMIT $2
        "#
    );
    sqlx::query_as(&sql).bind(address).bind(limit).fetch_all(pool).await
}

/// Transactions with `start_ms <= timestamp < end_ms`.
pub async fn get_by_timestamp_range(
    pool: &PgPool,
    start_ms: i64,
    end_ms: i64,
    limit: i64,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {SELECT_COLUMNS}
        FROM transactions
        WHERE "timestamp" >= $1 AND "timestamp" < $2
        ORDER BY "timestamp" ASC
        LIMIT $3
        "#
    );
    sqlx::query_as(&sql)
        .bind(start_ms)
        .bind(end_ms)
        .bind(limit)
        .fetch_all(pool)
        .await
}

pub async fn count_all(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
