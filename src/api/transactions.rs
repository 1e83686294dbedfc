use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{Days, NaiveDate};

use super::{bad_request, internal_error, not_found, ApiError};
use crate::db::transactions as queries;
use crate::types::{CountResponse, DateRangeParams, LimitParams};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/transactions/{block_number}", get(get_by_block))
        .route("/transactions/hash/{tx_hash}", get(get_by_hash))
        .route("/transactions/address/{address}", get(get_by_address))
        .route("/transactions/count/all", get(get_count))
        .route("/transactions/date", get(get_by_date))
}

/// GET /api/v1/transactions/{block_number}: all transactions of one block
async fn get_by_block(
    State(state): State<AppState>,
    Path(block_number): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let transactions = queries::get_by_block(&state.pool, block_number)
        .await
        .map_err(|e| {
            tracing::error!("Failed to get transactions for block {}: {:?}", block_number, e);
            internal_error("Failed to fetch transactions")
        })?;

    if transactions.is_empty() {
        return Err(not_found(format!("No transactions found in block {block_number}")));
    }
    Ok(Json(transactions))
}

/// GET /api/v1/transactions/hash/{tx_hash}
async fn get_by_hash(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction = queries::get_by_hash(&state.pool, &tx_hash).await.map_err(|e| {
        tracing::error!("Failed to get transaction {}: {:?}", tx_hash, e);
        internal_error("Failed to fetch transaction")
    })?;

    match transaction {
        Some(t) => Ok(Json(t)),
        None => Err(not_found(format!("Transaction {tx_hash} not found"))),
    }
}

/// GET /api/v1/transactions/address/{address}?limit=: sent or received
async fn get_by_address(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, ApiError> {
    let transactions = queries::get_by_address(&state.pool, &address, params.limit())
        .await
        .map_err(|e| {
            tracing::error!("Failed to get transactions for address {}: {:?}", address, e);
            internal_error("Failed to fetch transactions")
        })?;

    if transactions.is_empty() {
        return Err(not_found(format!("No transactions found for {address}")));
    }
    Ok(Json(transactions))
}

/// GET /api/v1/transactions/count/all
async fn get_count(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let count = queries::count_all(&state.pool).await.map_err(|e| {
        tracing::error!("Failed to count transactions: {:?}", e);
        internal_error("Failed to count transactions")
    })?;
    Ok(Json(CountResponse { count }))
}

/// GET /api/v1/transactions/date?start_date=YYYY-MM-DD&end_date=YYYY-MM-DD&limit=
async fn get_by_date(
    State(state): State<AppState>,
    Query(params): Query<DateRangeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (start_ms, end_ms) = parse_date_range(&params.start_date, &params.end_date).map_err(bad_request)?;

    let transactions = queries::get_by_timestamp_range(&state.pool, start_ms, end_ms, params.limit())
        .await
        .map_err(|e| {
            tracing::error!("Failed to get transactions by date: {:?}", e);
            internal_error("Failed to fetch transactions")
        })?;

    if transactions.is_empty() {
        return Err(not_found(format!(
            "No transactions found between {} and {}",
            params.start_date, params.end_date
        )));
    }
    Ok(Json(transactions))
}

/// Turn two inclusive calendar dates (UTC) into a half-open millisecond range
/// `[start 00:00, end + 1 day 00:00)`, matching the node's ms timestamps.
pub(crate) fn parse_date_range(start: &str, end: &str) -> Result<(i64, i64), String> {
    let parse = |raw: &str| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| format!("Invalid date '{raw}'. Expected YYYY-MM-DD."))
    };
    let start_date = parse(start)?;
    let end_date = parse(end)?;

    if end_date < start_date {
        return Err(format!("end_date {end} is before start_date {start}"));
    }

    let end_exclusive = end_date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| format!("end_date {end} is out of range"))?;

    let to_ms = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
    match (to_ms(start_date), to_ms(end_exclusive)) {
        (Some(s), Some(e)) => Ok((s, e)),
        _ => Err("Date out of range".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_day_covers_24_hours_in_ms() {
        let (start, end) = parse_date_range("2024-02-25", "2024-02-25").unwrap();
        assert_eq!(start, 1_708_819_200_000);
        assert_eq!(end - start, 86_400_000);
    }

    #[test]
    fn node_timestamp_falls_inside_its_day() {
        // 1708815974854 = 2024-02-24T23:06:14.854Z
        let (start, end) = parse_date_range("2024-02-24", "2024-02-24").unwrap();
        assert!(start <= 1_708_815_974_854 && 1_708_815_974_854 < end);
    }

    #[test]
    fn malformed_date_is_rejected() {
        let err = parse_date_range("24-02-2024", "2024-02-25").unwrap_err();
        assert!(err.contains("YYYY-MM-DD"));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(parse_date_range("2024-03-01", "2024-02-01").is_err());
    }
}
