//! Nimiq transaction indexer: replays historical blocks from a node's JSON-RPC
//! interface into Postgres, tails new blocks, and serves the stored
//! transactions over a read-only HTTP API.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod types;

#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub ready: Arc<AtomicBool>,
}
