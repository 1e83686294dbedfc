use std::str::FromStr;
use std::time::Duration;

use crate::error::{IndexerError, Result};

/// Runtime configuration, read from the environment (and `.env` via dotenvy).
///
/// Environment variables:
/// - RPC_URL (default: http://node:8648/)
/// - DATABASE_URL (required)
/// - BLOCK_TIME_SECS (default: 1)
/// - BACKFILL_CONCURRENCY (default: 20)
/// - BACKFILL_THRESHOLD (default: 25): gap above which backfill runs
/// - BACKFILL_TIP_BUFFER (default: 100): blocks left for the real-time tailer
/// - START_BLOCK (default: 16335524)
/// - RPC_TIMEOUT_SECS (default: 10)
/// - MAX_BLOCK_ATTEMPTS (default: 3)
/// - RETRY_BASE_MS / RETRY_MAX_MS (default: 500 / 30000)
/// - PORT (default: 8000)
/// - ENABLE_INDEXER / ENABLE_API (default: "true"): set to "false" to skip
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub database_url: String,
    pub indexer: IndexerConfig,
    pub port: u16,
    pub enable_indexer: bool,
    pub enable_api: bool,
}

/// Knobs for the ingestion pipeline itself.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub block_time: Duration,
    pub backfill_concurrency: usize,
    pub backfill_threshold: u64,
    pub tip_buffer: u64,
    pub start_block: u64,
    pub rpc_timeout: Duration,
    pub max_block_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

pub const DEFAULT_RPC_URL: &str = "http://node:8648/";
pub const DEFAULT_START_BLOCK: u64 = 16_335_524;

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            block_time: Duration::from_secs(1),
            backfill_concurrency: 20,
            backfill_threshold: 25,
            tip_buffer: 100,
            start_block: DEFAULT_START_BLOCK,
            rpc_timeout: Duration::from_secs(10),
            max_block_attempts: 3,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = IndexerConfig::default();

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| IndexerError::Config("DATABASE_URL must be set".to_string()))?;

        let indexer = IndexerConfig {
            block_time: Duration::from_secs(parse_or(&lookup, "BLOCK_TIME_SECS", 1u64)?),
            backfill_concurrency: parse_or(
                &lookup,
                "BACKFILL_CONCURRENCY",
                defaults.backfill_concurrency,
            )?,
            backfill_threshold: parse_or(&lookup, "BACKFILL_THRESHOLD", defaults.backfill_threshold)?,
            tip_buffer: parse_or(&lookup, "BACKFILL_TIP_BUFFER", defaults.tip_buffer)?,
            start_block: parse_or(&lookup, "START_BLOCK", defaults.start_block)?,
            rpc_timeout: Duration::from_secs(parse_or(&lookup, "RPC_TIMEOUT_SECS", 10u64)?),
            max_block_attempts: parse_or(&lookup, "MAX_BLOCK_ATTEMPTS", defaults.max_block_attempts)?,
            retry_base: Duration::from_millis(parse_or(&lookup, "RETRY_BASE_MS", 500u64)?),
            retry_max: Duration::from_millis(parse_or(&lookup, "RETRY_MAX_MS", 30_000u64)?),
        };

        if indexer.backfill_concurrency == 0 {
            return Err(IndexerError::Config("BACKFILL_CONCURRENCY must be at least 1".to_string()));
        }
        if indexer.max_block_attempts == 0 {
            return Err(IndexerError::Config("MAX_BLOCK_ATTEMPTS must be at least 1".to_string()));
        }

        Ok(Self {
            rpc_url: lookup("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            database_url,
            indexer,
            port: parse_or(&lookup, "PORT", 8000u16)?,
            enable_indexer: lookup("ENABLE_INDEXER").as_deref() != Some("false"),
            enable_api: lookup("ENABLE_API").as_deref() != Some("false"),
        })
    }

    /// RPC URL with the middle elided, for log lines.
    pub fn masked_rpc_url(&self) -> String {
        let chars: Vec<char> = self.rpc_url.chars().collect();
        if chars.len() > 20 {
            let head: String = chars[..16].iter().collect();
            let tail: String = chars[chars.len() - 8..].iter().collect();
            format!("{head}...{tail}")
        } else {
            self.rpc_url.clone()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| IndexerError::Config(format!("{key}={raw:?}: {e}"))),
        _ => Ok(default),
    }
}
