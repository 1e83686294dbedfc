use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ─── Chain Models ──────────────────────────────────────────────────────

/// A transaction as returned by `getTransactionsByBlockNumber` and as stored.
///
/// Serialized with the node's camelCase names so the read API hands out the
/// same documents the node produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub block_number: i64,
    /// Block timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Chain depth at fetch time; a snapshot, never refreshed.
    pub confirmations: i64,
    #[serde(rename = "from")]
    pub from_address: String,
    pub from_type: i16,
    #[serde(rename = "to")]
    pub to_address: String,
    pub to_type: i16,
    pub value: i64,
    pub fee: i64,
    #[serde(default)]
    pub sender_data: String,
    #[serde(default)]
    pub recipient_data: String,
    pub flags: i32,
    pub validity_start_height: i64,
    #[serde(default)]
    pub proof: String,
    pub network_id: i32,
    pub execution_result: bool,
}

/// Result of a bulk insert: how many rows landed and how many hashes were already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub duplicates: u64,
}

impl InsertOutcome {
    pub fn total(&self) -> u64 {
        self.inserted + self.duplicates
    }
}

impl std::ops::AddAssign for InsertOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.duplicates += rhs.duplicates;
    }
}

/// Inclusive range of block numbers handed to the backfill phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<u64> {
        self.start..=self.end
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ─── API Response Types ────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub last_indexed_block: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

// ─── Query Parameters ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

impl LimitParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }
}

#[derive(Debug, Deserialize)]
pub struct DateRangeParams {
    pub start_date: String,
    pub end_date: String,
    pub limit: Option<i64>,
}

impl DateRangeParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_TX: &str = r#"{
        "hash": "293cb3f47fc9da3cdd6b3cbf596dd81409d708374384bc8e1f9c7dc08303f855",
        "blockNumber": 17043344,
        "timestamp": 1708815974854,
        "confirmations": 47,
        "from": "NQ81 C01N BASE 0000 0000 0000 0000 0000 0000",
        "fromType": 0,
        "to": "NQ57 M1NT JRQA FGD2 HX1P FN2G 611P JNAE K7HN",
        "toType": 0,
        "value": 5554230,
        "fee": 0,
        "senderData": "",
        "recipientData": "",
        "flags": 0,
        "validityStartHeight": 17043344,
        "proof": "",
        "networkId": 5,
        "executionResult": true
    }"#;

    #[test]
    fn parses_node_transaction() {
        let tx: Transaction = serde_json::from_str(NODE_TX).unwrap();
        assert_eq!(tx.block_number, 17043344);
        assert_eq!(tx.from_address, "NQ81 C01N BASE 0000 0000 0000 0000 0000 0000");
        assert_eq!(tx.to_address, "NQ57 M1NT JRQA FGD2 HX1P FN2G 611P JNAE K7HN");
        assert_eq!(tx.value, 5554230);
        assert_eq!(tx.network_id, 5);
        assert!(tx.execution_result);
    }

    #[test]
    fn serializes_with_node_field_names() {
        let tx: Transaction = serde_json::from_str(NODE_TX).unwrap();
        let json = serde_json::to_value(&tx).unwrap();
        assert!(json.get("from").is_some());
        assert!(json.get("to").is_some());
        assert!(json.get("validityStartHeight").is_some());
        assert!(json.get("from_address").is_none());
    }

    #[test]
    fn missing_payload_fields_default_to_empty() {
        let mut value: serde_json::Value = serde_json::from_str(NODE_TX).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("senderData");
        obj.remove("recipientData");
        obj.remove("proof");
        let tx: Transaction = serde_json::from_value(value).unwrap();
        assert_eq!(tx.sender_data, "");
        assert_eq!(tx.recipient_data, "");
        assert_eq!(tx.proof, "");
    }

    #[test]
    fn block_range_len_and_emptiness() {
        assert_eq!(BlockRange::new(10, 19).len(), 10);
        assert_eq!(BlockRange::new(5, 5).len(), 1);
        assert!(BlockRange::new(16335524, 16335500).is_empty());
        assert_eq!(BlockRange::new(16335524, 16335500).len(), 0);
    }

    #[test]
    fn insert_outcome_accumulates() {
        let mut total = InsertOutcome::default();
        total += InsertOutcome { inserted: 3, duplicates: 1 };
        total += InsertOutcome { inserted: 0, duplicates: 2 };
        assert_eq!(total, InsertOutcome { inserted: 3, duplicates: 3 });
        assert_eq!(total.total(), 6);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(LimitParams { limit: None }.limit(), 50);
        assert_eq!(LimitParams { limit: Some(999) }.limit(), 100);
        assert_eq!(LimitParams { limit: Some(0) }.limit(), 1);
    }
}
