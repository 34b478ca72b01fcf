use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row identifier of a stored snapshot. Higher means more recent.
pub type StoreId = i64;

/// One row of the `blocks` table: the node's answers to a single ingestion cycle.
///
/// JSON columns hold the `result` member of each RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTipSnapshot {
    pub block_stats: Value,
    pub block: Value,
    pub blockchain_info: Value,
    pub block_count: i64,
    pub block_header: Value,
    pub best_block_hash: String,
    pub decoded_script: Value,
    pub mempool_info: Value,
    pub raw_mempool: Value,
}

impl ChainTipSnapshot {
    pub fn min_fee_rate(&self) -> Option<&Value> {
        self.block_stats.get("minfeerate")
    }

    pub fn avg_fee_rate(&self) -> Option<&Value> {
        self.block_stats.get("avgfeerate")
    }

    /// Hash of the block the next header builds on.
    pub fn prev_block_hash(&self) -> Option<&str> {
        self.block.get("hash").and_then(Value::as_str)
    }

    pub fn bits(&self) -> Option<&str> {
        self.block.get("bits").and_then(Value::as_str)
    }

    /// Current chain height as reported by `getblockchaininfo`.
    pub fn height(&self) -> Option<u64> {
        self.blockchain_info.get("blocks").and_then(Value::as_u64)
    }
}

/// Semantic inputs of an 80-byte header. Hashes and bits are display-order hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeaderFields {
    pub version: i32,
    pub prev_block_hash: String,
    pub merkle_root: String,
    pub timestamp: u32,
    pub bits: String,
    pub nonce: u32,
}

/// What the node said about a `submitblock` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Accepted,
    Rejected(Value),
}

impl SubmissionOutcome {
    /// Interpret a `submitblock` response envelope. A null or empty result is
    /// acceptance; anything else, including a JSON-RPC error, is rejection detail.
    pub fn from_response(response: &Value) -> Self {
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return SubmissionOutcome::Rejected(error.clone());
        }

        match response.get("result") {
            None | Some(Value::Null) => SubmissionOutcome::Accepted,
            Some(Value::String(s)) if s.is_empty() => SubmissionOutcome::Accepted,
            Some(other) => SubmissionOutcome::Rejected(other.clone()),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot(height: u64) -> ChainTipSnapshot {
    use serde_json::json;

    ChainTipSnapshot {
        block_stats: json!({"minfeerate": 1, "avgfeerate": 27}),
        block: json!({
            "hash": "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            "bits": "17034219",
        }),
        blockchain_info: json!({"blocks": height, "chain": "main"}),
        block_count: height as i64,
        block_header: json!({"height": height}),
        best_block_hash: "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054"
            .to_string(),
        decoded_script: json!({"type": "pubkeyhash"}),
        mempool_info: json!({"size": 0}),
        raw_mempool: json!({}),
    }
}
