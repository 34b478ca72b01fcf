use serde_json::{json, Value};
use tracing::{debug, info};

use crate::database::ChainTipStore;
use crate::error::{Error, Result};
use crate::models::{ChainTipSnapshot, StoreId};
use crate::rpc::{into_result, NodeRpc};

/// P2PKH script decoded alongside each snapshot when none is given.
pub const DEFAULT_SCRIPT_HEX: &str = "76a914fe7e0711287688b33b9a5c239336c4700db34e6388ac";

async fn request(rpc: &dyn NodeRpc, method: &str, params: Vec<Value>) -> Result<Value> {
    let response = rpc.call(method, params).await?;
    into_result(method, response)
}

/// Query the node for everything a snapshot holds.
///
/// Without `block_hash` the node's current best block is described.
pub async fn fetch_chain_tip(
    rpc: &dyn NodeRpc,
    block_hash: Option<&str>,
    script_hex: &str,
) -> Result<ChainTipSnapshot> {
    let block_hash = match block_hash {
        Some(hash) => hash.to_string(),
        None => {
            let best = request(rpc, "getbestblockhash", vec![]).await?;
            as_string("getbestblockhash", best)?
        }
    };
    debug!(block_hash = %block_hash, "Fetching chain tip");

    let (
        block_stats,
        block,
        blockchain_info,
        block_count,
        block_header,
        best_block_hash,
        decoded_script,
        mempool_info,
        raw_mempool,
    ) = futures::try_join!(
        request(rpc, "getblockstats", vec![json!(block_hash), json!(["minfeerate", "avgfeerate"])]),
        request(rpc, "getblock", vec![json!(block_hash)]),
        request(rpc, "getblockchaininfo", vec![]),
        request(rpc, "getblockcount", vec![]),
        request(rpc, "getblockheader", vec![json!(block_hash)]),
        request(rpc, "getbestblockhash", vec![]),
        request(rpc, "decodescript", vec![json!(script_hex)]),
        request(rpc, "getmempoolinfo", vec![]),
        request(rpc, "getrawmempool", vec![json!(true)]),
    )?;

    let block_count = block_count
        .as_i64()
        .ok_or_else(|| Error::Protocol(format!("getblockcount: expected an integer, got {}", block_count)))?;

    Ok(ChainTipSnapshot {
        block_stats,
        block,
        blockchain_info,
        block_count,
        block_header,
        best_block_hash: as_string("getbestblockhash", best_block_hash)?,
        decoded_script,
        mempool_info,
        raw_mempool,
    })
}

/// One ingestion cycle: fetch a snapshot and append it to the store.
pub async fn ingest(
    rpc: &dyn NodeRpc,
    store: &dyn ChainTipStore,
    block_hash: Option<&str>,
    script_hex: &str,
) -> Result<(StoreId, ChainTipSnapshot)> {
    let snapshot = fetch_chain_tip(rpc, block_hash, script_hex).await?;
    let id = store.append(&snapshot).await?;

    info!(
        id,
        block_count = snapshot.block_count,
        best_block_hash = %snapshot.best_block_hash,
        "Stored chain tip snapshot"
    );
    Ok((id, snapshot))
}

fn as_string(method: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::Protocol(format!("{}: expected a string, got {}", method, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::rpc::fake::ScriptedRpc;

    const TIP: &str = "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054";

    fn node() -> ScriptedRpc {
        ScriptedRpc::new()
            .respond("getblockstats", json!({"minfeerate": 1, "avgfeerate": 27}))
            .respond("getblock", json!({"hash": TIP, "bits": "17034219", "height": 800000}))
            .respond("getblockchaininfo", json!({"chain": "main", "blocks": 800000}))
            .respond("getblockcount", json!(800000))
            .respond("getblockheader", json!({"hash": TIP, "height": 800000}))
            .respond("getbestblockhash", json!(TIP))
            .respond("decodescript", json!({"type": "pubkeyhash"}))
            .respond("getmempoolinfo", json!({"size": 3}))
            .respond("getrawmempool", json!({}))
    }

    #[tokio::test]
    async fn test_fetch_stores_block_count_as_integer() {
        let rpc = node();
        let snapshot = fetch_chain_tip(&rpc, Some(TIP), DEFAULT_SCRIPT_HEX).await.unwrap();

        assert_eq!(snapshot.block_count, 800000);
        assert_eq!(snapshot.best_block_hash, TIP);
        assert_eq!(snapshot.prev_block_hash(), Some(TIP));
        assert_eq!(snapshot.height(), Some(800000));
        assert_eq!(snapshot.min_fee_rate(), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_fetch_issues_all_methods_with_params() {
        let rpc = node();
        fetch_chain_tip(&rpc, Some(TIP), DEFAULT_SCRIPT_HEX).await.unwrap();

        let calls = rpc.calls();
        assert_eq!(calls.len(), 9);
        let params_of = |method: &str| {
            calls
                .iter()
                .find(|(m, _)| m == method)
                .map(|(_, p)| p.clone())
                .unwrap()
        };
        assert_eq!(params_of("getblockstats"), vec![json!(TIP), json!(["minfeerate", "avgfeerate"])]);
        assert_eq!(params_of("decodescript"), vec![json!(DEFAULT_SCRIPT_HEX)]);
        assert_eq!(params_of("getrawmempool"), vec![json!(true)]);
    }

    #[tokio::test]
    async fn test_fetch_defaults_to_best_block() {
        let rpc = node();
        fetch_chain_tip(&rpc, None, DEFAULT_SCRIPT_HEX).await.unwrap();

        assert_eq!(rpc.count("getbestblockhash"), 2);
        let (_, params) = rpc.calls().into_iter().find(|(m, _)| m == "getblock").unwrap();
        assert_eq!(params, vec![json!(TIP)]);
    }

    #[tokio::test]
    async fn test_rpc_error_aborts_ingestion() {
        let rpc = node().respond_raw(
            "getblock",
            json!({"result": null, "error": {"code": -5, "message": "Block not found"}, "id": 1}),
        );
        let store = MemoryStore::new();

        let err = ingest(&rpc, &store, Some(TIP), DEFAULT_SCRIPT_HEX).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(store.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_integer_block_count_is_rejected() {
        let rpc = node().respond("getblockcount", json!("800000"));
        let err = fetch_chain_tip(&rpc, Some(TIP), DEFAULT_SCRIPT_HEX).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_ingest_appends_snapshot() {
        let rpc = node();
        let store = MemoryStore::new();

        let (id, snapshot) = ingest(&rpc, &store, Some(TIP), DEFAULT_SCRIPT_HEX).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.latest().await.unwrap(), Some(snapshot));
    }
}
