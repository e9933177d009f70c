//! Node block fetcher.
//!
//! Wraps a [`NodeRpcClient`] (`getbestblockhash` / `getblock`) and exposes it
//! as the [`ChainSource`] the reorg detector walks during ancestor search.

use async_trait::async_trait;
use serde_json::Value;

use sigmaindex_core::error::IndexerError;
use sigmaindex_core::source::ChainSource;
use sigmaindex_core::types::{Block, RawTransaction};

/// Hash reported as the parent of a genesis block.
pub const NULL_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Trait for fetching blocks from a node's RPC interface.
#[async_trait]
pub trait NodeRpcClient: Send + Sync {
    async fn get_best_block_hash(&self) -> Result<String, IndexerError>;
    async fn get_block(&self, hash: &str) -> Result<Option<Block>, IndexerError>;
}

/// Fetcher that wraps a `NodeRpcClient`.
pub struct NodeFetcher<C> {
    client: C,
}

impl<C: NodeRpcClient> NodeFetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch the node's current best block.
    pub async fn best_block(&self) -> Result<Option<Block>, IndexerError> {
        let hash = self.client.get_best_block_hash().await?;
        self.client.get_block(&hash).await
    }

    /// Fetch a block by hash.
    pub async fn block(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        self.client.get_block(hash).await
    }
}

#[async_trait]
impl<C: NodeRpcClient> ChainSource for NodeFetcher<C> {
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        let block = self.client.get_block(hash).await?;
        if block.is_none() {
            tracing::debug!(%hash, "Node does not know block");
        }
        Ok(block)
    }
}

/// Convert a `getblock` JSON response into a [`Block`].
///
/// Expects `height`, `hash`, optional `previousblockhash` (absent for
/// genesis), optional `time`, and a `tx` array of
/// `{txid, sender, reference?, payload}` objects with hex payloads.
pub fn block_from_json(v: &Value) -> Option<Block> {
    let transactions = match v.get("tx") {
        Some(txs) => txs
            .as_array()?
            .iter()
            .map(tx_from_json)
            .collect::<Option<Vec<_>>>()?,
        None => Vec::new(),
    };
    Some(Block {
        height: v["height"].as_u64()?,
        hash: v["hash"].as_str()?.to_string(),
        parent_hash: v
            .get("previousblockhash")
            .and_then(Value::as_str)
            .unwrap_or(NULL_HASH)
            .to_string(),
        timestamp: v.get("time").and_then(Value::as_i64).unwrap_or(0),
        transactions,
    })
}

fn tx_from_json(v: &Value) -> Option<RawTransaction> {
    let payload = v
        .get("payload")
        .and_then(Value::as_str)
        .map(|p| hex::decode(p.strip_prefix("0x").unwrap_or(p)))
        .transpose()
        .ok()?
        .unwrap_or_default();
    let mut tx = RawTransaction::new(v["txid"].as_str()?, v["sender"].as_str()?, payload);
    if let Some(reference) = v.get("reference").and_then(Value::as_str) {
        tx = tx.to(reference);
    }
    Some(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_getblock_response() {
        let v = json!({
            "height": 101,
            "hash": "bb",
            "previousblockhash": "aa",
            "time": 1_600_000_000,
            "tx": [
                {"txid": "t1", "sender": "alice", "payload": "0x6578"},
                {"txid": "t2", "sender": "bob", "reference": "carol"}
            ]
        });
        let block = block_from_json(&v).unwrap();
        assert_eq!(block.height, 101);
        assert_eq!(block.parent_hash, "aa");
        assert_eq!(block.transactions[0].payload, vec![0x65, 0x78]);
        assert_eq!(block.transactions[1].beneficiary(), "carol");
        assert!(block.transactions[1].payload.is_empty());
    }

    #[test]
    fn genesis_has_null_parent() {
        let block = block_from_json(&json!({"height": 0, "hash": "g"})).unwrap();
        assert_eq!(block.parent_hash, NULL_HASH);
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn bad_payload_hex_is_rejected() {
        let v = json!({"height": 1, "hash": "h", "tx": [{"txid": "t", "sender": "a", "payload": "zz"}]});
        assert!(block_from_json(&v).is_none());
    }
}
