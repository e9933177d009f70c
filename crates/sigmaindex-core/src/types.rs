//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};

/// Token (property) identifier.
pub type PropertyId = u32;

/// Index of a denomination within its property (assigned in creation order).
pub type DenominationId = u8;

/// Chain address, kept opaque.
pub type Address = String;

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A minimal summary of a block — enough to track the chain and detect reorgs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: String,
    /// Parent block hash.
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    #[serde(default)]
    pub timestamp: i64,
    /// Number of transactions in the block.
    #[serde(default)]
    pub tx_count: u32,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.height == parent.height + 1 && self.parent_hash == parent.hash
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// A connected block as delivered by the node, with its ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

impl Block {
    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            height: self.height,
            hash: self.hash.clone(),
            parent_hash: self.parent_hash.clone(),
            timestamp: self.timestamp,
            tx_count: self.transactions.len() as u32,
        }
    }
}

// ─── RawTransaction ──────────────────────────────────────────────────────────

/// An opaque chain transaction. Only `payload` is inspected for Sigma data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Transaction id.
    pub txid: String,
    /// Sending address (issuer / minter).
    pub sender: Address,
    /// Reference address; receives redeemed value for spends.
    #[serde(default)]
    pub recipient: Option<Address>,
    /// Layer payload bytes, hex-encoded in JSON.
    #[serde(default, with = "hex_bytes")]
    pub payload: Vec<u8>,
}

impl RawTransaction {
    pub fn new(txid: impl Into<String>, sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            txid: txid.into(),
            sender: sender.into(),
            recipient: None,
            payload,
        }
    }

    /// Set the reference address.
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// The address credited by a spend: the reference output, else the sender.
    pub fn beneficiary(&self) -> &str {
        self.recipient.as_deref().unwrap_or(&self.sender)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

// ─── ChainEvent ──────────────────────────────────────────────────────────────

/// Notifications delivered by the node. There is deliberately no disconnect
/// variant: a tip that only moved backwards is observed at the next connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    BlockConnected(Block),
    TransactionAccepted(RawTransaction),
}

// ─── IndexContext ─────────────────────────────────────────────────────────────

/// Context passed to block/rollback handlers.
#[derive(Debug, Clone)]
pub struct IndexContext {
    /// The block being applied or undone.
    pub block: BlockSummary,
    /// What happened to it.
    pub phase: IndexPhase,
    /// The indexer's chain slug.
    pub chain: String,
}

/// How a block reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexPhase {
    /// Direct extension of the previous tip.
    Extend,
    /// Replayed as part of a reorg or catch-up.
    Replay,
    /// Undone during a reorg.
    Rollback,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(height: u64, hash: &str, parent: &str) -> BlockSummary {
        BlockSummary {
            height,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: 0,
            tx_count: 0,
        }
    }

    #[test]
    fn block_extends_parent() {
        let parent = summary(100, "aaa", "000");
        let child = summary(101, "bbb", "aaa");
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn block_extends_false_on_gap() {
        let a = summary(100, "aaa", "000");
        let b = summary(102, "ccc", "aaa"); // gap
        assert!(!b.extends(&a));
    }

    #[test]
    fn beneficiary_defaults_to_sender() {
        let tx = RawTransaction::new("t1", "alice", vec![]);
        assert_eq!(tx.beneficiary(), "alice");
        assert_eq!(tx.to("bob").beneficiary(), "bob");
    }

    #[test]
    fn transaction_payload_is_hex_in_json() {
        let tx = RawTransaction::new("t1", "alice", vec![0xde, 0xad]);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["payload"], "dead");

        let back: RawTransaction =
            serde_json::from_str(r#"{"txid":"t1","sender":"alice","payload":"0xdead"}"#).unwrap();
        assert_eq!(back.payload, vec![0xde, 0xad]);
        assert_eq!(back.recipient, None);
    }

    #[test]
    fn block_summary_counts_transactions() {
        let block = Block {
            height: 7,
            hash: "h7".into(),
            parent_hash: "h6".into(),
            timestamp: 70,
            transactions: vec![RawTransaction::new("t", "a", vec![])],
        };
        let s = block.summary();
        assert_eq!(s.tx_count, 1);
        assert!(s.extends(&summary(6, "h6", "h5")));
    }
}
