//! An in-process regtest node.
//!
//! `SimulatedChain` keeps a block tree, a best-chain tip and a mempool, and
//! announces connected blocks and accepted transactions on a channel in the
//! same shape a real node's notification feed has: block invalidation moves
//! the tip silently, without any disconnect event.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use sigmaindex_core::error::IndexerError;
use sigmaindex_core::types::{Block, BlockSummary, ChainEvent, RawTransaction};

use crate::fetcher::{NodeRpcClient, NULL_HASH};

#[derive(Default)]
struct ChainInner {
    blocks: HashMap<String, Block>,
    tip: String,
    mempool: Vec<RawTransaction>,
    /// Blocks ever created; makes every block hash unique.
    created: u64,
    time: i64,
    subscriber: Option<mpsc::Sender<ChainEvent>>,
}

/// Cloneable handle to a simulated node.
#[derive(Clone)]
pub struct SimulatedChain {
    inner: Arc<Mutex<ChainInner>>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    /// A chain holding only an unannounced genesis block at height 0.
    pub fn new() -> Self {
        let genesis = Block {
            height: 0,
            hash: block_hash(0),
            parent_hash: NULL_HASH.to_string(),
            timestamp: 1_600_000_000,
            transactions: Vec::new(),
        };
        let inner = ChainInner {
            tip: genesis.hash.clone(),
            time: genesis.timestamp,
            blocks: HashMap::from([(genesis.hash.clone(), genesis)]),
            created: 1,
            ..Default::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Subscribe to chain notifications. Replaces any previous subscriber.
    pub async fn subscribe(&self, buffer: usize) -> mpsc::Receiver<ChainEvent> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.inner.lock().await.subscriber = Some(tx);
        rx
    }

    /// Drop the subscriber, closing its channel.
    pub async fn unsubscribe(&self) {
        self.inner.lock().await.subscriber = None;
    }

    /// Accept a transaction into the mempool and announce it.
    pub async fn send_raw_transaction(&self, tx: RawTransaction) -> Result<String, IndexerError> {
        let txid = tx.txid.clone();
        let subscriber = {
            let mut inner = self.inner.lock().await;
            if inner.mempool.iter().any(|m| m.txid == txid) {
                return Err(IndexerError::Rpc(format!("transaction {txid} already in mempool")));
            }
            inner.mempool.push(tx.clone());
            inner.subscriber.clone()
        };
        announce(subscriber, ChainEvent::TransactionAccepted(tx)).await;
        Ok(txid)
    }

    /// Mine `count` blocks on the current tip. The first block takes the
    /// whole mempool. Returns the new block hashes.
    pub async fn generate(&self, count: usize) -> Result<Vec<String>, IndexerError> {
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            let (block, subscriber) = {
                let mut inner = self.inner.lock().await;
                let parent = inner
                    .blocks
                    .get(&inner.tip)
                    .map(Block::summary)
                    .ok_or_else(|| IndexerError::Rpc("chain tip missing".into()))?;
                inner.time += 600;
                let block = Block {
                    height: parent.height + 1,
                    hash: block_hash(inner.created),
                    parent_hash: parent.hash,
                    timestamp: inner.time,
                    transactions: std::mem::take(&mut inner.mempool),
                };
                inner.created += 1;
                inner.tip = block.hash.clone();
                inner.blocks.insert(block.hash.clone(), block.clone());
                (block, inner.subscriber.clone())
            };
            tracing::debug!(height = block.height, hash = %block.hash, txs = block.transactions.len(), "Simulated block mined");
            hashes.push(block.hash.clone());
            announce(subscriber, ChainEvent::BlockConnected(block)).await;
        }
        Ok(hashes)
    }

    /// Move the tip to the parent of `hash`, returning the invalidated
    /// blocks' transactions to the mempool. Nothing is announced.
    pub async fn invalidate_block(&self, hash: &str) -> Result<(), IndexerError> {
        let mut inner = self.inner.lock().await;
        let target = inner
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| IndexerError::Rpc(format!("unknown block {hash}")))?;
        if target.height == 0 {
            return Err(IndexerError::Rpc("cannot invalidate genesis".into()));
        }

        let mut disconnected = Vec::new();
        let mut cursor = inner.tip.clone();
        while cursor != target.parent_hash {
            let block = inner
                .blocks
                .get(&cursor)
                .cloned()
                .ok_or_else(|| IndexerError::Rpc(format!("block {hash} is not on the active chain")))?;
            if block.height < target.height {
                return Err(IndexerError::Rpc(format!("block {hash} is not on the active chain")));
            }
            cursor = block.parent_hash.clone();
            disconnected.push(block);
        }
        if disconnected.last().map(|b| b.hash.as_str()) != Some(hash) {
            return Err(IndexerError::Rpc(format!("block {hash} is not on the active chain")));
        }

        let returned: Vec<_> = disconnected
            .into_iter()
            .rev()
            .flat_map(|b| b.transactions)
            .collect();
        let pending = std::mem::take(&mut inner.mempool);
        inner.mempool = returned.into_iter().chain(pending).collect();
        inner.tip = target.parent_hash;
        tracing::debug!(%hash, tip = %inner.tip, "Simulated block invalidated");
        Ok(())
    }

    pub async fn clear_mempool(&self) {
        self.inner.lock().await.mempool.clear();
    }

    pub async fn mempool(&self) -> Vec<RawTransaction> {
        self.inner.lock().await.mempool.clone()
    }

    pub async fn tip(&self) -> Option<BlockSummary> {
        let inner = self.inner.lock().await;
        inner.blocks.get(&inner.tip).map(Block::summary)
    }
}

#[async_trait]
impl NodeRpcClient for SimulatedChain {
    async fn get_best_block_hash(&self) -> Result<String, IndexerError> {
        Ok(self.inner.lock().await.tip.clone())
    }

    async fn get_block(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        Ok(self.inner.lock().await.blocks.get(hash).cloned())
    }
}

fn block_hash(seq: u64) -> String {
    format!("{seq:064x}")
}

async fn announce(subscriber: Option<mpsc::Sender<ChainEvent>>, event: ChainEvent) {
    if let Some(tx) = subscriber {
        if tx.send(event).await.is_err() {
            tracing::debug!("Chain subscriber gone, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_announces_blocks_with_mempool() {
        let chain = SimulatedChain::new();
        let mut events = chain.subscribe(16).await;
        chain
            .send_raw_transaction(RawTransaction::new("t1", "alice", vec![]))
            .await
            .unwrap();
        let hashes = chain.generate(2).await.unwrap();

        assert!(matches!(events.recv().await, Some(ChainEvent::TransactionAccepted(_))));
        match events.recv().await {
            Some(ChainEvent::BlockConnected(b)) => {
                assert_eq!(b.height, 1);
                assert_eq!(b.transactions.len(), 1);
                assert_eq!(b.hash, hashes[0]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(events.recv().await, Some(ChainEvent::BlockConnected(b)) if b.transactions.is_empty()));
        assert!(chain.mempool().await.is_empty());
    }

    #[tokio::test]
    async fn invalidate_moves_tip_silently_and_restores_mempool() {
        let chain = SimulatedChain::new();
        chain.generate(1).await.unwrap();
        chain
            .send_raw_transaction(RawTransaction::new("t", "alice", vec![]))
            .await
            .unwrap();
        let h2 = chain.generate(1).await.unwrap().remove(0);
        let mut events = chain.subscribe(16).await;

        chain.invalidate_block(&h2).await.unwrap();
        assert_eq!(chain.tip().await.unwrap().height, 1);
        assert_eq!(chain.mempool().await.len(), 1);
        assert!(events.try_recv().is_err());

        chain.clear_mempool().await;
        let replacement = chain.generate(1).await.unwrap().remove(0);
        assert_ne!(replacement, h2);
        assert_eq!(chain.get_block(&h2).await.unwrap().unwrap().height, 2);
        assert_eq!(chain.get_best_block_hash().await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn invalidating_off_chain_block_fails() {
        let chain = SimulatedChain::new();
        let h1 = chain.generate(1).await.unwrap().remove(0);
        chain.invalidate_block(&h1).await.unwrap();
        chain.generate(1).await.unwrap();
        assert!(chain.invalidate_block(&h1).await.is_err());
        assert!(chain.invalidate_block("nope").await.is_err());
    }
}
