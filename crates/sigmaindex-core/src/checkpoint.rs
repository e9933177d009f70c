//! Checkpoints — the ledger's position on the chain, and snapshots of the
//! whole ledger persisted for crash recovery.
//!
//! A saved checkpoint carries the complete [`LedgerState`] at that block,
//! including the retained block history and undo journals, so a restarted
//! indexer can still roll back across the restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::state::LedgerState;

/// The last applied block of the active chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u64,
    pub block_hash: String,
}

impl Checkpoint {
    pub fn new(height: u64, block_hash: &str) -> Self {
        Self {
            height,
            block_hash: block_hash.to_string(),
        }
    }
}

/// A persisted ledger snapshot for one indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCheckpoint {
    /// Chain slug (e.g. `"firo-regtest"`).
    pub chain_id: String,
    /// Unique indexer identifier.
    pub indexer_id: String,
    /// Height of the snapshot's checkpoint block.
    pub height: u64,
    /// Hash of the snapshot's checkpoint block.
    pub block_hash: String,
    /// Full ledger state at that block.
    pub state: LedgerState,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading ledger snapshots.
///
/// Implementations include [`MemoryCheckpointStore`] here, and the
/// in-memory and SQLite backends of `sigmaindex-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the latest snapshot for a given chain + indexer pair.
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<SavedCheckpoint>, IndexerError>;

    /// Save (upsert) a snapshot.
    async fn save(&self, checkpoint: SavedCheckpoint) -> Result<(), IndexerError>;

    /// Delete a snapshot (e.g. when resyncing from genesis).
    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError>;
}

/// A shared store, so one backend can hold snapshots and serve as a handler.
#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for std::sync::Arc<T> {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<SavedCheckpoint>, IndexerError> {
        (**self).load(chain_id, indexer_id).await
    }

    async fn save(&self, checkpoint: SavedCheckpoint) -> Result<(), IndexerError> {
        (**self).save(checkpoint).await
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        (**self).delete(chain_id, indexer_id).await
    }
}

/// Manages snapshot reads/writes for an indexer.
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    chain_id: String,
    indexer_id: String,
    /// How often to save (every N applied blocks).
    save_interval: u64,
    /// Blocks applied since the last save.
    counter: u64,
}

impl CheckpointManager {
    pub fn new(
        store: Box<dyn CheckpointStore>,
        chain_id: impl Into<String>,
        indexer_id: impl Into<String>,
        save_interval: u64,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            indexer_id: indexer_id.into(),
            save_interval: save_interval.max(1),
            counter: 0,
        }
    }

    /// Load the saved snapshot (returns `None` if none exists).
    pub async fn load(&self) -> Result<Option<SavedCheckpoint>, IndexerError> {
        self.store.load(&self.chain_id, &self.indexer_id).await
    }

    /// Save a snapshot once every `save_interval` applied blocks.
    ///
    /// Call this after each commit with the number of blocks it applied.
    pub async fn maybe_save(&mut self, state: &LedgerState, applied: u64) -> Result<bool, IndexerError> {
        self.counter += applied;
        if self.counter >= self.save_interval {
            let saved = self.force_save(state).await?;
            self.counter = 0;
            return Ok(saved);
        }
        Ok(false)
    }

    /// Immediately save a snapshot (used on shutdown and after reorgs).
    ///
    /// Returns `false` if the ledger has no checkpoint yet.
    pub async fn force_save(&self, state: &LedgerState) -> Result<bool, IndexerError> {
        let Some(cp) = state.checkpoint() else {
            return Ok(false);
        };
        let saved = SavedCheckpoint {
            chain_id: self.chain_id.clone(),
            indexer_id: self.indexer_id.clone(),
            height: cp.height,
            block_hash: cp.block_hash.clone(),
            state: state.clone(),
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(saved).await?;
        tracing::debug!(
            chain = %self.chain_id,
            indexer = %self.indexer_id,
            height = cp.height,
            "Checkpoint saved"
        );
        Ok(true)
    }

    /// Forget the saved snapshot.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        self.store.delete(&self.chain_id, &self.indexer_id).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, SavedCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(chain_id: &str, indexer_id: &str) -> String {
        format!("{chain_id}:{indexer_id}")
    }

    fn poisoned<T>(_: T) -> IndexerError {
        IndexerError::Storage("checkpoint store lock poisoned".into())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<SavedCheckpoint>, IndexerError> {
        let data = self.data.lock().map_err(Self::poisoned)?;
        Ok(data.get(&Self::key(chain_id, indexer_id)).cloned())
    }

    async fn save(&self, checkpoint: SavedCheckpoint) -> Result<(), IndexerError> {
        let key = Self::key(&checkpoint.chain_id, &checkpoint.indexer_id);
        self.data.lock().map_err(Self::poisoned)?.insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        self.data
            .lock()
            .map_err(Self::poisoned)?
            .remove(&Self::key(chain_id, indexer_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LedgerPolicy;
    use crate::types::Block;

    fn state_at(heights: u64) -> LedgerState {
        let mut state = LedgerState::new(LedgerPolicy::default(), 8);
        let mut parent = "genesis".to_string();
        for height in 1..=heights {
            let block = Block {
                height,
                hash: format!("h{height}"),
                parent_hash: parent,
                timestamp: 0,
                transactions: vec![],
            };
            state.apply_block(&block, &Default::default()).unwrap();
            parent = block.hash;
        }
        state
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = Box::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store, "firo-regtest", "sigma", 10);

        assert!(mgr.load().await.unwrap().is_none());

        let state = state_at(3);
        assert!(mgr.force_save(&state).await.unwrap());

        let cp = mgr.load().await.unwrap().unwrap();
        assert_eq!(cp.height, 3);
        assert_eq!(cp.block_hash, "h3");
        assert_eq!(cp.chain_id, "firo-regtest");
        assert_eq!(cp.state, state);

        mgr.reset().await.unwrap();
        assert!(mgr.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_ledger_is_not_saved() {
        let mgr = CheckpointManager::new(Box::new(MemoryCheckpointStore::new()), "c", "i", 1);
        let empty = LedgerState::new(LedgerPolicy::default(), 8);
        assert!(!mgr.force_save(&empty).await.unwrap());
        assert!(mgr.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_save_interval() {
        let store = Box::new(MemoryCheckpointStore::new());
        let mut mgr = CheckpointManager::new(store, "firo-regtest", "idx", 5);

        for h in 1..=4 {
            assert!(!mgr.maybe_save(&state_at(h), 1).await.unwrap());
        }
        assert!(mgr.load().await.unwrap().is_none());

        assert!(mgr.maybe_save(&state_at(5), 1).await.unwrap());
        assert_eq!(mgr.load().await.unwrap().unwrap().height, 5);
    }
}
