//! In-memory storage backend.
//!
//! Stores ledger snapshots and the journal of every applied block in RAM.
//! Useful for testing and short-lived indexers that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use sigmaindex_core::checkpoint::{CheckpointStore, SavedCheckpoint};
use sigmaindex_core::error::IndexerError;
use sigmaindex_core::handler::{BlockHandler, RollbackHandler};
use sigmaindex_core::journal::BlockJournal;
use sigmaindex_core::types::IndexContext;

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<String, SavedCheckpoint>>,
    /// Every snapshot ever saved, oldest first.
    history: Mutex<Vec<SavedCheckpoint>>,
    /// Journals of the active chain, by height.
    journals: Mutex<BTreeMap<u64, BlockJournal>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, IndexerError> {
    m.lock()
        .map_err(|_| IndexerError::Storage("in-memory storage lock poisoned".into()))
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied block's journal, replacing any at the same height.
    pub fn insert_journal(&self, journal: BlockJournal) -> Result<(), IndexerError> {
        lock(&self.journals)?.insert(journal.block.height, journal);
        Ok(())
    }

    /// Journal of the block at `height` on the active chain.
    pub fn journal(&self, height: u64) -> Result<Option<BlockJournal>, IndexerError> {
        Ok(lock(&self.journals)?.get(&height).cloned())
    }

    /// Number of recorded journals.
    pub fn journal_count(&self) -> Result<usize, IndexerError> {
        Ok(lock(&self.journals)?.len())
    }

    /// Delete journals above `height` (reorg recovery).
    pub fn rollback_after(&self, height: u64) -> Result<(), IndexerError> {
        lock(&self.journals)?.retain(|h, _| *h <= height);
        Ok(())
    }

    /// Snapshots saved so far, oldest first.
    pub fn saved_history(&self) -> Result<Vec<SavedCheckpoint>, IndexerError> {
        Ok(lock(&self.history)?.clone())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<SavedCheckpoint>, IndexerError> {
        let key = format!("{chain_id}:{indexer_id}");
        Ok(lock(&self.checkpoints)?.get(&key).cloned())
    }

    async fn save(&self, checkpoint: SavedCheckpoint) -> Result<(), IndexerError> {
        let key = format!("{}:{}", checkpoint.chain_id, checkpoint.indexer_id);
        lock(&self.history)?.push(checkpoint.clone());
        lock(&self.checkpoints)?.insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        let key = format!("{chain_id}:{indexer_id}");
        lock(&self.checkpoints)?.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl BlockHandler for InMemoryStorage {
    async fn handle_block(&self, journal: &BlockJournal, _ctx: &IndexContext) -> Result<(), IndexerError> {
        self.insert_journal(journal.clone())
    }
}

#[async_trait]
impl RollbackHandler for InMemoryStorage {
    async fn handle_rollback(&self, journal: &BlockJournal, _ctx: &IndexContext) -> Result<(), IndexerError> {
        self.rollback_after(journal.block.height.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigmaindex_core::state::{LedgerPolicy, LedgerState};
    use sigmaindex_core::types::BlockSummary;

    fn journal(height: u64) -> BlockJournal {
        BlockJournal {
            block: BlockSummary {
                height,
                hash: format!("h{height}"),
                parent_hash: format!("h{}", height.saturating_sub(1)),
                timestamp: 0,
                tx_count: 0,
            },
            ops: vec![],
            skipped: vec![],
        }
    }

    fn saved(indexer_id: &str, height: u64) -> SavedCheckpoint {
        SavedCheckpoint {
            chain_id: "firo-regtest".into(),
            indexer_id: indexer_id.into(),
            height,
            block_hash: format!("h{height}"),
            state: LedgerState::new(LedgerPolicy::default(), 4),
            updated_at: 0,
        }
    }

    #[test]
    fn rollback_clears_future_journals() {
        let store = InMemoryStorage::new();
        for h in 100..=105 {
            store.insert_journal(journal(h)).unwrap();
        }
        assert_eq!(store.journal_count().unwrap(), 6);

        store.rollback_after(102).unwrap();

        assert_eq!(store.journal_count().unwrap(), 3);
        assert!(store.journal(103).unwrap().is_none());
        assert!(store.journal(102).unwrap().is_some());
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_and_history() {
        let store = InMemoryStorage::new();
        store.save(saved("test", 10)).await.unwrap();
        store.save(saved("test", 20)).await.unwrap();
        let loaded = store.load("firo-regtest", "test").await.unwrap().unwrap();
        assert_eq!(loaded.height, 20);
        assert_eq!(store.saved_history().unwrap().len(), 2);

        store.delete("firo-regtest", "test").await.unwrap();
        assert!(store.load("firo-regtest", "test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handlers_follow_the_active_chain() {
        let store = InMemoryStorage::new();
        let ctx = |j: &BlockJournal| IndexContext {
            block: j.block.clone(),
            phase: sigmaindex_core::types::IndexPhase::Extend,
            chain: "firo-regtest".into(),
        };
        for h in 1..=3 {
            let j = journal(h);
            store.handle_block(&j, &ctx(&j)).await.unwrap();
        }
        let top = journal(3);
        store.handle_rollback(&top, &ctx(&top)).await.unwrap();
        assert_eq!(store.journal_count().unwrap(), 2);
    }
}
