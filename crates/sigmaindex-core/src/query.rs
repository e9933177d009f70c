//! Read-only queries over committed ledger snapshots.

use std::sync::Arc;

use tokio::sync::watch;

use crate::checkpoint::Checkpoint;
use crate::entries::{DenominationGroup, MintEntry, PropertyBalance, PropertyRecord, SpendEntry};
use crate::error::IndexerError;
use crate::state::LedgerState;
use crate::types::{DenominationId, PropertyId};

/// Cheap, cloneable read handle.
///
/// Every query answers from a single snapshot, so a concurrent commit is
/// either fully visible or not at all.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    snapshots: watch::Receiver<Arc<LedgerState>>,
}

impl QueryEngine {
    pub fn new(snapshots: watch::Receiver<Arc<LedgerState>>) -> Self {
        Self { snapshots }
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<LedgerState> {
        self.snapshots.borrow().clone()
    }

    /// Wait for the next commit.
    pub async fn changed(&mut self) -> Result<(), IndexerError> {
        self.snapshots
            .changed()
            .await
            .map_err(|_| IndexerError::Aborted {
                reason: "ledger writer dropped".into(),
            })
    }

    /// All mint entries regardless of status.
    pub fn list_mints(&self, property: Option<PropertyId>) -> Vec<MintEntry> {
        self.snapshot()
            .mints()
            .filter(|m| property.map_or(true, |p| m.property == p))
            .cloned()
            .collect()
    }

    /// Mint entries not confirmed by the active chain.
    pub fn list_pending_mints(&self, property: Option<PropertyId>) -> Vec<MintEntry> {
        self.snapshot()
            .mints()
            .filter(|m| m.is_pending() && property.map_or(true, |p| m.property == p))
            .cloned()
            .collect()
    }

    /// All spend entries regardless of status.
    pub fn list_spends(&self, property: Option<PropertyId>) -> Vec<SpendEntry> {
        self.snapshot()
            .spends()
            .filter(|s| property.map_or(true, |p| s.property == p))
            .cloned()
            .collect()
    }

    /// Balance from confirmed entries only.
    pub fn get_balance(&self, address: &str, property: PropertyId) -> PropertyBalance {
        self.snapshot().balance(address, property)
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.snapshot().checkpoint().cloned()
    }

    pub fn property(&self, property: PropertyId) -> Option<PropertyRecord> {
        self.snapshot().property(property).cloned()
    }

    pub fn groups(&self, property: PropertyId, denomination: DenominationId) -> Vec<DenominationGroup> {
        self.snapshot().groups(property, denomination).to_vec()
    }
}
