//! Block, rollback and reorg handler traits + registry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::journal::BlockJournal;
use crate::ledger::CommitReport;
use crate::reorg::ReorgEvent;
use crate::types::{IndexContext, IndexPhase};

/// Trait for user-provided block handlers.
///
/// Called once per applied block, after the commit that applied it.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn handle_block(&self, journal: &BlockJournal, ctx: &IndexContext) -> Result<(), IndexerError>;
}

/// Called once per undone block, newest first.
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    async fn handle_rollback(&self, journal: &BlockJournal, ctx: &IndexContext) -> Result<(), IndexerError>;
}

/// Trait for reorg handlers.
///
/// Called when a chain reorganization is detected.
#[async_trait]
pub trait ReorgHandler: Send + Sync {
    async fn on_reorg(&self, event: &ReorgEvent, ctx: &IndexContext) -> Result<(), IndexerError>;
}

/// Registry of block + rollback + reorg handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    block_handlers: Vec<Arc<dyn BlockHandler>>,
    rollback_handlers: Vec<Arc<dyn RollbackHandler>>,
    reorg_handlers: Vec<Arc<dyn ReorgHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block handler (called for every applied block).
    pub fn on_block(&mut self, handler: Arc<dyn BlockHandler>) {
        self.block_handlers.push(handler);
    }

    /// Register a rollback handler (called for every undone block).
    pub fn on_rollback(&mut self, handler: Arc<dyn RollbackHandler>) {
        self.rollback_handlers.push(handler);
    }

    /// Register a reorg handler.
    pub fn on_reorg(&mut self, handler: Arc<dyn ReorgHandler>) {
        self.reorg_handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.block_handlers.is_empty()
            && self.rollback_handlers.is_empty()
            && self.reorg_handlers.is_empty()
    }

    pub async fn dispatch_block(&self, journal: &BlockJournal, ctx: &IndexContext) -> Result<(), IndexerError> {
        for handler in &self.block_handlers {
            handler.handle_block(journal, ctx).await?;
        }
        Ok(())
    }

    pub async fn dispatch_rollback(&self, journal: &BlockJournal, ctx: &IndexContext) -> Result<(), IndexerError> {
        for handler in &self.rollback_handlers {
            handler.handle_rollback(journal, ctx).await?;
        }
        Ok(())
    }

    pub async fn dispatch_reorg(&self, event: &ReorgEvent, ctx: &IndexContext) -> Result<(), IndexerError> {
        for handler in &self.reorg_handlers {
            handler.on_reorg(event, ctx).await?;
        }
        Ok(())
    }

    /// Dispatch everything a commit did: the reorg, then each undone block,
    /// then each applied block.
    pub async fn dispatch_commit(&self, report: &CommitReport, chain: &str) -> Result<(), IndexerError> {
        if let Some((event, old_tip)) = report
            .event
            .as_ref()
            .and_then(|e| e.dropped.first().map(|tip| (e, tip)))
        {
            let ctx = IndexContext {
                block: old_tip.clone(),
                phase: IndexPhase::Rollback,
                chain: chain.to_string(),
            };
            self.dispatch_reorg(event, &ctx).await?;
        }
        for journal in &report.rolled_back {
            let ctx = IndexContext {
                block: journal.block.clone(),
                phase: IndexPhase::Rollback,
                chain: chain.to_string(),
            };
            self.dispatch_rollback(journal, &ctx).await?;
        }
        let phase = if report.applied.len() == 1 && !report.is_reorg() {
            IndexPhase::Extend
        } else {
            IndexPhase::Replay
        };
        for journal in &report.applied {
            let ctx = IndexContext {
                block: journal.block.clone(),
                phase,
                chain: chain.to_string(),
            };
            self.dispatch_block(journal, &ctx).await?;
        }
        Ok(())
    }
}
