//! The main index loop — feeds chain notifications into the ledger.
//!
//! # Startup
//! Restore the last saved ledger snapshot, if any. The first connected block
//! afterwards catches the ledger up through the normal ancestor walk.
//!
//! # Per event
//! - `BlockConnected`: plan (extend / catch-up / reorg) → commit → dispatch
//!   handlers → checkpoint (forced after a reorg).
//! - `TransactionAccepted`: record its mints and spends as pending.
//!
//! A block refused for a double spend is logged and skipped. A reorg deeper
//! than the retained history stops the loop: the ledger needs a full resync.

use std::future::Future;

use futures::StreamExt;
use tokio::sync::mpsc;

use sigmaindex_core::checkpoint::{CheckpointManager, CheckpointStore};
use sigmaindex_core::error::IndexerError;
use sigmaindex_core::handler::HandlerRegistry;
use sigmaindex_core::indexer::{IndexerConfig, IndexerState};
use sigmaindex_core::ledger::Ledger;
use sigmaindex_core::query::QueryEngine;
use sigmaindex_core::reorg::PlanKind;
use sigmaindex_core::source::ChainSource;
use sigmaindex_core::types::ChainEvent;

/// Outcome of one handled notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLoopEvent {
    Committed {
        kind: PlanKind,
        height: u64,
        rolled_back: usize,
        applied: usize,
    },
    BlockRejected {
        height: u64,
        hash: String,
        reason: String,
    },
    Unconfirmed {
        txid: String,
        created: usize,
    },
}

/// The core index loop implementation.
pub struct IndexLoop<S: ChainSource> {
    config: IndexerConfig,
    source: S,
    ledger: Ledger,
    checkpoint: CheckpointManager,
    handlers: HandlerRegistry,
    state: IndexerState,
}

impl<S: ChainSource> IndexLoop<S> {
    pub fn new(
        config: IndexerConfig,
        source: S,
        store: Box<dyn CheckpointStore>,
        handlers: HandlerRegistry,
    ) -> Self {
        let checkpoint = CheckpointManager::new(
            store,
            &config.chain,
            &config.id,
            config.checkpoint_interval,
        );
        Self {
            source,
            ledger: Ledger::new(config.policy(), config.max_reorg_depth),
            checkpoint,
            handlers,
            state: IndexerState::Idle,
            config,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    /// Read handle onto the ledger.
    pub fn query(&self) -> QueryEngine {
        self.ledger.query()
    }

    /// Restore the saved snapshot. Returns `true` if one was found.
    pub async fn restore(&mut self) -> Result<bool, IndexerError> {
        let Some(saved) = self.checkpoint.load().await? else {
            tracing::info!(indexer = %self.config.id, "No checkpoint, starting from an empty ledger");
            return Ok(false);
        };
        tracing::info!(
            height = saved.height,
            hash = %saved.block_hash,
            updated_at = saved.updated_at,
            "Resuming from checkpoint"
        );
        if saved.state.tracker().window_size() != self.config.max_reorg_depth {
            tracing::warn!(
                saved = saved.state.tracker().window_size(),
                configured = self.config.max_reorg_depth,
                "Checkpoint retains a different history depth than configured"
            );
        }
        self.ledger.restore(saved.state);
        Ok(true)
    }

    /// Handle a single chain notification.
    pub async fn handle_event(&mut self, event: ChainEvent) -> Result<IndexLoopEvent, IndexerError> {
        let block = match event {
            ChainEvent::TransactionAccepted(tx) => {
                let created = self.ledger.observe_unconfirmed(&tx);
                return Ok(IndexLoopEvent::Unconfirmed { txid: tx.txid, created });
            }
            ChainEvent::BlockConnected(block) => block,
        };

        let report = match self.ledger.connect_block(&block, &self.source).await {
            Ok(report) => report,
            Err(e) if e.is_block_rejection() => {
                tracing::warn!(height = block.height, hash = %block.hash, error = %e, "Block rejected");
                return Ok(IndexLoopEvent::BlockRejected {
                    height: block.height,
                    hash: block.hash,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        if report.is_reorg() {
            self.state = IndexerState::ReorgRecovery;
        }
        for warning in &report.warnings {
            tracing::debug!(txid = %warning.txid, reason = %warning.reason, "Malformed payload in connected block");
        }
        self.handlers.dispatch_commit(&report, &self.config.chain).await?;

        let snapshot = self.ledger.snapshot();
        if report.is_reorg() {
            self.checkpoint.force_save(&snapshot).await?;
            self.state = IndexerState::Live;
        } else {
            self.checkpoint
                .maybe_save(&snapshot, report.applied.len() as u64)
                .await?;
        }

        if !report.applied.is_empty() || report.is_reorg() {
            tracing::info!(
                kind = %report.kind,
                height = block.height,
                rolled_back = report.rolled_back.len(),
                applied = report.applied.len(),
                "Block connected"
            );
        }
        Ok(IndexLoopEvent::Committed {
            kind: report.kind,
            height: report.checkpoint.map_or(block.height, |cp| cp.height),
            rolled_back: report.rolled_back.len(),
            applied: report.applied.len(),
        })
    }

    /// Run until `events` closes or `shutdown` resolves.
    pub async fn run<F>(
        &mut self,
        events: mpsc::Receiver<ChainEvent>,
        shutdown: F,
    ) -> Result<(), IndexerError>
    where
        F: Future<Output = ()>,
    {
        self.restore().await?;
        self.state = IndexerState::Live;

        let stream = futures::stream::unfold(events, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        futures::pin_mut!(stream);
        futures::pin_mut!(shutdown);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else {
                tracing::info!("Chain event feed closed");
                break;
            };
            if let Err(e) = self.handle_event(event).await {
                self.state = IndexerState::Error;
                if e.requires_resync() {
                    tracing::error!(error = %e, "Ledger cannot follow the chain, full resync required");
                } else {
                    tracing::error!(error = %e, "Index loop failed");
                }
                return Err(e);
            }
        }

        self.state = IndexerState::Stopping;
        self.checkpoint.force_save(&self.ledger.snapshot()).await?;
        self.state = IndexerState::Stopped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::NodeFetcher;
    use crate::simulated::SimulatedChain;
    use sigmaindex_core::checkpoint::MemoryCheckpointStore;
    use sigmaindex_core::payload::encode_issuance;
    use sigmaindex_core::types::RawTransaction;

    fn new_loop(chain: &SimulatedChain) -> IndexLoop<NodeFetcher<SimulatedChain>> {
        IndexLoop::new(
            IndexerConfig::default(),
            NodeFetcher::new(chain.clone()),
            Box::new(MemoryCheckpointStore::new()),
            HandlerRegistry::new(),
        )
    }

    #[tokio::test]
    async fn run_until_feed_closes() {
        let chain = SimulatedChain::new();
        let events = chain.subscribe(16).await;
        let mut index = new_loop(&chain);
        let query = index.query();

        chain
            .send_raw_transaction(RawTransaction::new("i", "alice", encode_issuance(3, 5, "S")))
            .await
            .unwrap();
        chain.generate(3).await.unwrap();
        chain.unsubscribe().await;

        index.run(events, std::future::pending()).await.unwrap();
        assert_eq!(index.state(), IndexerState::Stopped);
        assert_eq!(query.checkpoint().unwrap().height, 3);
        assert_eq!(query.get_balance("alice", 3).balance, 5);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let chain = SimulatedChain::new();
        let events = chain.subscribe(4).await;
        let mut index = new_loop(&chain);
        index.run(events, async {}).await.unwrap();
        assert_eq!(index.state(), IndexerState::Stopped);
    }

    #[tokio::test]
    async fn too_deep_reorg_stops_with_error() {
        let chain = SimulatedChain::new();
        let events = chain.subscribe(16).await;
        let mut index = IndexLoop::new(
            IndexerConfig {
                max_reorg_depth: 2,
                ..Default::default()
            },
            NodeFetcher::new(chain.clone()),
            Box::new(MemoryCheckpointStore::new()),
            HandlerRegistry::new(),
        );

        let hashes = chain.generate(4).await.unwrap();
        chain.invalidate_block(&hashes[0]).await.unwrap();
        chain.generate(5).await.unwrap();
        chain.unsubscribe().await;

        let err = index.run(events, std::future::pending()).await.unwrap_err();
        assert!(err.requires_resync());
        assert_eq!(index.state(), IndexerState::Error);
    }
}
