//! Fluent builder API for creating Sigma indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use sigmaindex_node::{IndexerBuilder, NodeFetcher, SimulatedChain};
//!
//! # async fn run() -> Result<(), sigmaindex_core::IndexerError> {
//! let chain = SimulatedChain::new();
//! let events = chain.subscribe(1024).await;
//! let mut index = IndexerBuilder::new()
//!     .id("sigma-regtest")
//!     .chain("firo-regtest")
//!     .max_reorg_depth(64)
//!     .build(NodeFetcher::new(chain.clone()))?;
//! index.run(events, std::future::pending()).await
//! # }
//! ```

use std::sync::Arc;

use sigmaindex_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use sigmaindex_core::error::IndexerError;
use sigmaindex_core::handler::{BlockHandler, HandlerRegistry, ReorgHandler, RollbackHandler};
use sigmaindex_core::indexer::IndexerConfig;
use sigmaindex_core::source::ChainSource;

use crate::index_loop::IndexLoop;

/// Fluent builder for `IndexerConfig` and `IndexLoop`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    store: Option<Box<dyn CheckpointStore>>,
    handlers: HandlerRegistry,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the indexer ID (used for checkpoint keys).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the chain slug.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set how many blocks of history are retained for rollback.
    pub fn max_reorg_depth(mut self, depth: usize) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    /// Set the denomination group capacity.
    pub fn group_capacity(mut self, capacity: u32) -> Self {
        self.config.group_capacity = capacity;
        self
    }

    /// Set checkpoint save interval (every N blocks).
    pub fn checkpoint_interval(mut self, n: u64) -> Self {
        self.config.checkpoint_interval = n;
        self
    }

    /// Set the chain event channel capacity.
    pub fn event_buffer(mut self, n: usize) -> Self {
        self.config.event_buffer = n;
        self
    }

    /// Persist snapshots to `store` (defaults to memory).
    pub fn checkpoint_store(mut self, store: Box<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn on_block(mut self, handler: Arc<dyn BlockHandler>) -> Self {
        self.handlers.on_block(handler);
        self
    }

    pub fn on_rollback(mut self, handler: Arc<dyn RollbackHandler>) -> Self {
        self.handlers.on_rollback(handler);
        self
    }

    pub fn on_reorg(mut self, handler: Arc<dyn ReorgHandler>) -> Self {
        self.handlers.on_reorg(handler);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the config and build an `IndexLoop` reading ancestry from `source`.
    pub fn build<S: ChainSource>(self, source: S) -> Result<IndexLoop<S>, IndexerError> {
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryCheckpointStore::new()));
        Ok(IndexLoop::new(self.config, source, store, self.handlers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::NodeFetcher;
    use crate::simulated::SimulatedChain;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.chain, "firo-regtest");
        assert_eq!(cfg.max_reorg_depth, 128);
        assert_eq!(cfg.group_capacity, 16384);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .id("my-indexer")
            .chain("firo-test")
            .max_reorg_depth(16)
            .group_capacity(8)
            .checkpoint_interval(5)
            .event_buffer(32)
            .build_config();

        assert_eq!(cfg.id, "my-indexer");
        assert_eq!(cfg.chain, "firo-test");
        assert_eq!(cfg.max_reorg_depth, 16);
        assert_eq!(cfg.group_capacity, 8);
        assert_eq!(cfg.checkpoint_interval, 5);
        assert_eq!(cfg.event_buffer, 32);
    }

    #[test]
    fn build_validates() {
        let source = NodeFetcher::new(SimulatedChain::new());
        assert!(IndexerBuilder::new().group_capacity(0).build(source).is_err());
        let index = IndexerBuilder::new()
            .id("ok")
            .build(NodeFetcher::new(SimulatedChain::new()))
            .unwrap();
        assert_eq!(index.config().id, "ok");
    }
}
