//! Read access to the node's block store, used to walk a competing branch
//! back to the last common ancestor.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::Block;

/// Anything that can return full blocks by hash.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Fetch a block by hash. `Ok(None)` if the node does not know it.
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError>;
}
