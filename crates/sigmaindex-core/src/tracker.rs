//! Block tracker — the bounded window of applied block headers that anchors
//! reorg detection and bounds how far the ledger can roll back.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::BlockSummary;

/// Tracks the last N applied block headers (oldest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTracker {
    window: VecDeque<BlockSummary>,
    window_size: usize,
}

impl BlockTracker {
    /// Create a new tracker retaining at most `window_size` blocks.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size.min(1024)),
            window_size: window_size.max(1),
        }
    }

    /// Append a block that extends the current head.
    ///
    /// Returns the evicted oldest block once the window is full.
    pub fn push(&mut self, block: BlockSummary) -> Result<Option<BlockSummary>, IndexerError> {
        if let Some(head) = self.window.back() {
            if !block.extends(head) {
                return Err(IndexerError::UnrecoverableState(format!(
                    "block {} at height {} does not extend tracked head {} at height {}",
                    block.hash, block.height, head.hash, head.height
                )));
            }
        }
        let evicted = if self.window.len() >= self.window_size {
            self.window.pop_front()
        } else {
            None
        };
        self.window.push_back(block);
        Ok(evicted)
    }

    /// Remove and return the head.
    pub fn pop(&mut self) -> Option<BlockSummary> {
        self.window.pop_back()
    }

    /// Returns the current head (most recently applied block).
    pub fn head(&self) -> Option<&BlockSummary> {
        self.window.back()
    }

    /// Returns the oldest retained block.
    pub fn oldest(&self) -> Option<&BlockSummary> {
        self.window.front()
    }

    /// Returns a block by height if it's in the window.
    pub fn get(&self, height: u64) -> Option<&BlockSummary> {
        self.window.iter().find(|b| b.height == height)
    }

    /// Block at `position` (0 = oldest).
    pub fn at(&self, position: usize) -> Option<&BlockSummary> {
        self.window.get(position)
    }

    /// Position of the block with `hash` in the window (0 = oldest).
    pub fn position(&self, hash: &str) -> Option<usize> {
        self.window.iter().rposition(|b| b.hash == hash)
    }

    /// Blocks strictly after `position`, newest first.
    pub fn after(&self, position: usize) -> Vec<BlockSummary> {
        self.window.iter().skip(position + 1).rev().cloned().collect()
    }

    /// Number of blocks in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Returns `true` if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Maximum number of retained blocks.
    pub fn window_size(&self) -> usize {
        self.window_size
    }
}
