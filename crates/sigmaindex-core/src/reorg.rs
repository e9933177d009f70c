//! Reorg detection and recovery planning.
//!
//! Every connected block is compared with the ledger's retained history.
//! The detector never touches the ledger; it produces a [`ReorgPlan`] that the
//! ledger executes as one unit:
//! 1. **Duplicate**: the block is the current tip
//! 2. **Extend**: the block's parent is the tip
//! 3. **Rewind**: the block is already in history below the tip
//! 4. **CatchUp**: the block descends from the tip through unseen blocks
//! 5. **Reorg**: the block sits on a competing branch

use crate::error::IndexerError;
use crate::source::ChainSource;
use crate::tracker::BlockTracker;
use crate::types::{Block, BlockSummary};

/// Depth at or below which a reorg is classified as short.
pub const SHORT_REORG_DEPTH: u64 = 3;

/// What a connected block requires of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Duplicate,
    Extend,
    Rewind,
    CatchUp,
    Reorg,
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate => write!(f, "duplicate"),
            Self::Extend => write!(f, "extend"),
            Self::Rewind => write!(f, "rewind"),
            Self::CatchUp => write!(f, "catch-up"),
            Self::Reorg => write!(f, "reorg"),
        }
    }
}

/// Rollbacks and replays that move the ledger onto a connected block.
#[derive(Debug, Clone)]
pub struct ReorgPlan {
    pub kind: PlanKind,
    /// The connected block.
    pub target: BlockSummary,
    /// Last block shared by the old and new chains.
    pub ancestor: Option<BlockSummary>,
    /// Applied blocks to undo, newest first.
    pub rollback: Vec<BlockSummary>,
    /// Blocks to apply, oldest first.
    pub replay: Vec<Block>,
}

impl ReorgPlan {
    fn new(kind: PlanKind, target: &Block) -> Self {
        Self {
            kind,
            target: target.summary(),
            ancestor: None,
            rollback: Vec::new(),
            replay: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.rollback.is_empty() && self.replay.is_empty()
    }

    /// The reorg this plan recovers from, if it undoes any block.
    pub fn event(&self) -> Option<ReorgEvent> {
        if self.rollback.is_empty() {
            return None;
        }
        let depth = self.rollback.len() as u64;
        Some(ReorgEvent {
            detected_at: self.target.height,
            ancestor: self.ancestor.clone(),
            dropped: self.rollback.clone(),
            depth,
            reorg_type: ReorgType::from_depth(depth),
        })
    }
}

/// Describes a detected chain reorganization.
#[derive(Debug, Clone)]
pub struct ReorgEvent {
    /// Height of the connected block that revealed the fork.
    pub detected_at: u64,
    /// The common ancestor.
    pub ancestor: Option<BlockSummary>,
    /// The blocks that were dropped (rolled back), most recent first.
    pub dropped: Vec<BlockSummary>,
    /// Number of blocks rolled back.
    pub depth: u64,
    pub reorg_type: ReorgType,
}

/// Classification of the reorg type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgType {
    /// 1 to 3 blocks.
    ShortReorg,
    DeepReorg,
}

impl ReorgType {
    pub fn from_depth(depth: u64) -> Self {
        if depth <= SHORT_REORG_DEPTH {
            Self::ShortReorg
        } else {
            Self::DeepReorg
        }
    }
}

impl std::fmt::Display for ReorgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortReorg => write!(f, "short reorg"),
            Self::DeepReorg => write!(f, "deep reorg"),
        }
    }
}

/// Plans ledger moves for connected blocks.
#[derive(Debug, Clone)]
pub struct ReorgDetector {
    /// Maximum number of competing-branch blocks fetched while searching for
    /// the common ancestor.
    max_depth: usize,
}

impl ReorgDetector {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Work out how to move the ledger described by `tracker` onto `block`.
    ///
    /// Ancestry is fetched from `source` only when `block` does not connect
    /// to the retained history directly.
    ///
    /// A connect notification always names the node's new tip. A block found
    /// below the ledger tip therefore yields a `Rewind` that rolls back every
    /// block above it, even when the notification is a stale redelivery.
    pub async fn plan(
        &self,
        block: &Block,
        tracker: &BlockTracker,
        source: &dyn ChainSource,
    ) -> Result<ReorgPlan, IndexerError> {
        let Some(head) = tracker.head() else {
            let mut plan = ReorgPlan::new(PlanKind::Extend, block);
            plan.replay.push(block.clone());
            return Ok(plan);
        };

        if head.hash == block.hash {
            return Ok(ReorgPlan::new(PlanKind::Duplicate, block));
        }

        if block.summary().extends(head) {
            let mut plan = ReorgPlan::new(PlanKind::Extend, block);
            plan.ancestor = Some(head.clone());
            plan.replay.push(block.clone());
            return Ok(plan);
        }

        if let Some(pos) = tracker.position(&block.hash) {
            let mut plan = ReorgPlan::new(PlanKind::Rewind, block);
            plan.ancestor = tracker.at(pos).cloned();
            plan.rollback = tracker.after(pos);
            self.log_reorg(&plan);
            return Ok(plan);
        }

        let too_deep = || IndexerError::ReorgTooDeep {
            height: block.height,
            retained: tracker.len(),
        };
        let oldest_height = tracker.oldest().map_or(0, |b| b.height);

        let mut branch = vec![block.clone()];
        let mut parent_hash = block.parent_hash.clone();
        let mut height = block.height;
        let pos = loop {
            if let Some(pos) = tracker.position(&parent_hash) {
                break pos;
            }
            if branch.len() > self.max_depth || height <= oldest_height {
                return Err(too_deep());
            }
            let Some(parent) = source.block_by_hash(&parent_hash).await? else {
                tracing::warn!(hash = %parent_hash, "Ancestor unknown to the chain source");
                return Err(too_deep());
            };
            parent_hash = parent.parent_hash.clone();
            height = parent.height;
            branch.push(parent);
        };
        branch.reverse();

        let rollback = tracker.after(pos);
        let kind = if rollback.is_empty() {
            PlanKind::CatchUp
        } else {
            PlanKind::Reorg
        };
        let mut plan = ReorgPlan::new(kind, block);
        plan.ancestor = tracker.at(pos).cloned();
        plan.rollback = rollback;
        plan.replay = branch;
        if kind == PlanKind::Reorg {
            self.log_reorg(&plan);
        } else {
            tracing::info!(
                from = head.height,
                to = block.height,
                blocks = plan.replay.len(),
                "Catching up to connected block"
            );
        }
        Ok(plan)
    }

    fn log_reorg(&self, plan: &ReorgPlan) {
        let depth = plan.rollback.len() as u64;
        tracing::warn!(
            depth,
            at = plan.target.height,
            ancestor = plan.ancestor.as_ref().map(|a| a.height),
            replay = plan.replay.len(),
            reorg_type = %ReorgType::from_depth(depth),
            "Reorg detected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapSource(HashMap<String, Block>);

    impl MapSource {
        fn add(&mut self, b: &Block) {
            self.0.insert(b.hash.clone(), b.clone());
        }
    }

    #[async_trait]
    impl ChainSource for MapSource {
        async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
            Ok(self.0.get(hash).cloned())
        }
    }

    fn b(height: u64, hash: &str, parent: &str) -> Block {
        Block {
            height,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: height as i64 * 600,
            transactions: vec![],
        }
    }

    /// Tracker holding a1..=a5 (window 5) on top of genesis "a0".
    fn tracker() -> BlockTracker {
        let mut t = BlockTracker::new(5);
        for h in 1..=5u64 {
            t.push(b(h, &format!("a{h}"), &format!("a{}", h - 1)).summary())
                .unwrap();
        }
        t
    }

    #[tokio::test]
    async fn empty_history_extends() {
        let det = ReorgDetector::new(8);
        let plan = det
            .plan(&b(7, "x", "w"), &BlockTracker::new(4), &MapSource::default())
            .await
            .unwrap();
        assert_eq!(plan.kind, PlanKind::Extend);
        assert_eq!(plan.replay.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_and_extension() {
        let det = ReorgDetector::new(8);
        let t = tracker();
        let src = MapSource::default();

        let dup = det.plan(&b(5, "a5", "a4"), &t, &src).await.unwrap();
        assert_eq!(dup.kind, PlanKind::Duplicate);
        assert!(dup.is_noop());

        let ext = det.plan(&b(6, "a6", "a5"), &t, &src).await.unwrap();
        assert_eq!(ext.kind, PlanKind::Extend);
        assert!(ext.event().is_none());
    }

    #[tokio::test]
    async fn short_reorg_plans_rollback_and_replay() {
        let det = ReorgDetector::new(8);
        let t = tracker();
        let mut src = MapSource::default();
        src.add(&b(4, "b4", "a3"));
        src.add(&b(5, "b5", "b4"));

        let plan = det.plan(&b(6, "b6", "b5"), &t, &src).await.unwrap();
        assert_eq!(plan.kind, PlanKind::Reorg);
        assert_eq!(plan.ancestor.as_ref().unwrap().hash, "a3");
        let rolled: Vec<_> = plan.rollback.iter().map(|x| x.hash.as_str()).collect();
        assert_eq!(rolled, vec!["a5", "a4"]);
        let replayed: Vec<_> = plan.replay.iter().map(|x| x.hash.as_str()).collect();
        assert_eq!(replayed, vec!["b4", "b5", "b6"]);

        let event = plan.event().unwrap();
        assert_eq!(event.depth, 2);
        assert_eq!(event.reorg_type, ReorgType::ShortReorg);
    }

    #[tokio::test]
    async fn same_height_replacement() {
        let det = ReorgDetector::new(8);
        let plan = det
            .plan(&b(5, "b5", "a4"), &tracker(), &MapSource::default())
            .await
            .unwrap();
        assert_eq!(plan.kind, PlanKind::Reorg);
        assert_eq!(plan.rollback.len(), 1);
        assert_eq!(plan.replay.len(), 1);
    }

    #[tokio::test]
    async fn rewind_to_block_in_history() {
        let det = ReorgDetector::new(8);
        let plan = det
            .plan(&b(3, "a3", "a2"), &tracker(), &MapSource::default())
            .await
            .unwrap();
        assert_eq!(plan.kind, PlanKind::Rewind);
        let dropped: Vec<_> = plan.rollback.iter().map(|s| s.hash.as_str()).collect();
        assert_eq!(dropped, ["a5", "a4"]);
        assert_eq!(plan.ancestor.as_ref().map(|a| a.hash.as_str()), Some("a3"));
        assert!(plan.replay.is_empty());
    }

    #[tokio::test]
    async fn catch_up_through_unseen_blocks() {
        let det = ReorgDetector::new(8);
        let mut src = MapSource::default();
        src.add(&b(6, "a6", "a5"));
        src.add(&b(7, "a7", "a6"));
        let plan = det.plan(&b(8, "a8", "a7"), &tracker(), &src).await.unwrap();
        assert_eq!(plan.kind, PlanKind::CatchUp);
        assert!(plan.event().is_none());
        assert_eq!(plan.replay.len(), 3);
    }

    #[tokio::test]
    async fn fork_below_retained_history_is_too_deep() {
        let det = ReorgDetector::new(8);
        let mut src = MapSource::default();
        src.add(&b(1, "c1", "a0"));
        for h in 2..=5u64 {
            src.add(&b(h, &format!("c{h}"), &format!("c{}", h - 1)));
        }
        let err = det.plan(&b(6, "c6", "c5"), &tracker(), &src).await.unwrap_err();
        assert!(matches!(err, IndexerError::ReorgTooDeep { height: 6, retained: 5 }));
    }

    #[tokio::test]
    async fn walk_is_bounded_by_max_depth() {
        let det = ReorgDetector::new(2);
        let mut src = MapSource::default();
        src.add(&b(3, "b3", "a2"));
        src.add(&b(4, "b4", "b3"));
        src.add(&b(5, "b5", "b4"));
        let err = det.plan(&b(6, "b6", "b5"), &tracker(), &src).await.unwrap_err();
        assert!(err.requires_resync());
    }

    #[tokio::test]
    async fn unknown_ancestor_is_too_deep() {
        let det = ReorgDetector::new(8);
        let err = det
            .plan(&b(6, "z6", "z5"), &tracker(), &MapSource::default())
            .await
            .unwrap_err();
        assert!(err.requires_resync());
    }
}
