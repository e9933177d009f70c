//! The single ledger writer.
//!
//! [`Ledger`] owns the published [`LedgerState`] snapshot. Each connected
//! block is turned into a [`ReorgPlan`], executed against a private draft and
//! published in one `watch` send once every rollback and replay succeeded.
//! Readers ([`QueryEngine`]) only ever see committed snapshots.

use std::sync::Arc;

use tokio::sync::watch;

use crate::checkpoint::Checkpoint;
use crate::classifier::{ClassifierWarning, TransactionClassifier};
use crate::error::IndexerError;
use crate::journal::BlockJournal;
use crate::query::QueryEngine;
use crate::reorg::{PlanKind, ReorgDetector, ReorgEvent, ReorgPlan};
use crate::source::ChainSource;
use crate::state::{LedgerPolicy, LedgerState};
use crate::types::{Block, RawTransaction};

/// Outcome of one committed plan.
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub kind: PlanKind,
    /// Set when the plan undid blocks.
    pub event: Option<ReorgEvent>,
    /// Journals of undone blocks, newest first.
    pub rolled_back: Vec<BlockJournal>,
    /// Journals of applied blocks, oldest first.
    pub applied: Vec<BlockJournal>,
    /// Checkpoint after the commit.
    pub checkpoint: Option<Checkpoint>,
    /// Malformed payloads seen in replayed blocks.
    pub warnings: Vec<ClassifierWarning>,
}

impl CommitReport {
    pub fn is_reorg(&self) -> bool {
        !self.rolled_back.is_empty()
    }
}

/// Writer side of the ledger.
pub struct Ledger {
    classifier: TransactionClassifier,
    detector: ReorgDetector,
    published: watch::Sender<Arc<LedgerState>>,
}

impl Ledger {
    /// A fresh ledger retaining `max_reorg_depth` blocks of history.
    pub fn new(policy: LedgerPolicy, max_reorg_depth: usize) -> Self {
        Self::from_state(LedgerState::new(policy, max_reorg_depth), max_reorg_depth)
    }

    /// Resume from a previously saved state.
    pub fn from_state(state: LedgerState, max_reorg_depth: usize) -> Self {
        let (published, _) = watch::channel(Arc::new(state));
        Self {
            classifier: TransactionClassifier::new(),
            detector: ReorgDetector::new(max_reorg_depth),
            published,
        }
    }

    /// A read handle observing every future commit.
    pub fn query(&self) -> QueryEngine {
        QueryEngine::new(self.published.subscribe())
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<LedgerState> {
        self.published.borrow().clone()
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.published.borrow().checkpoint().cloned()
    }

    /// Replace the published state wholesale (restore from a saved snapshot).
    pub fn restore(&mut self, state: LedgerState) {
        tracing::info!(
            checkpoint = ?state.checkpoint().map(|c| c.height),
            retained = state.tracker().len(),
            "Ledger state restored"
        );
        self.published.send_replace(Arc::new(state));
    }

    /// Handle a block-connect notification.
    pub async fn connect_block(
        &mut self,
        block: &Block,
        source: &dyn ChainSource,
    ) -> Result<CommitReport, IndexerError> {
        let current = self.snapshot();
        let plan = self.detector.plan(block, current.tracker(), source).await?;
        self.commit(&plan)
    }

    /// Execute `plan` as one unit. On error nothing is published.
    pub fn commit(&mut self, plan: &ReorgPlan) -> Result<CommitReport, IndexerError> {
        let current = self.snapshot();
        let mut report = CommitReport {
            kind: plan.kind,
            event: plan.event(),
            rolled_back: Vec::with_capacity(plan.rollback.len()),
            applied: Vec::with_capacity(plan.replay.len()),
            checkpoint: current.checkpoint().cloned(),
            warnings: Vec::new(),
        };
        if plan.is_noop() {
            return Ok(report);
        }

        let mut draft = LedgerState::clone(&current);
        for summary in &plan.rollback {
            report.rolled_back.push(draft.rollback_block(summary)?);
        }
        for block in &plan.replay {
            let classified = self.classifier.classify(&block.transactions);
            if let Some(journal) = draft.apply_block(block, &classified)? {
                report.applied.push(journal);
            }
            report.warnings.extend(classified.warnings);
        }

        report.checkpoint = draft.checkpoint().cloned();
        self.published.send_replace(Arc::new(draft));

        tracing::debug!(
            kind = %plan.kind,
            target = plan.target.height,
            rolled_back = report.rolled_back.len(),
            applied = report.applied.len(),
            "Plan committed"
        );
        Ok(report)
    }

    /// Record a mempool transaction's mints and spends as pending.
    pub fn observe_unconfirmed(&mut self, tx: &RawTransaction) -> usize {
        let classified = self.classifier.classify_one(tx);
        if classified.ops.is_empty() {
            return 0;
        }
        let mut draft = LedgerState::clone(&self.snapshot());
        let created = draft.observe_unconfirmed(&classified);
        if created > 0 {
            self.published.send_replace(Arc::new(draft));
            tracing::debug!(txid = %tx.txid, created, "Unconfirmed Sigma transaction observed");
        }
        created
    }
}
