//! sigmaindex-core — a reorg-safe ledger of Sigma mints and spends.
//!
//! # Architecture
//!
//! ```text
//! ChainEvent → Ledger
//!                ├── ReorgDetector          (duplicate / extend / rewind / catch-up / reorg)
//!                ├── TransactionClassifier  (payload codec → SigmaOp)
//!                ├── LedgerState            (apply / rollback via undo journal)
//!                │     └── BlockTracker     (retained history)
//!                └── watch::Sender<Arc<LedgerState>> → QueryEngine
//! ```
//!
//! `CheckpointManager` persists whole-ledger snapshots and `HandlerRegistry`
//! receives every commit; both are driven by the node crate's `IndexLoop`.

pub mod checkpoint;
pub mod classifier;
pub mod entries;
pub mod error;
pub mod handler;
pub mod indexer;
pub mod journal;
pub mod ledger;
pub mod payload;
pub mod query;
pub mod reorg;
pub mod source;
pub mod state;
pub mod tracker;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore, SavedCheckpoint};
pub use classifier::{Classification, ClassifiedOp, TransactionClassifier};
pub use entries::{DenominationGroup, EntryStatus, MintEntry, PropertyBalance, PropertyRecord, SpendEntry};
pub use error::IndexerError;
pub use handler::{BlockHandler, HandlerRegistry, ReorgHandler, RollbackHandler};
pub use indexer::{IndexerConfig, IndexerState};
pub use journal::{AppliedOp, BlockJournal};
pub use ledger::{CommitReport, Ledger};
pub use payload::{Commitment, Serial, SigmaOp};
pub use query::QueryEngine;
pub use reorg::{PlanKind, ReorgDetector, ReorgEvent, ReorgPlan, ReorgType};
pub use source::ChainSource;
pub use state::{LedgerPolicy, LedgerState};
pub use tracker::BlockTracker;
pub use types::{Address, Block, BlockSummary, ChainEvent, DenominationId, IndexContext, IndexPhase, PropertyId, RawTransaction};
