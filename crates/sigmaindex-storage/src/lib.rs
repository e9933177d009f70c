//! sigmaindex-storage — pluggable storage backends for SigmaIndex.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement `CheckpointStore` for ledger snapshots, and the block and
//! rollback handler traits to keep a log of applied-block journals.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;
