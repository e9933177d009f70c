//! Error types for the sigmaindex pipeline.

use thiserror::Error;

use crate::types::PropertyId;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Reorg at height {height} reaches beyond the {retained} retained blocks; full resync required")]
    ReorgTooDeep { height: u64, retained: usize },

    #[error("Double spend of serial {serial} for property {property} in block {block_hash}")]
    DoubleSpend {
        property: PropertyId,
        serial: String,
        block_hash: String,
    },

    #[error("Ledger state is unrecoverable: {0}")]
    UnrecoverableState(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the ledger can no longer follow the chain and must
    /// be rebuilt from genesis.
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::ReorgTooDeep { .. } | Self::UnrecoverableState(_))
    }

    /// Returns `true` if the error refused a single block but left the
    /// ledger intact.
    pub fn is_block_rejection(&self) -> bool {
        matches!(self, Self::DoubleSpend { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let deep = IndexerError::ReorgTooDeep { height: 10, retained: 4 };
        assert!(deep.requires_resync());
        assert!(!deep.is_block_rejection());

        let ds = IndexerError::DoubleSpend {
            property: 3,
            serial: "ab".into(),
            block_hash: "h".into(),
        };
        assert!(ds.is_block_rejection());
        assert!(!ds.requires_resync());
        assert_eq!(
            ds.to_string(),
            "Double spend of serial ab for property 3 in block h"
        );
    }
}
