//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::state::LedgerPolicy;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used for checkpoint keys).
    pub id: String,
    /// Chain to index (e.g. `"firo-regtest"`).
    pub chain: String,
    /// Blocks of history retained for rollback. A reorg reaching further
    /// back requires a full resync.
    pub max_reorg_depth: usize,
    /// Members per denomination group.
    pub group_capacity: u32,
    /// How often to save a checkpoint (every N applied blocks).
    pub checkpoint_interval: u64,
    /// Capacity of the chain event channel.
    pub event_buffer: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "sigma".into(),
            chain: "firo-regtest".into(),
            max_reorg_depth: 128,
            group_capacity: 16384,
            checkpoint_interval: 100,
            event_buffer: 1024,
        }
    }
}

impl IndexerConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, IndexerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| IndexerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.is_empty() {
            return Err(IndexerError::Config("id must not be empty".into()));
        }
        if self.max_reorg_depth == 0 {
            return Err(IndexerError::Config("max_reorg_depth must be at least 1".into()));
        }
        if self.group_capacity == 0 {
            return Err(IndexerError::Config("group_capacity must be at least 1".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(IndexerError::Config("checkpoint_interval must be at least 1".into()));
        }
        if self.event_buffer == 0 {
            return Err(IndexerError::Config("event_buffer must be at least 1".into()));
        }
        Ok(())
    }

    pub fn policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            group_capacity: self.group_capacity,
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Following connected blocks.
    Live,
    /// Rolling back and replaying after a reorg.
    ReorgRecovery,
    /// Shutting down gracefully.
    Stopping,
    /// Terminated.
    Stopped,
    /// Encountered an unrecoverable error.
    Error,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Live => write!(f, "live"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config = IndexerConfig::from_json(r#"{"id": "test", "group_capacity": 4}"#).unwrap();
        assert_eq!(config.id, "test");
        assert_eq!(config.group_capacity, 4);
        assert_eq!(config.max_reorg_depth, 128);
        assert_eq!(config.policy().group_capacity, 4);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(IndexerConfig::from_json(r#"{"max_reorg_depth": 0}"#).is_err());
        let config = IndexerConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IndexerError::Config(_))));
        assert!(IndexerConfig::from_json("not json").is_err());
    }
}
