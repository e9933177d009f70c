//! SQLite storage backend for SigmaIndex.
//!
//! Persists ledger snapshots and applied-block journals to a single SQLite
//! file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use sigmaindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./sigma.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use sigmaindex_core::checkpoint::{CheckpointStore, SavedCheckpoint};
use sigmaindex_core::error::IndexerError;
use sigmaindex_core::handler::{BlockHandler, RollbackHandler};
use sigmaindex_core::journal::BlockJournal;
use sigmaindex_core::types::IndexContext;

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed storage for snapshots and block journals.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./sigma.db"`) or a full
    /// SQLite URL (`"sqlite:./sigma.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // each connection would get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     TEXT    NOT NULL,
                indexer_id   TEXT    NOT NULL,
                height       INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                state_json   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain_id, indexer_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_journals (
                chain_id     TEXT    NOT NULL,
                height       INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                mints        INTEGER NOT NULL,
                spends       INTEGER NOT NULL,
                journal_json TEXT    NOT NULL,
                PRIMARY KEY (chain_id, height)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    // ─── Journal storage ────────────────────────────────────────────────────────

    /// Record an applied block's journal, replacing any at the same height.
    pub async fn insert_journal(&self, chain_id: &str, journal: &BlockJournal) -> Result<(), IndexerError> {
        let json = serde_json::to_string(journal).map_err(storage_err)?;

        sqlx::query(
            "INSERT OR REPLACE INTO block_journals
             (chain_id, height, block_hash, mints, spends, journal_json)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(chain_id)
        .bind(journal.block.height as i64)
        .bind(&journal.block.hash)
        .bind(journal.mint_count() as i64)
        .bind(journal.spend_count() as i64)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(chain_id, height = journal.block.height, "journal stored");
        Ok(())
    }

    /// Journal of the block at `height` on the active chain.
    pub async fn journal(&self, chain_id: &str, height: u64) -> Result<Option<BlockJournal>, IndexerError> {
        let row = sqlx::query(
            "SELECT journal_json FROM block_journals WHERE chain_id = ? AND height = ?",
        )
        .bind(chain_id)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|r| {
            let json: String = r.get("journal_json");
            serde_json::from_str(&json).map_err(storage_err)
        })
        .transpose()
    }

    /// Hash of the journaled block at `height`.
    pub async fn get_block_hash(&self, chain_id: &str, height: u64) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query(
            "SELECT block_hash FROM block_journals WHERE chain_id = ? AND height = ?",
        )
        .bind(chain_id)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| r.get("block_hash")))
    }

    /// Number of journaled blocks for `chain_id`.
    pub async fn journal_count(&self, chain_id: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM block_journals WHERE chain_id = ?")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Delete journals above `height` (reorg recovery).
    pub async fn rollback_after(&self, chain_id: &str, height: u64) -> Result<(), IndexerError> {
        let result = sqlx::query("DELETE FROM block_journals WHERE chain_id = ? AND height > ?")
            .bind(chain_id)
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!(chain_id, height, removed = result.rows_affected(), "journals rolled back");
        Ok(())
    }
}

// ─── CheckpointStore ─────────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<SavedCheckpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT chain_id, indexer_id, height, block_hash, state_json, updated_at
             FROM checkpoints WHERE chain_id = ? AND indexer_id = ?",
        )
        .bind(chain_id)
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(r) = row else {
            return Ok(None);
        };
        let state_json: String = r.get("state_json");
        Ok(Some(SavedCheckpoint {
            chain_id: r.get("chain_id"),
            indexer_id: r.get("indexer_id"),
            height: r.get::<i64, _>("height") as u64,
            block_hash: r.get("block_hash"),
            state: serde_json::from_str(&state_json).map_err(storage_err)?,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: SavedCheckpoint) -> Result<(), IndexerError> {
        let state_json = serde_json::to_string(&checkpoint.state).map_err(storage_err)?;

        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, indexer_id, height, block_hash, state_json, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.indexer_id)
        .bind(checkpoint.height as i64)
        .bind(&checkpoint.block_hash)
        .bind(&state_json)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            indexer_id = %checkpoint.indexer_id,
            height = checkpoint.height,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE chain_id = ? AND indexer_id = ?")
            .bind(chain_id)
            .bind(indexer_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

#[async_trait]
impl BlockHandler for SqliteStorage {
    async fn handle_block(&self, journal: &BlockJournal, ctx: &IndexContext) -> Result<(), IndexerError> {
        self.insert_journal(&ctx.chain, journal).await
    }
}

#[async_trait]
impl RollbackHandler for SqliteStorage {
    async fn handle_rollback(&self, journal: &BlockJournal, ctx: &IndexContext) -> Result<(), IndexerError> {
        self.rollback_after(&ctx.chain, journal.block.height.saturating_sub(1))
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
