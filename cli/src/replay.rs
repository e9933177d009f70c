//! `sigmaindex replay` — index blocks read from a JSON file.
//!
//! Blocks are delivered in file order as connect notifications. Competing
//! branches may appear in the file; ancestry is resolved against every block
//! the file contains.

use std::collections::HashMap;
use std::fs;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use sigmaindex_core::checkpoint::Checkpoint;
use sigmaindex_core::entries::PropertyBalance;
use sigmaindex_core::error::IndexerError;
use sigmaindex_core::indexer::IndexerConfig;
use sigmaindex_core::source::ChainSource;
use sigmaindex_core::types::{Block, ChainEvent, PropertyId};
use sigmaindex_node::{IndexLoopEvent, IndexerBuilder};

use crate::parse_flag;

/// Every block of the replay file, by hash.
struct FileSource(HashMap<String, Block>);

#[async_trait]
impl ChainSource for FileSource {
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        Ok(self.0.get(hash).cloned())
    }
}

#[derive(Debug, Serialize)]
struct ReplaySummary {
    blocks: usize,
    reorgs: usize,
    rejected: Vec<String>,
    checkpoint: Option<Checkpoint>,
    mints: usize,
    pending_mints: usize,
    spends: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<PropertyBalance>,
}

pub async fn run(args: &[String]) -> Result<()> {
    let path = args
        .first()
        .filter(|a| !a.starts_with("--"))
        .context("replay needs a blocks file")?;
    let config = match parse_flag(args, "--config") {
        Some(file) => {
            let json = fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            IndexerConfig::from_json(&json)?
        }
        None => IndexerConfig::default(),
    };
    let property: PropertyId = match parse_flag(args, "--property") {
        Some(p) => p.parse().with_context(|| format!("invalid property id {p}"))?,
        None => 3,
    };
    let address = parse_flag(args, "--address");

    let json = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let blocks: Vec<Block> = serde_json::from_str(&json).with_context(|| format!("parsing {path}"))?;
    tracing::info!(path = %path, blocks = blocks.len(), "Replaying blocks");

    let source = FileSource(blocks.iter().map(|b| (b.hash.clone(), b.clone())).collect());
    let mut index = IndexerBuilder::from_config(config).build(source)?;

    let mut reorgs = 0;
    let mut rejected = Vec::new();
    for block in &blocks {
        match index.handle_event(ChainEvent::BlockConnected(block.clone())).await? {
            IndexLoopEvent::Committed { rolled_back, .. } if rolled_back > 0 => reorgs += 1,
            IndexLoopEvent::BlockRejected { hash, .. } => rejected.push(hash),
            _ => {}
        }
    }

    let query = index.query();
    let summary = ReplaySummary {
        blocks: blocks.len(),
        reorgs,
        rejected,
        checkpoint: query.checkpoint(),
        mints: query.list_mints(None).len(),
        pending_mints: query.list_pending_mints(None).len(),
        spends: query.list_spends(None).len(),
        balance: address.map(|a| query.get_balance(&a, property)),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
