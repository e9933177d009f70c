//! `sigmaindex demo` — mint, spend, reorg and replay on a simulated node.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;

use sigmaindex_core::payload::{
    encode_create_denomination, encode_issuance, encode_mint, encode_spend, Commitment, Serial,
    COMMITMENT_LEN, SERIAL_LEN,
};
use sigmaindex_core::types::{ChainEvent, PropertyId, RawTransaction};
use sigmaindex_node::{IndexLoop, IndexerBuilder, NodeFetcher, SimulatedChain};

const PROPERTY: PropertyId = 3;
const ISSUED: u64 = 10;
const OWNER: &str = "TXo1wPqyEP5vtd8T3pQcqfpC4T2DGXnf3m";

/// Ledger view after one step of the scenario.
#[derive(Debug, Serialize)]
pub struct Stage {
    pub step: &'static str,
    pub chain_tip: u64,
    pub ledger_checkpoint: Option<u64>,
    pub mints: usize,
    pub pending_mints: usize,
    pub confirmed_spends: usize,
    pub balance: u64,
}

type Index = IndexLoop<NodeFetcher<SimulatedChain>>;

struct Demo {
    chain: SimulatedChain,
    events: mpsc::Receiver<ChainEvent>,
    index: Index,
    stages: Vec<Stage>,
}

impl Demo {
    /// Feed every pending notification into the index loop.
    async fn sync(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            self.index.handle_event(event).await?;
        }
        Ok(())
    }

    async fn send(&self, tx: RawTransaction) -> Result<()> {
        self.chain.send_raw_transaction(tx).await?;
        Ok(())
    }

    async fn mine(&mut self) -> Result<String> {
        let hash = self
            .chain
            .generate(1)
            .await?
            .pop()
            .context("node mined no block")?;
        self.sync().await?;
        Ok(hash)
    }

    async fn record(&mut self, step: &'static str) -> Result<()> {
        let query = self.index.query();
        let stage = Stage {
            step,
            chain_tip: self.chain.tip().await.map_or(0, |t| t.height),
            ledger_checkpoint: query.checkpoint().map(|c| c.height),
            mints: query.list_mints(Some(PROPERTY)).len(),
            pending_mints: query.list_pending_mints(Some(PROPERTY)).len(),
            confirmed_spends: query
                .list_spends(Some(PROPERTY))
                .iter()
                .filter(|s| s.is_confirmed())
                .count(),
            balance: query.get_balance(OWNER, PROPERTY).balance,
        };
        tracing::info!(step, mints = stage.mints, pending = stage.pending_mints, "Demo step");
        self.stages.push(stage);
        Ok(())
    }
}

fn coin(n: u8) -> Commitment {
    Commitment::from_bytes(&[n; COMMITMENT_LEN])
}

fn serial(n: u8) -> Serial {
    Serial::from_bytes(&[n; SERIAL_LEN])
}

fn mint_tx(txid: &str, n: u8) -> Result<RawTransaction> {
    Ok(RawTransaction::new(txid, OWNER, encode_mint(PROPERTY, &[(0, coin(n))])?))
}

fn spend_tx(txid: &str, n: u8) -> Result<RawTransaction> {
    let payload = encode_spend(PROPERTY, 0, 0, &serial(n), &[0x5a; 96])?;
    Ok(RawTransaction::new(txid, OWNER, payload).to(OWNER))
}

/// Run the scenario and return the ledger view after each step.
pub async fn run() -> Result<Vec<Stage>> {
    let chain = SimulatedChain::new();
    let index = IndexerBuilder::new()
        .id("demo")
        .chain("firo-regtest")
        .max_reorg_depth(16)
        .build(NodeFetcher::new(chain.clone()))?;
    let events = chain.subscribe(index.config().event_buffer).await;
    let mut demo = Demo {
        chain,
        events,
        index,
        stages: Vec::new(),
    };

    demo.send(RawTransaction::new("issue", OWNER, encode_issuance(PROPERTY, ISSUED, "Sigma")))
        .await?;
    demo.send(RawTransaction::new("denom", OWNER, encode_create_denomination(PROPERTY, 1)))
        .await?;
    demo.mine().await?;
    demo.record("issued").await?;

    demo.send(mint_tx("mint-1", 1)?).await?;
    demo.mine().await?;
    demo.send(mint_tx("mint-2", 2)?).await?;
    demo.send(spend_tx("spend-1", 1)?).await?;
    let tip = demo.mine().await?;
    demo.record("minted and spent").await?;

    demo.chain.invalidate_block(&tip).await?;
    demo.sync().await?;
    demo.record("tip invalidated").await?;

    demo.chain.clear_mempool().await;
    demo.mine().await?;
    demo.record("replacement block").await?;

    demo.send(mint_tx("mint-2b", 2)?).await?;
    demo.send(spend_tx("spend-1b", 1)?).await?;
    demo.mine().await?;
    demo.record("rebroadcast").await?;

    demo.send(spend_tx("spend-2", 2)?).await?;
    demo.mine().await?;
    demo.record("all spent").await?;

    let last = demo.stages.last().map_or(0, |s| s.balance);
    if last != ISSUED {
        bail!("balance {last} after spending every coin, expected {ISSUED}");
    }
    Ok(demo.stages)
}
