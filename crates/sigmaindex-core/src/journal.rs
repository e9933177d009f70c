//! Undo journal — what each applied block changed, recorded so that
//! rollback is a pure function of the journal.

use serde::{Deserialize, Serialize};

use crate::entries::GroupPlacement;
use crate::payload::{Commitment, Serial};
use crate::types::{Address, BlockSummary, DenominationId, PropertyId};

/// One state change made while applying a block, carrying what its inverse
/// needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppliedOp {
    Issuance {
        txid: String,
        property: PropertyId,
        issuer: Address,
        amount: u64,
        /// The issuance registered the property.
        created_property: bool,
    },
    DenominationCreated {
        txid: String,
        property: PropertyId,
        denomination: DenominationId,
        value: u64,
    },
    MintConfirmed {
        txid: String,
        property: PropertyId,
        denomination: DenominationId,
        commitment: Commitment,
        placement: GroupPlacement,
        /// The mint opened a fresh group.
        opened_group: bool,
    },
    SpendConfirmed {
        txid: String,
        property: PropertyId,
        denomination: DenominationId,
        group: u32,
        serial: Serial,
    },
}

impl AppliedOp {
    pub fn txid(&self) -> &str {
        match self {
            Self::Issuance { txid, .. }
            | Self::DenominationCreated { txid, .. }
            | Self::MintConfirmed { txid, .. }
            | Self::SpendConfirmed { txid, .. } => txid,
        }
    }

    pub fn property(&self) -> PropertyId {
        match self {
            Self::Issuance { property, .. }
            | Self::DenominationCreated { property, .. }
            | Self::MintConfirmed { property, .. }
            | Self::SpendConfirmed { property, .. } => *property,
        }
    }
}

/// A well-formed operation the ledger refused against current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedOp {
    pub txid: String,
    pub reason: String,
}

/// Journal of one applied block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockJournal {
    pub block: BlockSummary,
    /// Applied changes in application order.
    pub ops: Vec<AppliedOp>,
    pub skipped: Vec<SkippedOp>,
}

impl BlockJournal {
    pub fn mint_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, AppliedOp::MintConfirmed { .. }))
            .count()
    }

    pub fn spend_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, AppliedOp::SpendConfirmed { .. }))
            .count()
    }
}
