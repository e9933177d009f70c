//! Ledger records: mint/spend entries, denomination groups, property records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::payload::{Commitment, Serial};
use crate::types::{Address, DenominationId, PropertyId};

/// Confirmation state of a mint or spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Known, but not confirmed by any block this ledger has applied.
    Pending,
    /// Included in a block of the active chain.
    Confirmed,
}

/// Where a confirmed mint sits in its denomination's anonymity sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPlacement {
    pub group_id: u32,
    pub group_index: u32,
}

// ─── MintEntry ───────────────────────────────────────────────────────────────

/// One shielded deposit, keyed by its commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintEntry {
    pub property: PropertyId,
    pub denomination: DenominationId,
    pub commitment: Commitment,
    /// Address whose balance funded the mint.
    pub owner: Address,
    /// Denomination value; 0 while the denomination is unknown.
    pub value: u64,
    pub origin_txid: String,
    pub status: EntryStatus,
    /// Set while confirmed.
    pub group: Option<GroupPlacement>,
    pub confirmed_height: Option<u64>,
    pub confirmed_block_hash: Option<String>,
}

impl MintEntry {
    pub fn is_confirmed(&self) -> bool {
        self.status == EntryStatus::Confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    /// Returns `true` if confirmed by the block with `hash`.
    pub fn confirmed_in(&self, hash: &str) -> bool {
        self.is_confirmed() && self.confirmed_block_hash.as_deref() == Some(hash)
    }

    pub(crate) fn confirm(&mut self, placement: GroupPlacement, height: u64, block_hash: &str) {
        self.status = EntryStatus::Confirmed;
        self.group = Some(placement);
        self.confirmed_height = Some(height);
        self.confirmed_block_hash = Some(block_hash.to_string());
    }

    pub(crate) fn unconfirm(&mut self) {
        self.status = EntryStatus::Pending;
        self.group = None;
        self.confirmed_height = None;
        self.confirmed_block_hash = None;
    }
}

// ─── SpendEntry ──────────────────────────────────────────────────────────────

/// Consumption of one mint, keyed by `(property, serial)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendEntry {
    pub property: PropertyId,
    pub denomination: DenominationId,
    pub group_id: u32,
    pub serial: Serial,
    /// Address credited with the redeemed value.
    pub recipient: Address,
    pub value: u64,
    pub origin_txid: String,
    pub status: EntryStatus,
    pub confirmed_height: Option<u64>,
    pub confirmed_block_hash: Option<String>,
}

impl SpendEntry {
    pub fn is_confirmed(&self) -> bool {
        self.status == EntryStatus::Confirmed
    }

    pub fn confirmed_in(&self, hash: &str) -> bool {
        self.is_confirmed() && self.confirmed_block_hash.as_deref() == Some(hash)
    }

    pub(crate) fn confirm(&mut self, height: u64, block_hash: &str) {
        self.status = EntryStatus::Confirmed;
        self.confirmed_height = Some(height);
        self.confirmed_block_hash = Some(block_hash.to_string());
    }

    pub(crate) fn unconfirm(&mut self) {
        self.status = EntryStatus::Pending;
        self.confirmed_height = None;
        self.confirmed_block_hash = None;
    }
}

// ─── DenominationGroup ───────────────────────────────────────────────────────

/// A capacity-bounded anonymity set of same-denomination commitments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationGroup {
    pub id: u32,
    pub capacity: u32,
    pub members: Vec<Commitment>,
    pub closed: bool,
}

impl DenominationGroup {
    pub fn new(id: u32, capacity: u32) -> Self {
        Self {
            id,
            capacity,
            members: Vec::new(),
            closed: false,
        }
    }

    /// Append a member, closing the group when it reaches capacity.
    /// Returns the member's index.
    pub(crate) fn push(&mut self, commitment: Commitment) -> u32 {
        let index = self.members.len() as u32;
        self.members.push(commitment);
        if self.members.len() as u32 >= self.capacity {
            self.closed = true;
        }
        index
    }

    /// Remove the newest member; reopens the group.
    pub(crate) fn pop(&mut self) -> Option<Commitment> {
        let out = self.members.pop();
        if (self.members.len() as u32) < self.capacity {
            self.closed = false;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// ─── PropertyRecord ──────────────────────────────────────────────────────────

/// A single issuance credited to the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    pub txid: String,
    pub issuer: Address,
    pub amount: u64,
    pub height: u64,
    pub block_hash: String,
}

/// Everything the ledger knows about one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: PropertyId,
    pub issuer: Address,
    pub name: String,
    pub issuances: Vec<IssuanceRecord>,
    /// Denomination values, indexed by denomination id.
    pub denominations: Vec<u64>,
    pub groups: BTreeMap<DenominationId, Vec<DenominationGroup>>,
}

impl PropertyRecord {
    pub fn total_issued(&self) -> u64 {
        self.issuances.iter().map(|i| i.amount).sum()
    }

    pub fn issued_to(&self, address: &str) -> u64 {
        self.issuances
            .iter()
            .filter(|i| i.issuer == address)
            .map(|i| i.amount)
            .sum()
    }

    pub fn denomination_value(&self, denomination: DenominationId) -> Option<u64> {
        self.denominations.get(denomination as usize).copied()
    }

    /// Number of confirmed mints of `denomination` (the sum of its group sizes).
    pub fn confirmed_mint_count(&self, denomination: DenominationId) -> usize {
        self.groups
            .get(&denomination)
            .map(|groups| groups.iter().map(DenominationGroup::len).sum())
            .unwrap_or(0)
    }
}

// ─── PropertyBalance ─────────────────────────────────────────────────────────

/// Derived balance of one address for one property, from confirmed state only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBalance {
    pub address: Address,
    pub property: PropertyId,
    /// Issued to this address.
    pub issued: u64,
    /// Moved into the shielded pool by confirmed mints of this address.
    pub minted: u64,
    /// Redeemed to this address by confirmed spends.
    pub redeemed: u64,
    /// Spendable transparent balance: `issued + redeemed - minted`.
    pub balance: u64,
}
