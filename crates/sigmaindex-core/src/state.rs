//! The mint/spend ledger state machine.
//!
//! [`LedgerState`] is a plain value: blocks are applied with
//! [`LedgerState::apply_block`] and undone with [`LedgerState::rollback_block`].
//! Every applied block leaves a [`BlockJournal`] whose entries are the exact
//! inverse recipe for that block, retained for as long as the block tracker
//! retains the block itself.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::classifier::{ClassifiedOp, Classification};
use crate::entries::{
    DenominationGroup, EntryStatus, GroupPlacement, IssuanceRecord, MintEntry, PropertyBalance,
    PropertyRecord, SpendEntry,
};
use crate::error::IndexerError;
use crate::journal::{AppliedOp, BlockJournal, SkippedOp};
use crate::payload::{Commitment, Serial, SigmaOp};
use crate::tracker::BlockTracker;
use crate::types::{Address, Block, BlockSummary, PropertyId};

/// Ledger-wide policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    /// Members per denomination group before a new group is opened.
    pub group_capacity: u32,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            group_capacity: 16384,
        }
    }
}

enum Outcome {
    Applied(AppliedOp, Prior),
    Skipped(String),
}

/// The entry an operation replaced. Held only while its block is applied,
/// so a rejected block can be undone without leaving traces.
enum Prior {
    Nothing,
    Mint(Commitment, Option<MintEntry>),
    Spend(PropertyId, Serial, Option<SpendEntry>),
}

fn skip(reason: impl Into<String>) -> Result<Outcome, IndexerError> {
    Ok(Outcome::Skipped(reason.into()))
}

fn corrupt(reason: impl Into<String>) -> IndexerError {
    IndexerError::UnrecoverableState(reason.into())
}

/// Complete ledger contents at one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    policy: LedgerPolicy,
    checkpoint: Option<Checkpoint>,
    properties: BTreeMap<PropertyId, PropertyRecord>,
    mints: BTreeMap<Commitment, MintEntry>,
    spends: BTreeMap<PropertyId, BTreeMap<Serial, SpendEntry>>,
    tracker: BlockTracker,
    journal: VecDeque<BlockJournal>,
}

impl LedgerState {
    /// An empty ledger retaining up to `retained_blocks` blocks for rollback.
    pub fn new(policy: LedgerPolicy, retained_blocks: usize) -> Self {
        Self {
            policy,
            checkpoint: None,
            properties: BTreeMap::new(),
            mints: BTreeMap::new(),
            spends: BTreeMap::new(),
            tracker: BlockTracker::new(retained_blocks),
            journal: VecDeque::new(),
        }
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// Retained applied-block history.
    pub fn tracker(&self) -> &BlockTracker {
        &self.tracker
    }

    /// Undo journals of the retained blocks, oldest first.
    pub fn journal(&self) -> &VecDeque<BlockJournal> {
        &self.journal
    }

    pub fn property(&self, id: PropertyId) -> Option<&PropertyRecord> {
        self.properties.get(&id)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyRecord> {
        self.properties.values()
    }

    pub fn mint(&self, commitment: &Commitment) -> Option<&MintEntry> {
        self.mints.get(commitment)
    }

    pub fn mints(&self) -> impl Iterator<Item = &MintEntry> {
        self.mints.values()
    }

    pub fn spend(&self, property: PropertyId, serial: &Serial) -> Option<&SpendEntry> {
        self.spends.get(&property)?.get(serial)
    }

    pub fn spends(&self) -> impl Iterator<Item = &SpendEntry> {
        self.spends.values().flat_map(|by_serial| by_serial.values())
    }

    pub fn groups(&self, property: PropertyId, denomination: u8) -> &[DenominationGroup] {
        self.properties
            .get(&property)
            .and_then(|p| p.groups.get(&denomination))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Balance of `address` derived from confirmed entries only.
    pub fn balance(&self, address: &str, property: PropertyId) -> PropertyBalance {
        let issued = self
            .properties
            .get(&property)
            .map(|p| p.issued_to(address))
            .unwrap_or(0);
        let minted: u64 = self
            .mints
            .values()
            .filter(|m| m.is_confirmed() && m.property == property && m.owner == address)
            .map(|m| m.value)
            .sum();
        let redeemed: u64 = self
            .spends
            .get(&property)
            .map(|by_serial| {
                by_serial
                    .values()
                    .filter(|s| s.is_confirmed() && s.recipient == address)
                    .map(|s| s.value)
                    .sum()
            })
            .unwrap_or(0);
        let balance = (issued as u128 + redeemed as u128).saturating_sub(minted as u128);
        PropertyBalance {
            address: address.to_string(),
            property,
            issued,
            minted,
            redeemed,
            balance: u64::try_from(balance).unwrap_or(u64::MAX),
        }
    }

    /// Value held in the shielded pool: confirmed mints minus confirmed spends.
    pub fn outstanding(&self, property: PropertyId) -> u64 {
        let minted: u64 = self
            .mints
            .values()
            .filter(|m| m.is_confirmed() && m.property == property)
            .map(|m| m.value)
            .sum();
        let spent: u64 = self
            .spends
            .get(&property)
            .map(|by_serial| {
                by_serial
                    .values()
                    .filter(|s| s.is_confirmed())
                    .map(|s| s.value)
                    .sum()
            })
            .unwrap_or(0);
        minted.saturating_sub(spent)
    }

    /// Every address with a confirmed stake in `property`.
    pub fn addresses(&self, property: PropertyId) -> BTreeSet<Address> {
        let mut out = BTreeSet::new();
        if let Some(p) = self.properties.get(&property) {
            out.extend(p.issuances.iter().map(|i| i.issuer.clone()));
        }
        out.extend(
            self.mints
                .values()
                .filter(|m| m.is_confirmed() && m.property == property)
                .map(|m| m.owner.clone()),
        );
        if let Some(by_serial) = self.spends.get(&property) {
            out.extend(
                by_serial
                    .values()
                    .filter(|s| s.is_confirmed())
                    .map(|s| s.recipient.clone()),
            );
        }
        out
    }

    // ─── Forward apply ───────────────────────────────────────────────────────

    /// Apply `block`, whose transactions were classified into `classified`.
    ///
    /// Returns `Ok(None)` when the block is the current checkpoint. A block
    /// rejected for a double spend leaves the state exactly as it was.
    pub fn apply_block(
        &mut self,
        block: &Block,
        classified: &Classification,
    ) -> Result<Option<BlockJournal>, IndexerError> {
        if self
            .checkpoint
            .as_ref()
            .is_some_and(|cp| cp.block_hash == block.hash)
        {
            tracing::debug!(height = block.height, hash = %block.hash, "Block already applied");
            return Ok(None);
        }

        let summary = block.summary();
        if let Some(head) = self.tracker.head() {
            if !summary.extends(head) {
                return Err(corrupt(format!(
                    "block {} at height {} does not extend ledger tip {} at height {}",
                    summary.hash, summary.height, head.hash, head.height
                )));
            }
        }

        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        for classified_op in &classified.ops {
            match self.apply_op(classified_op, &summary) {
                Ok(Outcome::Applied(op, prior)) => applied.push((op, prior)),
                Ok(Outcome::Skipped(reason)) => {
                    tracing::warn!(
                        txid = %classified_op.txid,
                        height = summary.height,
                        %reason,
                        "Skipping invalid Sigma operation"
                    );
                    skipped.push(SkippedOp {
                        txid: classified_op.txid.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    for (op, prior) in applied.into_iter().rev() {
                        self.revert_op(&op, &summary)?;
                        self.restore(prior);
                    }
                    return Err(e);
                }
            }
        }

        let journal = BlockJournal {
            block: summary.clone(),
            ops: applied.into_iter().map(|(op, _)| op).collect(),
            skipped,
        };
        if let Some(evicted) = self.tracker.push(summary)? {
            match self.journal.pop_front() {
                Some(j) if j.block.hash == evicted.hash => {}
                _ => return Err(corrupt("undo journal out of step with block history")),
            }
        }
        self.journal.push_back(journal.clone());
        self.checkpoint = Some(Checkpoint::new(block.height, &block.hash));

        tracing::debug!(
            height = block.height,
            hash = %block.hash,
            mints = journal.mint_count(),
            spends = journal.spend_count(),
            "Block applied"
        );
        Ok(Some(journal))
    }

    fn apply_op(
        &mut self,
        c: &ClassifiedOp,
        block: &BlockSummary,
    ) -> Result<Outcome, IndexerError> {
        match &c.op {
            SigmaOp::Issuance {
                property,
                amount,
                name,
            } => {
                let record = IssuanceRecord {
                    txid: c.txid.clone(),
                    issuer: c.sender.clone(),
                    amount: *amount,
                    height: block.height,
                    block_hash: block.hash.clone(),
                };
                let created_property = match self.properties.get_mut(property) {
                    Some(p) => {
                        if p.issuer != c.sender {
                            return skip(format!("property {property} is owned by {}", p.issuer));
                        }
                        if p.total_issued().checked_add(*amount).is_none() {
                            return skip(format!("issuance overflows supply of property {property}"));
                        }
                        p.issuances.push(record);
                        false
                    }
                    None => {
                        self.properties.insert(
                            *property,
                            PropertyRecord {
                                id: *property,
                                issuer: c.sender.clone(),
                                name: name.clone(),
                                issuances: vec![record],
                                denominations: Vec::new(),
                                groups: BTreeMap::new(),
                            },
                        );
                        true
                    }
                };
                Ok(Outcome::Applied(
                    AppliedOp::Issuance {
                        txid: c.txid.clone(),
                        property: *property,
                        issuer: c.sender.clone(),
                        amount: *amount,
                        created_property,
                    },
                    Prior::Nothing,
                ))
            }

            SigmaOp::CreateDenomination { property, value } => {
                let Some(p) = self.properties.get_mut(property) else {
                    return skip(format!("unknown property {property}"));
                };
                if p.issuer != c.sender {
                    return skip(format!("{} is not the issuer of property {property}", c.sender));
                }
                if p.denominations.len() > u8::MAX as usize {
                    return skip(format!("property {property} has no free denomination ids"));
                }
                if p.denominations.contains(value) {
                    return skip(format!("denomination {value} already exists for property {property}"));
                }
                p.denominations.push(*value);
                Ok(Outcome::Applied(
                    AppliedOp::DenominationCreated {
                        txid: c.txid.clone(),
                        property: *property,
                        denomination: (p.denominations.len() - 1) as u8,
                        value: *value,
                    },
                    Prior::Nothing,
                ))
            }

            SigmaOp::Mint {
                property,
                denomination,
                commitment,
            } => {
                if self.mints.get(commitment).is_some_and(MintEntry::is_confirmed) {
                    return skip(format!("commitment {commitment} is already confirmed"));
                }
                let available = self.balance(&c.sender, *property).balance;
                let capacity = self.policy.group_capacity;

                let Some(p) = self.properties.get_mut(property) else {
                    return skip(format!("unknown property {property}"));
                };
                let Some(value) = p.denomination_value(*denomination) else {
                    return skip(format!("unknown denomination {denomination} of property {property}"));
                };
                if available < value {
                    return skip(format!(
                        "{} holds {available} of property {property}, mint needs {value}",
                        c.sender
                    ));
                }

                let groups = p.groups.entry(*denomination).or_default();
                let opened_group = groups.last().map_or(true, |g| g.closed);
                if opened_group {
                    let id = groups.len() as u32;
                    groups.push(DenominationGroup::new(id, capacity));
                }
                let Some(group) = groups.last_mut() else {
                    return Err(corrupt("denomination group missing after open"));
                };
                let placement = GroupPlacement {
                    group_id: group.id,
                    group_index: group.push(commitment.clone()),
                };

                let prior = Prior::Mint(commitment.clone(), self.mints.get(commitment).cloned());
                let entry = self
                    .mints
                    .entry(commitment.clone())
                    .or_insert_with(|| MintEntry {
                        property: *property,
                        denomination: *denomination,
                        commitment: commitment.clone(),
                        owner: c.sender.clone(),
                        value,
                        origin_txid: c.txid.clone(),
                        status: EntryStatus::Pending,
                        group: None,
                        confirmed_height: None,
                        confirmed_block_hash: None,
                    });
                entry.property = *property;
                entry.denomination = *denomination;
                entry.owner = c.sender.clone();
                entry.value = value;
                entry.origin_txid = c.txid.clone();
                entry.confirm(placement, block.height, &block.hash);

                Ok(Outcome::Applied(
                    AppliedOp::MintConfirmed {
                        txid: c.txid.clone(),
                        property: *property,
                        denomination: *denomination,
                        commitment: commitment.clone(),
                        placement,
                        opened_group,
                    },
                    prior,
                ))
            }

            SigmaOp::Spend {
                property,
                denomination,
                group,
                serial,
            } => {
                if self
                    .spend(*property, serial)
                    .is_some_and(SpendEntry::is_confirmed)
                {
                    return Err(IndexerError::DoubleSpend {
                        property: *property,
                        serial: serial.to_string(),
                        block_hash: block.hash.clone(),
                    });
                }
                let Some(p) = self.properties.get(property) else {
                    return skip(format!("unknown property {property}"));
                };
                let Some(value) = p.denomination_value(*denomination) else {
                    return skip(format!("unknown denomination {denomination} of property {property}"));
                };
                let group_has_members = p
                    .groups
                    .get(denomination)
                    .and_then(|groups| groups.get(*group as usize))
                    .is_some_and(|g| !g.is_empty());
                if !group_has_members {
                    return skip(format!(
                        "group {group} of denomination {denomination} has no confirmed mints"
                    ));
                }
                let confirmed_mints = p.confirmed_mint_count(*denomination);
                let confirmed_spends = self
                    .spends
                    .get(property)
                    .map(|by_serial| {
                        by_serial
                            .values()
                            .filter(|s| s.is_confirmed() && s.denomination == *denomination)
                            .count()
                    })
                    .unwrap_or(0);
                if confirmed_spends >= confirmed_mints {
                    return skip(format!(
                        "all {confirmed_mints} confirmed mints of denomination {denomination} are spent"
                    ));
                }

                let by_serial = self.spends.entry(*property).or_default();
                let prior = Prior::Spend(*property, serial.clone(), by_serial.get(serial).cloned());
                let entry = by_serial.entry(serial.clone()).or_insert_with(|| SpendEntry {
                    property: *property,
                    denomination: *denomination,
                    group_id: *group,
                    serial: serial.clone(),
                    recipient: c.beneficiary.clone(),
                    value,
                    origin_txid: c.txid.clone(),
                    status: EntryStatus::Pending,
                    confirmed_height: None,
                    confirmed_block_hash: None,
                });
                entry.denomination = *denomination;
                entry.group_id = *group;
                entry.recipient = c.beneficiary.clone();
                entry.value = value;
                entry.origin_txid = c.txid.clone();
                entry.confirm(block.height, &block.hash);

                Ok(Outcome::Applied(
                    AppliedOp::SpendConfirmed {
                        txid: c.txid.clone(),
                        property: *property,
                        denomination: *denomination,
                        group: *group,
                        serial: serial.clone(),
                    },
                    prior,
                ))
            }
        }
    }

    // ─── Rollback ────────────────────────────────────────────────────────────

    /// Undo the ledger tip, which must be `expected`.
    ///
    /// Confirmed entries of the block return to `Pending`; the checkpoint
    /// moves to the block's parent.
    pub fn rollback_block(&mut self, expected: &BlockSummary) -> Result<BlockJournal, IndexerError> {
        match self.tracker.head() {
            Some(head) if head.hash == expected.hash => {}
            Some(head) => {
                return Err(corrupt(format!(
                    "rollback of {} requested but ledger tip is {}",
                    expected.hash, head.hash
                )))
            }
            None => return Err(corrupt("rollback requested with no retained blocks")),
        }
        let journal = match self.journal.pop_back() {
            Some(j) if j.block.hash == expected.hash => j,
            _ => return Err(corrupt(format!("no undo journal for block {}", expected.hash))),
        };
        self.tracker.pop();

        for op in journal.ops.iter().rev() {
            self.revert_op(op, &journal.block)?;
        }
        self.checkpoint = Some(Checkpoint::new(
            expected.height.saturating_sub(1),
            &expected.parent_hash,
        ));

        tracing::debug!(
            height = expected.height,
            hash = %expected.hash,
            mints = journal.mint_count(),
            spends = journal.spend_count(),
            "Block rolled back"
        );
        Ok(journal)
    }

    /// Invert one applied operation. Confirmed entries return to `Pending`.
    fn revert_op(&mut self, op: &AppliedOp, block: &BlockSummary) -> Result<(), IndexerError> {
        match op {
            AppliedOp::Issuance {
                txid,
                property,
                amount,
                created_property,
                ..
            } => {
                let p = self
                    .properties
                    .get_mut(property)
                    .ok_or_else(|| corrupt(format!("issuance {txid} names missing property {property}")))?;
                match p.issuances.last() {
                    Some(last) if last.txid == *txid && last.amount == *amount => {}
                    _ => return Err(corrupt(format!("issuance {txid} is not the newest of property {property}"))),
                }
                p.issuances.pop();
                if *created_property {
                    if !p.issuances.is_empty() || !p.denominations.is_empty() || !p.groups.is_empty() {
                        return Err(corrupt(format!(
                            "property {property} still has records while reverting its creation"
                        )));
                    }
                    self.properties.remove(property);
                }
            }

            AppliedOp::DenominationCreated {
                txid,
                property,
                denomination,
                value,
            } => {
                let p = self
                    .properties
                    .get_mut(property)
                    .ok_or_else(|| corrupt(format!("denomination {txid} names missing property {property}")))?;
                if p.denominations.len() != *denomination as usize + 1
                    || p.denominations.last() != Some(value)
                {
                    return Err(corrupt(format!(
                        "denomination {denomination} is not the newest of property {property}"
                    )));
                }
                if p.groups.contains_key(denomination) {
                    return Err(corrupt(format!(
                        "denomination {denomination} of property {property} still has groups"
                    )));
                }
                p.denominations.pop();
            }

            AppliedOp::MintConfirmed {
                property,
                denomination,
                commitment,
                placement,
                opened_group,
                ..
            } => {
                let entry = self
                    .mints
                    .get_mut(commitment)
                    .ok_or_else(|| corrupt(format!("mint {commitment} vanished")))?;
                if !entry.confirmed_in(&block.hash) || entry.group != Some(*placement) {
                    return Err(corrupt(format!(
                        "mint {commitment} is not confirmed by block {} at {placement:?}",
                        block.hash
                    )));
                }
                let p = self
                    .properties
                    .get_mut(property)
                    .ok_or_else(|| corrupt(format!("mint {commitment} names missing property {property}")))?;
                let groups = p
                    .groups
                    .get_mut(denomination)
                    .ok_or_else(|| corrupt(format!("mint {commitment} has no denomination groups")))?;
                if groups.len() != placement.group_id as usize + 1 {
                    return Err(corrupt(format!(
                        "mint {commitment} is placed in group {} but the newest group is {}",
                        placement.group_id,
                        groups.len().saturating_sub(1)
                    )));
                }
                let Some(group) = groups.last_mut() else {
                    return Err(corrupt("denomination group list is empty"));
                };
                if group.members.len() != placement.group_index as usize + 1
                    || group.members.last() != Some(commitment)
                {
                    return Err(corrupt(format!(
                        "mint {commitment} is not the newest member of group {}",
                        placement.group_id
                    )));
                }
                group.pop();
                if *opened_group {
                    if !group.is_empty() {
                        return Err(corrupt(format!(
                            "group {} opened by mint {commitment} still has members",
                            placement.group_id
                        )));
                    }
                    groups.pop();
                    if groups.is_empty() {
                        p.groups.remove(denomination);
                    }
                }
                entry.unconfirm();
            }

            AppliedOp::SpendConfirmed {
                property,
                serial,
                ..
            } => {
                let by_serial = self
                    .spends
                    .get_mut(property)
                    .ok_or_else(|| corrupt(format!("spend {serial} names missing property {property}")))?;
                let entry = by_serial
                    .get_mut(serial)
                    .ok_or_else(|| corrupt(format!("spend {serial} vanished")))?;
                if !entry.confirmed_in(&block.hash) {
                    return Err(corrupt(format!(
                        "spend {serial} is not confirmed by block {}",
                        block.hash
                    )));
                }
                entry.unconfirm();
            }
        }
        Ok(())
    }

    /// Put back the entry an operation of a rejected block replaced.
    fn restore(&mut self, prior: Prior) {
        match prior {
            Prior::Nothing => {}
            Prior::Mint(commitment, Some(entry)) => {
                self.mints.insert(commitment, entry);
            }
            Prior::Mint(commitment, None) => {
                self.mints.remove(&commitment);
            }
            Prior::Spend(property, serial, entry) => {
                let by_serial = self.spends.entry(property).or_default();
                match entry {
                    Some(entry) => {
                        by_serial.insert(serial, entry);
                    }
                    None => {
                        by_serial.remove(&serial);
                    }
                }
                if by_serial.is_empty() {
                    self.spends.remove(&property);
                }
            }
        }
    }

    // ─── Unconfirmed observation ─────────────────────────────────────────────

    /// Record mints and spends of an unconfirmed transaction as `Pending`.
    ///
    /// Entries that already exist (in any status) are left untouched.
    /// Returns the number of entries created.
    pub fn observe_unconfirmed(&mut self, classified: &Classification) -> usize {
        let mut created = 0;
        for c in &classified.ops {
            match &c.op {
                SigmaOp::Mint {
                    property,
                    denomination,
                    commitment,
                } => {
                    if self.mints.contains_key(commitment) {
                        continue;
                    }
                    let value = self
                        .property(*property)
                        .and_then(|p| p.denomination_value(*denomination))
                        .unwrap_or(0);
                    self.mints.insert(
                        commitment.clone(),
                        MintEntry {
                            property: *property,
                            denomination: *denomination,
                            commitment: commitment.clone(),
                            owner: c.sender.clone(),
                            value,
                            origin_txid: c.txid.clone(),
                            status: EntryStatus::Pending,
                            group: None,
                            confirmed_height: None,
                            confirmed_block_hash: None,
                        },
                    );
                    created += 1;
                }
                SigmaOp::Spend {
                    property,
                    denomination,
                    group,
                    serial,
                } => {
                    if self.spend(*property, serial).is_some() {
                        continue;
                    }
                    let value = self
                        .property(*property)
                        .and_then(|p| p.denomination_value(*denomination))
                        .unwrap_or(0);
                    self.spends.entry(*property).or_default().insert(
                        serial.clone(),
                        SpendEntry {
                            property: *property,
                            denomination: *denomination,
                            group_id: *group,
                            serial: serial.clone(),
                            recipient: c.beneficiary.clone(),
                            value,
                            origin_txid: c.txid.clone(),
                            status: EntryStatus::Pending,
                            confirmed_height: None,
                            confirmed_block_hash: None,
                        },
                    );
                    created += 1;
                }
                SigmaOp::Issuance { .. } | SigmaOp::CreateDenomination { .. } => {}
            }
        }
        created
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TransactionClassifier;
    use crate::payload::{
        encode_create_denomination, encode_issuance, encode_mint, encode_spend, COMMITMENT_LEN,
        SERIAL_LEN,
    };
    use crate::types::RawTransaction;

    const PROP: PropertyId = 3;

    fn commitment(n: u8) -> Commitment {
        Commitment::from_bytes(&[n; COMMITMENT_LEN])
    }

    fn serial(n: u8) -> Serial {
        Serial::from_bytes(&[n; SERIAL_LEN])
    }

    fn issue(txid: &str, amount: u64) -> RawTransaction {
        RawTransaction::new(txid, "alice", encode_issuance(PROP, amount, "Sigma"))
    }

    fn denom(txid: &str, value: u64) -> RawTransaction {
        RawTransaction::new(txid, "alice", encode_create_denomination(PROP, value))
    }

    fn mint(txid: &str, coins: &[(u8, u8)]) -> RawTransaction {
        let coins: Vec<_> = coins.iter().map(|(d, n)| (*d, commitment(*n))).collect();
        RawTransaction::new(txid, "alice", encode_mint(PROP, &coins).unwrap())
    }

    fn spend(txid: &str, denomination: u8, group: u32, n: u8) -> RawTransaction {
        RawTransaction::new(
            txid,
            "anon",
            encode_spend(PROP, denomination, group, &serial(n), &[0xab; 64]).unwrap(),
        )
        .to("alice")
    }

    fn block(height: u64, parent: &str, txs: Vec<RawTransaction>) -> Block {
        Block {
            height,
            hash: format!("{parent}/{height}"),
            parent_hash: parent.to_string(),
            timestamp: height as i64 * 600,
            transactions: txs,
        }
    }

    fn apply(state: &mut LedgerState, b: &Block) -> Result<Option<BlockJournal>, IndexerError> {
        let classified = TransactionClassifier::new().classify(&b.transactions);
        state.apply_block(b, &classified)
    }

    fn new_state(capacity: u32) -> LedgerState {
        LedgerState::new(LedgerPolicy { group_capacity: capacity }, 16)
    }

    /// Property 3 issued to alice with denominations 1 and 2.
    fn seeded(capacity: u32) -> (LedgerState, Block) {
        let mut state = new_state(capacity);
        let b1 = block(1, "g", vec![issue("i", 1_000), denom("d0", 1), denom("d1", 2)]);
        apply(&mut state, &b1).unwrap();
        (state, b1)
    }

    fn assert_conserved(state: &LedgerState) {
        let total: u64 = state.addresses(PROP).iter().map(|a| state.balance(a, PROP).balance).sum();
        let issued = state.property(PROP).map(|p| p.total_issued()).unwrap_or(0);
        assert_eq!(total + state.outstanding(PROP), issued);
    }

    #[test]
    fn issuance_and_denominations() {
        let (state, b1) = seeded(4);
        let p = state.property(PROP).unwrap();
        assert_eq!(p.total_issued(), 1_000);
        assert_eq!(p.denominations, vec![1, 2]);
        assert_eq!(state.balance("alice", PROP).balance, 1_000);
        assert_eq!(state.checkpoint().unwrap().block_hash, b1.hash);
    }

    #[test]
    fn mint_confirms_and_fills_groups() {
        let (mut state, b1) = seeded(2);
        let b2 = block(2, &b1.hash, vec![mint("m", &[(0, 1), (0, 2), (0, 3)])]);
        let journal = apply(&mut state, &b2).unwrap().unwrap();
        assert_eq!(journal.mint_count(), 3);

        let groups = state.groups(PROP, 0);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].closed);
        assert_eq!(groups[1].members, vec![commitment(3)]);

        let m3 = state.mint(&commitment(3)).unwrap();
        assert!(m3.is_confirmed());
        assert_eq!(m3.group, Some(GroupPlacement { group_id: 1, group_index: 0 }));
        assert_eq!(m3.confirmed_height, Some(2));
        assert_eq!(state.balance("alice", PROP).balance, 997);
        assert_conserved(&state);
    }

    #[test]
    fn rollback_returns_entries_to_pending_and_reopens_groups() {
        let (mut state, b1) = seeded(2);
        let b2 = block(2, &b1.hash, vec![mint("m", &[(0, 1), (0, 2)])]);
        apply(&mut state, &b2).unwrap();
        assert!(state.groups(PROP, 0)[0].closed);

        let b3 = block(3, &b2.hash, vec![mint("m2", &[(0, 3)]), spend("s", 0, 0, 9)]);
        apply(&mut state, &b3).unwrap();
        assert_eq!(state.groups(PROP, 0).len(), 2);
        assert_conserved(&state);

        let undone = state.rollback_block(&b3.summary()).unwrap();
        assert_eq!(undone.mint_count(), 1);
        assert_eq!(undone.spend_count(), 1);
        assert_eq!(state.groups(PROP, 0).len(), 1);
        assert!(state.mint(&commitment(3)).unwrap().is_pending());
        let s = state.spend(PROP, &serial(9)).unwrap();
        assert_eq!(s.status, EntryStatus::Pending);
        assert_eq!(s.origin_txid, "s");
        assert_eq!(state.mints().count(), 3);
        assert_eq!(state.checkpoint().unwrap().block_hash, b2.hash);
        assert_conserved(&state);

        state.rollback_block(&b2.summary()).unwrap();
        assert!(state.groups(PROP, 0).is_empty());
        assert_eq!(state.balance("alice", PROP).balance, 1_000);
    }

    #[test]
    fn rollback_then_reapply_is_exact() {
        let (mut state, b1) = seeded(2);
        let b2 = block(2, &b1.hash, vec![mint("m", &[(0, 1), (1, 2), (0, 3)])]);
        apply(&mut state, &b2).unwrap();
        let b3 = block(3, &b2.hash, vec![spend("s", 0, 0, 7), mint("m2", &[(0, 4)])]);
        let first = apply(&mut state, &b3).unwrap().unwrap();
        let before = state.clone();

        state.rollback_block(&b3.summary()).unwrap();
        assert_ne!(state, before);
        let again = apply(&mut state, &b3).unwrap().unwrap();
        assert_eq!(again, first);
        assert_eq!(state, before);

        state.rollback_block(&b3.summary()).unwrap();
        state.rollback_block(&b2.summary()).unwrap();
        apply(&mut state, &b2).unwrap();
        apply(&mut state, &b3).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn rollback_of_creating_block_removes_property() {
        let (mut state, b1) = seeded(2);
        state.rollback_block(&b1.summary()).unwrap();
        assert!(state.property(PROP).is_none());
        assert!(state.tracker().is_empty());
        assert_eq!(state.checkpoint().unwrap().block_hash, "g");
    }

    #[test]
    fn reapplying_the_checkpoint_block_is_a_no_op() {
        let (mut state, b1) = seeded(2);
        let b2 = block(2, &b1.hash, vec![mint("m", &[(0, 1)])]);
        apply(&mut state, &b2).unwrap();
        let before = state.clone();
        assert!(apply(&mut state, &b2).unwrap().is_none());
        assert_eq!(state, before);
    }

    #[test]
    fn double_spend_rejects_the_whole_block() {
        let (mut state, b1) = seeded(4);
        let b2 = block(2, &b1.hash, vec![mint("m", &[(0, 1), (0, 2)]), spend("s1", 0, 0, 5)]);
        apply(&mut state, &b2).unwrap();
        let before = state.clone();

        let b3 = block(3, &b2.hash, vec![mint("m2", &[(0, 3)]), spend("s2", 0, 0, 5)]);
        let err = apply(&mut state, &b3).unwrap_err();
        assert!(err.is_block_rejection());
        assert_eq!(state, before);
        assert!(state.mint(&commitment(3)).is_none());
    }

    #[test]
    fn rejected_block_restores_pending_entries_exactly() {
        let (mut state, b1) = seeded(4);
        let b2 = block(2, &b1.hash, vec![mint("m", &[(0, 1), (0, 2)]), spend("s1", 0, 0, 5)]);
        apply(&mut state, &b2).unwrap();

        // Pending entries seen first from other senders and txids.
        let classifier = TransactionClassifier::new();
        let pending_mint =
            RawTransaction::new("pm", "bob", encode_mint(PROP, &[(0, commitment(3))]).unwrap());
        let pending_spend = RawTransaction::new(
            "ps",
            "anon",
            encode_spend(PROP, 0, 0, &serial(6), &[0xab; 64]).unwrap(),
        )
        .to("carol");
        state.observe_unconfirmed(&classifier.classify_one(&pending_mint));
        state.observe_unconfirmed(&classifier.classify_one(&pending_spend));
        let before = state.clone();

        let b3 = block(
            3,
            &b2.hash,
            vec![mint("m2", &[(0, 3)]), spend("s6", 0, 0, 6), spend("s5", 0, 0, 5)],
        );
        assert!(apply(&mut state, &b3).unwrap_err().is_block_rejection());
        assert_eq!(state, before);
        let m = state.mint(&commitment(3)).unwrap();
        assert_eq!((m.owner.as_str(), m.origin_txid.as_str()), ("bob", "pm"));
        assert_eq!(state.spend(PROP, &serial(6)).unwrap().recipient, "carol");
    }

    #[test]
    fn invalid_operations_are_skipped() {
        let (mut state, b1) = seeded(4);
        let txs = vec![
            // unknown denomination
            mint("bad-denom", &[(5, 1)]),
            // spend from an empty group
            spend("early", 0, 0, 1),
            // issuance by someone else
            RawTransaction::new("steal", "mallory", encode_issuance(PROP, 5, "x")),
            mint("ok", &[(1, 2)]),
            // second spend of a single mint
            spend("s1", 1, 0, 2),
            spend("s2", 1, 0, 3),
        ];
        let b2 = block(2, &b1.hash, txs);
        let journal = apply(&mut state, &b2).unwrap().unwrap();
        assert_eq!(journal.mint_count(), 1);
        assert_eq!(journal.spend_count(), 1);
        let skipped: Vec<_> = journal.skipped.iter().map(|s| s.txid.as_str()).collect();
        assert_eq!(skipped, vec!["bad-denom", "early", "steal", "s2"]);
        assert_conserved(&state);
    }

    #[test]
    fn mint_needs_balance() {
        let mut state = new_state(4);
        let b1 = block(1, "g", vec![issue("i", 2), denom("d0", 2)]);
        apply(&mut state, &b1).unwrap();
        let b2 = block(2, &b1.hash, vec![mint("m", &[(0, 1), (0, 2)])]);
        let journal = apply(&mut state, &b2).unwrap().unwrap();
        assert_eq!(journal.mint_count(), 1);
        assert_eq!(journal.skipped.len(), 1);
        assert_eq!(state.balance("alice", PROP).balance, 0);
    }

    #[test]
    fn rollback_of_wrong_block_is_unrecoverable() {
        let (mut state, b1) = seeded(2);
        let b2 = block(2, &b1.hash, vec![]);
        apply(&mut state, &b2).unwrap();
        let err = state.rollback_block(&b1.summary()).unwrap_err();
        assert!(err.requires_resync());
    }

    #[test]
    fn non_extending_block_is_refused() {
        let (mut state, _) = seeded(2);
        let stray = block(5, "elsewhere", vec![]);
        assert!(apply(&mut state, &stray).unwrap_err().requires_resync());
    }

    #[test]
    fn history_is_bounded_and_journal_follows() {
        let mut state = LedgerState::new(LedgerPolicy::default(), 3);
        let mut parent = "g".to_string();
        for h in 1..=6 {
            let b = block(h, &parent, vec![]);
            apply(&mut state, &b).unwrap();
            parent = b.hash;
        }
        assert_eq!(state.tracker().len(), 3);
        assert_eq!(state.journal().len(), 3);
        assert_eq!(state.journal().front().unwrap().block.height, 4);
    }

    #[test]
    fn unconfirmed_observation_creates_pending_entries() {
        let (mut state, b1) = seeded(4);
        let classifier = TransactionClassifier::new();
        let tx = mint("m", &[(0, 1)]);
        assert_eq!(state.observe_unconfirmed(&classifier.classify_one(&tx)), 1);
        assert_eq!(state.observe_unconfirmed(&classifier.classify_one(&tx)), 0);
        let entry = state.mint(&commitment(1)).unwrap();
        assert!(entry.is_pending());
        assert_eq!(entry.value, 1);
        assert_eq!(state.balance("alice", PROP).balance, 1_000);

        let b2 = block(2, &b1.hash, vec![tx]);
        let journal = apply(&mut state, &b2).unwrap().unwrap();
        assert!(matches!(journal.ops[0], AppliedOp::MintConfirmed { .. }));
        assert!(state.mint(&commitment(1)).unwrap().is_confirmed());
    }

    #[test]
    fn ledger_state_survives_json() {
        let (mut state, b1) = seeded(2);
        apply(&mut state, &block(2, &b1.hash, vec![mint("m", &[(0, 1)])])).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: LedgerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
