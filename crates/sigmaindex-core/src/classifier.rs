//! Transaction classifier — turns a block's opaque transactions into an
//! ordered list of Sigma operations.

use serde::{Deserialize, Serialize};

use crate::payload::{self, Decoded, SigmaOp};
use crate::types::{Address, RawTransaction};

/// A Sigma operation together with the transaction that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedOp {
    pub txid: String,
    pub sender: Address,
    /// Address credited by a spend.
    pub beneficiary: Address,
    pub op: SigmaOp,
}

/// A Sigma-tagged transaction that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierWarning {
    pub txid: String,
    pub reason: String,
}

/// Result of classifying one block (or one unconfirmed transaction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Operations in block transaction order.
    pub ops: Vec<ClassifiedOp>,
    /// Malformed payloads that were treated as non-Sigma.
    pub warnings: Vec<ClassifierWarning>,
    /// Transactions that carried no Sigma operation.
    pub skipped: usize,
}

/// Stateless classifier for Sigma layer transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionClassifier;

impl TransactionClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a block's transactions, preserving their order.
    pub fn classify(&self, transactions: &[RawTransaction]) -> Classification {
        let mut out = Classification::default();
        for tx in transactions {
            self.classify_into(tx, &mut out);
        }
        out
    }

    /// Classify a single transaction.
    pub fn classify_one(&self, tx: &RawTransaction) -> Classification {
        let mut out = Classification::default();
        self.classify_into(tx, &mut out);
        out
    }

    fn classify_into(&self, tx: &RawTransaction, out: &mut Classification) {
        match payload::decode(&tx.payload) {
            Ok(Decoded::Sigma(ops)) => {
                out.ops.extend(ops.into_iter().map(|op| ClassifiedOp {
                    txid: tx.txid.clone(),
                    sender: tx.sender.clone(),
                    beneficiary: tx.beneficiary().to_string(),
                    op,
                }));
            }
            Ok(Decoded::NotLayer) => out.skipped += 1,
            Ok(Decoded::OtherLayer { tx_type }) => {
                tracing::trace!(txid = %tx.txid, tx_type, "Ignoring non-Sigma layer transaction");
                out.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(txid = %tx.txid, error = %e, "Malformed Sigma payload, treating as non-Sigma");
                out.warnings.push(ClassifierWarning {
                    txid: tx.txid.clone(),
                    reason: e.to_string(),
                });
                out.skipped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{encode_create_denomination, encode_issuance, encode_mint, Commitment};

    #[test]
    fn keeps_block_order_and_skips_noise() {
        let c = Commitment::from_bytes(&[7; payload::COMMITMENT_LEN]);
        let txs = vec![
            RawTransaction::new("t0", "alice", b"coinbase".to_vec()),
            RawTransaction::new("t1", "alice", encode_issuance(3, 100, "Sigma")),
            RawTransaction::new("t2", "alice", encode_create_denomination(3, 1)),
            RawTransaction::new("t3", "alice", encode_mint(3, &[(0, c.clone()), (0, c)]).unwrap()),
        ];
        let out = TransactionClassifier::new().classify(&txs);
        assert_eq!(out.skipped, 1);
        assert!(out.warnings.is_empty());
        let ids: Vec<_> = out.ops.iter().map(|o| o.txid.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t3"]);
    }

    #[test]
    fn malformed_payload_is_a_warning_not_an_error() {
        let mut bad = encode_create_denomination(3, 1);
        bad.truncate(bad.len() - 3);
        let txs = vec![
            RawTransaction::new("bad", "alice", bad),
            RawTransaction::new("good", "alice", encode_create_denomination(3, 2)),
        ];
        let out = TransactionClassifier::new().classify(&txs);
        assert_eq!(out.ops.len(), 1);
        assert_eq!(out.ops[0].txid, "good");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].txid, "bad");
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn beneficiary_follows_reference_address() {
        let tx = RawTransaction::new("t", "alice", encode_create_denomination(3, 2)).to("bob");
        let out = TransactionClassifier::new().classify_one(&tx);
        assert_eq!(out.ops[0].sender, "alice");
        assert_eq!(out.ops[0].beneficiary, "bob");
    }
}
