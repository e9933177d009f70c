//! Sigma layer payload codec.
//!
//! Wire layout (all integers big endian):
//!
//! ```text
//! "exodus" | version u16 | type u16 | fields...
//!
//!   50  issuance      property u32, amount u64, name (UTF-8, NUL-terminated)
//! 1025  denomination  property u32, value u64
//! 1026  mint          property u32, count u8, count × (denomination u8, commitment [34])
//! 1027  spend         property u32, denomination u8, group u32, serial [32],
//!                     proof_len u16, proof [proof_len]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DenominationId, PropertyId};

/// Marker prefixing every layer payload.
pub const MARKER: &[u8; 6] = b"exodus";

pub const TYPE_ISSUANCE: u16 = 50;
pub const TYPE_CREATE_DENOMINATION: u16 = 1025;
pub const TYPE_SIMPLE_MINT: u16 = 1026;
pub const TYPE_SIMPLE_SPEND: u16 = 1027;

pub const COMMITMENT_LEN: usize = 34;
pub const SERIAL_LEN: usize = 32;

// ─── Identities ──────────────────────────────────────────────────────────────

/// A mint's public coin commitment, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Commitment(pub String);

impl Commitment {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A spend's revealed serial number, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(pub String);

impl Serial {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── SigmaOp ─────────────────────────────────────────────────────────────────

/// A typed Sigma operation extracted from a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SigmaOp {
    Issuance {
        property: PropertyId,
        amount: u64,
        name: String,
    },
    CreateDenomination {
        property: PropertyId,
        value: u64,
    },
    Mint {
        property: PropertyId,
        denomination: DenominationId,
        commitment: Commitment,
    },
    Spend {
        property: PropertyId,
        denomination: DenominationId,
        group: u32,
        serial: Serial,
    },
}

impl SigmaOp {
    pub fn property(&self) -> PropertyId {
        match self {
            Self::Issuance { property, .. }
            | Self::CreateDenomination { property, .. }
            | Self::Mint { property, .. }
            | Self::Spend { property, .. } => *property,
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Reasons a marker-tagged payload cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload truncated reading {field} at offset {offset}")]
    Truncated { field: &'static str, offset: usize },

    #[error("{count} trailing bytes after payload")]
    TrailingBytes { count: usize },

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u16),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Outcome of decoding a transaction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// No layer marker: an ordinary chain transaction.
    NotLayer,
    /// A layer transaction of a type this indexer does not track.
    OtherLayer { tx_type: u16 },
    /// One or more Sigma operations.
    Sigma(Vec<SigmaOp>),
}

// ─── Decoding ────────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], PayloadError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(PayloadError::Truncated {
                field,
                offset: self.pos,
            }),
        }
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, PayloadError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, PayloadError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, PayloadError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, PayloadError> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8, field)?);
        Ok(u64::from_be_bytes(out))
    }

    fn cstr(&mut self, field: &'static str) -> Result<String, PayloadError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(PayloadError::Truncated {
                field,
                offset: self.pos,
            })?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|e| PayloadError::InvalidField {
            field,
            reason: e.to_string(),
        })?;
        self.pos += nul + 1;
        Ok(s.to_string())
    }

    fn finish(self) -> Result<(), PayloadError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            count => Err(PayloadError::TrailingBytes { count }),
        }
    }
}

fn nonzero(value: u64, field: &'static str) -> Result<u64, PayloadError> {
    if value == 0 {
        return Err(PayloadError::InvalidField {
            field,
            reason: "must be non-zero".into(),
        });
    }
    Ok(value)
}

/// Decode a transaction payload.
pub fn decode(payload: &[u8]) -> Result<Decoded, PayloadError> {
    if payload.len() < MARKER.len() || &payload[..MARKER.len()] != MARKER {
        return Ok(Decoded::NotLayer);
    }
    let mut r = Reader::new(&payload[MARKER.len()..]);
    let version = r.u16("version")?;
    let tx_type = r.u16("type")?;

    if !matches!(
        tx_type,
        TYPE_ISSUANCE | TYPE_CREATE_DENOMINATION | TYPE_SIMPLE_MINT | TYPE_SIMPLE_SPEND
    ) {
        return Ok(Decoded::OtherLayer { tx_type });
    }
    // Only the tracked types are versioned here; field layouts differ per version.
    if version != 0 {
        return Err(PayloadError::UnsupportedVersion(version));
    }

    let ops = match tx_type {
        TYPE_ISSUANCE => {
            let property = r.u32("property")?;
            let amount = nonzero(r.u64("amount")?, "amount")?;
            let name = r.cstr("name")?;
            vec![SigmaOp::Issuance {
                property,
                amount,
                name,
            }]
        }
        TYPE_CREATE_DENOMINATION => {
            let property = r.u32("property")?;
            let value = nonzero(r.u64("value")?, "value")?;
            vec![SigmaOp::CreateDenomination { property, value }]
        }
        TYPE_SIMPLE_MINT => {
            let property = r.u32("property")?;
            let count = r.u8("count")?;
            if count == 0 {
                return Err(PayloadError::InvalidField {
                    field: "count",
                    reason: "mint carries no coins".into(),
                });
            }
            let mut ops = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let denomination = r.u8("denomination")?;
                let commitment = Commitment::from_bytes(r.take(COMMITMENT_LEN, "commitment")?);
                ops.push(SigmaOp::Mint {
                    property,
                    denomination,
                    commitment,
                });
            }
            ops
        }
        TYPE_SIMPLE_SPEND => {
            let property = r.u32("property")?;
            let denomination = r.u8("denomination")?;
            let group = r.u32("group")?;
            let serial = Serial::from_bytes(r.take(SERIAL_LEN, "serial")?);
            let proof_len = r.u16("proof_len")?;
            r.take(proof_len as usize, "proof")?;
            vec![SigmaOp::Spend {
                property,
                denomination,
                group,
                serial,
            }]
        }
        other => return Ok(Decoded::OtherLayer { tx_type: other }),
    };
    r.finish()?;
    Ok(Decoded::Sigma(ops))
}

// ─── Encoding ────────────────────────────────────────────────────────────────

fn header(tx_type: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(MARKER);
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&tx_type.to_be_bytes());
    out
}

fn hex_field(
    hex_str: &str,
    len: usize,
    field: &'static str,
) -> Result<Vec<u8>, PayloadError> {
    let bytes = hex::decode(hex_str).map_err(|e| PayloadError::InvalidField {
        field,
        reason: e.to_string(),
    })?;
    if bytes.len() != len {
        return Err(PayloadError::InvalidField {
            field,
            reason: format!("expected {len} bytes, got {}", bytes.len()),
        });
    }
    Ok(bytes)
}

/// Encode an issuance payload.
pub fn encode_issuance(property: PropertyId, amount: u64, name: &str) -> Vec<u8> {
    let mut out = header(TYPE_ISSUANCE);
    out.extend_from_slice(&property.to_be_bytes());
    out.extend_from_slice(&amount.to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out
}

/// Encode a denomination-creation payload.
pub fn encode_create_denomination(property: PropertyId, value: u64) -> Vec<u8> {
    let mut out = header(TYPE_CREATE_DENOMINATION);
    out.extend_from_slice(&property.to_be_bytes());
    out.extend_from_slice(&value.to_be_bytes());
    out
}

/// Encode a mint payload carrying one coin per `(denomination, commitment)`.
pub fn encode_mint(
    property: PropertyId,
    coins: &[(DenominationId, Commitment)],
) -> Result<Vec<u8>, PayloadError> {
    if coins.is_empty() || coins.len() > u8::MAX as usize {
        return Err(PayloadError::InvalidField {
            field: "count",
            reason: format!("{} coins", coins.len()),
        });
    }
    let mut out = header(TYPE_SIMPLE_MINT);
    out.extend_from_slice(&property.to_be_bytes());
    out.push(coins.len() as u8);
    for (denomination, commitment) in coins {
        out.push(*denomination);
        out.extend_from_slice(&hex_field(&commitment.0, COMMITMENT_LEN, "commitment")?);
    }
    Ok(out)
}

/// Encode a spend payload. The proof is carried opaquely.
pub fn encode_spend(
    property: PropertyId,
    denomination: DenominationId,
    group: u32,
    serial: &Serial,
    proof: &[u8],
) -> Result<Vec<u8>, PayloadError> {
    let proof_len = u16::try_from(proof.len()).map_err(|_| PayloadError::InvalidField {
        field: "proof",
        reason: format!("{} bytes", proof.len()),
    })?;
    let mut out = header(TYPE_SIMPLE_SPEND);
    out.extend_from_slice(&property.to_be_bytes());
    out.push(denomination);
    out.extend_from_slice(&group.to_be_bytes());
    out.extend_from_slice(&hex_field(&serial.0, SERIAL_LEN, "serial")?);
    out.extend_from_slice(&proof_len.to_be_bytes());
    out.extend_from_slice(proof);
    Ok(out)
}
