//! Core types shared by every stage of the transaction lifecycle

use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, hash::Hash, signature::Signature};
use std::fmt;
use std::str::FromStr;

/// How deeply an inclusion has been replicated by the ledger.
///
/// Ordering follows durability: `Processed < Confirmed < Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Processed,
    Confirmed,
    Finalized,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }

    /// Commitment config understood by the RPC client
    pub fn commitment(&self) -> CommitmentConfig {
        match self {
            Self::Processed => CommitmentConfig::processed(),
            Self::Confirmed => CommitmentConfig::confirmed(),
            Self::Finalized => CommitmentConfig::finalized(),
        }
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown durability level: {}", other)),
        }
    }
}

/// Wire encoding of a transaction message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Legacy,
    #[default]
    Versioned,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "versioned" | "v0" => Ok(Self::Versioned),
            other => Err(format!("unknown encoding: {}", other)),
        }
    }
}

/// Ledger-issued freshness token (recent blockhash) with its validity window.
///
/// An envelope signed against an anchor is includable only while the ledger's
/// block height is `<= expiry_height`. Expiry is height-based, never wall-clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor {
    pub value: Hash,
    pub expiry_height: u64,
    pub fetched_at_height: u64,
}

impl Anchor {
    pub fn new(value: Hash, expiry_height: u64, fetched_at_height: u64) -> Self {
        Self {
            value,
            expiry_height,
            fetched_at_height,
        }
    }

    /// Heights left before the anchor stops being includable, `None` once expired
    pub fn remaining(&self, current_height: u64) -> Option<u64> {
        self.expiry_height.checked_sub(current_height)
    }
}

/// Stable identifier of a fully signed envelope.
///
/// Legacy envelopes are identified by their primary signature. Versioned envelopes
/// are identified by a content digest of the signed message; the primary signature
/// is still carried because ledger status lookups are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeId {
    Signature(Signature),
    Digest { digest: Hash, signature: Signature },
}

impl EnvelopeId {
    /// Signature the ledger indexes this envelope under
    pub fn signature(&self) -> &Signature {
        match self {
            Self::Signature(signature) => signature,
            Self::Digest { signature, .. } => signature,
        }
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signature(signature) => write!(f, "{}", signature),
            Self::Digest { digest, .. } => write!(f, "digest:{}", digest),
        }
    }
}

/// Execution failure reported by the ledger for an included (or simulated) envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionError {
    message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build from the JSON `err` field of an RPC response.
    ///
    /// Bare strings (`"AccountNotFound"`) are kept verbatim, structured errors
    /// (`{"InstructionError":[0,{"Custom":1}]}`) keep their compact JSON form.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::new(s.clone()),
            other => Self::new(other.to_string()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// Snapshot of an envelope's inclusion status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationStatus {
    pub envelope_id: EnvelopeId,
    pub level: Durability,
    pub slot: u64,
    pub err: Option<ExecutionError>,
}

impl ConfirmationStatus {
    pub fn is_err(&self) -> bool {
        self.err.is_some()
    }
}
