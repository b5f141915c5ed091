//! Error taxonomy for the transaction lifecycle
//!
//! Errors are split by the layer that produces them:
//! - [`TransportError`]: one transport tier failed to deliver or answer
//! - [`EnvelopeError`]: building or signing an envelope failed locally
//! - [`LifecycleError`]: what the caller sees from prepare/simulate/submit/confirm
//!
//! Callers must be able to tell "try again with a fresh anchor" ([`LifecycleError::Expired`])
//! from "this transaction is dead" ([`LifecycleError::Errored`]), so every outcome is a
//! typed variant rather than a generic failure.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::types::ExecutionError;

/// Failure reported by a single transport tier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Timeout, connection reset, throttling, overloaded node
    #[error("Transient transport failure (endpoint: {endpoint}): {message}")]
    Transient { endpoint: String, message: String },

    /// Malformed payload, bad signature, insufficient fee; never retried
    #[error("Payload rejected (endpoint: {endpoint}): {reason}")]
    Rejected { endpoint: String, reason: String },

    /// The tier reports the payload's blockhash past its last valid height
    #[error("Payload expired (endpoint: {endpoint}): {message}")]
    Expired { endpoint: String, message: String },
}

impl TransportError {
    pub fn transient(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn rejected(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn expired(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expired {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Whether sending the same payload again can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Self::Transient { endpoint, .. } => endpoint,
            Self::Rejected { endpoint, .. } => endpoint,
            Self::Expired { endpoint, .. } => endpoint,
        }
    }

    /// Classify an RPC client error message.
    ///
    /// Returns `None` when the message means the ledger already knows the
    /// transaction, which callers treat as a successful delivery.
    pub fn classify(endpoint: &str, message: &str) -> Option<Self> {
        let lower = message.to_lowercase();

        if lower.contains("already been processed") || lower.contains("alreadyprocessed") {
            return None;
        }

        // a lagging tier may not have seen the anchor yet
        if lower.contains("blockhash not found") {
            return Some(Self::transient(endpoint, message));
        }

        if lower.contains("block height exceeded") || lower.contains("transaction expired") {
            return Some(Self::expired(endpoint, message));
        }

        let transient_patterns = [
            "timeout",
            "timed out",
            "connection",
            "error sending request",
            "reset",
            "broken pipe",
            "network",
            "temporarily unavailable",
            "too many requests",
            "rate limit",
            "node is behind",
            "node is unhealthy",
            "-32005",
        ];
        // HTTP status codes only count as a status token, never inside keys or signatures
        let transient_statuses = ["429", "502", "503", "504"];

        let status_token = |code: &str| {
            lower.contains(&format!("({}", code))
                || lower.contains(&format!("status {}", code))
                || lower.contains(&format!("status: {}", code))
                || lower.trim() == code
        };

        if transient_patterns.iter().any(|pattern| lower.contains(pattern))
            || transient_statuses.iter().any(|code| status_token(code))
        {
            Some(Self::transient(endpoint, message))
        } else {
            Some(Self::rejected(endpoint, message))
        }
    }
}

/// Local failures while assembling or signing an envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Envelope has no operations")]
    Empty,

    /// Serialized transaction exceeds the wire packet limit
    #[error("Too many operations: serialized size {size} exceeds maximum {max}")]
    TooManyOperations { size: usize, max: usize },

    #[error("Message compilation failed: {0}")]
    Compile(String),

    #[error("Signer {0} is not a declared signer of this envelope")]
    UnknownSigner(Pubkey),

    #[error("Envelope already submitted, signatures are final")]
    AlreadyFinalized,

    #[error("Envelope is missing {} signature(s)", missing.len())]
    Incomplete { missing: Vec<Pubkey> },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Outcome errors surfaced to callers of the lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// A query or poll failed at the transport layer
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A tier refused the payload; fatal for this envelope
    #[error("Submission rejected by tier {tier}: {reason}")]
    Rejected { tier: String, reason: String },

    /// Every tier ran out of retry budget on transient failures
    #[error("Broadcast exhausted after {attempts} attempt(s): {last_error}")]
    BroadcastExhausted { attempts: u32, last_error: String },

    /// The anchor's validity window elapsed before inclusion; resubmit with a fresh anchor
    #[error("Anchor expired (expiry height {expiry_height}, observed height {observed_height})")]
    Expired {
        expiry_height: u64,
        observed_height: u64,
    },

    /// The transaction was included and failed on-chain
    #[error("Execution failed: {0}")]
    Errored(ExecutionError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Caller-level wall-clock limit, layered over height-based expiry
    #[error("Timed out after {elapsed_ms}ms while waiting for confirmation")]
    TimedOut { elapsed_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LifecycleError {
    /// Whether the caller may retry (possibly with a fresh anchor)
    pub fn is_retryable(&self) -> bool {
        match self {
            // retryable with a fresh anchor, not with the same payload
            Self::Transport(TransportError::Expired { .. }) => true,
            Self::Transport(err) => err.is_retryable(),
            Self::BroadcastExhausted { .. } => true,
            Self::Expired { .. } => true,
            Self::TimedOut { .. } => true,

            Self::Rejected { .. } => false,
            Self::Errored(_) => false,
            Self::Envelope(_) => false,
            Self::Configuration(_) => false,
        }
    }

    /// Label used for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Rejected { .. } => "rejected",
            Self::BroadcastExhausted { .. } => "exhausted",
            Self::Expired { .. } => "expired",
            Self::Errored(_) => "execution",
            Self::Envelope(_) => "envelope",
            Self::TimedOut { .. } => "timeout",
            Self::Configuration(_) => "config",
        }
    }
}
