//! Transport collaborators consumed by the lifecycle core
//!
//! The core never talks HTTP itself. Every network round trip goes through one
//! of two capability traits, chosen by the caller at composition time:
//! - [`Transport`]: one broadcast tier (send, height, status)
//! - [`LedgerQuery`]: anchor fetches and simulations

use async_trait::async_trait;
use solana_sdk::hash::Hash;

use crate::errors::TransportError;
use crate::simulate::{SimulationOptions, SimulationResult};
use crate::types::{ConfirmationStatus, Durability, EnvelopeId};

pub mod memory;
pub mod rpc;

pub use memory::{InMemoryLedger, ScriptedSend, StatusStep};
pub use rpc::{RpcTransport, RpcTransportConfig};

/// Successful delivery of a payload to a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    /// The tier already knew this transaction; counts as delivered
    AlreadyKnown,
}

/// One network path able to deliver a signed transaction
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Tier name used in logs and submission records
    fn name(&self) -> &str;

    /// Deliver raw wire bytes
    async fn send(&self, raw: &[u8]) -> Result<SendOutcome, TransportError>;

    /// Current ledger block height at the given durability
    async fn block_height(&self, level: Durability) -> Result<u64, TransportError>;

    /// Inclusion status of an envelope, `None` while the ledger has not seen it
    async fn signature_status(
        &self,
        id: &EnvelopeId,
    ) -> Result<Option<ConfirmationStatus>, TransportError>;
}

/// Read-only ledger queries used for anchors and dry runs
#[async_trait]
pub trait LedgerQuery: Send + Sync + std::fmt::Debug {
    /// Latest blockhash and the last block height at which it is still valid
    async fn latest_blockhash(&self, level: Durability) -> Result<(Hash, u64), TransportError>;

    /// Current ledger block height at the given durability
    async fn current_height(&self, level: Durability) -> Result<u64, TransportError>;

    /// Execute raw wire bytes against current state without committing
    async fn simulate(
        &self,
        raw: &[u8],
        level: Durability,
        options: &SimulationOptions,
    ) -> Result<SimulationResult, TransportError>;
}
