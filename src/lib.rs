//! Client-side transaction lifecycle for Solana-style ledgers
//!
//! Prepare an envelope on a fresh anchor, simulate it, broadcast it across
//! tiers of transports, track it to a durability level, and explain its logs.

pub mod anchor;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod confirm;
pub mod endpoints;
pub mod envelope;
pub mod errors;
pub mod logs;
pub mod metrics;
pub mod observability;
pub mod simulate;
pub mod structured_logging;
pub mod transport;
pub mod types;

pub use anchor::BlockhashTracker;
pub use broadcast::{BroadcastPolicy, FanOut, PendingSubmission, Tier, TieredBroadcaster};
pub use client::{ClientSettings, LifecycleClient};
pub use config::LifecycleConfig;
pub use confirm::{ConfirmationState, ConfirmationTracker};
pub use envelope::{Encoder, TransactionEnvelope, WireEncoder};
pub use errors::{EnvelopeError, LifecycleError, TransportError};
pub use logs::{LogFrame, LogInterpreter};
pub use simulate::{SimulationOptions, SimulationResult, Simulator};
pub use transport::{LedgerQuery, Transport};
pub use types::{Anchor, ConfirmationStatus, Durability, Encoding, EnvelopeId, ExecutionError};

// Re-export commonly used types
pub use solana_sdk::{hash::Hash, instruction::Instruction, pubkey::Pubkey, signature::Signature};
