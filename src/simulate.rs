//! Dry-run execution of envelopes
//!
//! A simulation never mutates ledger state. A result carrying `err` is a
//! program execution failure the simulation successfully diagnosed; it is
//! returned as data, never as an `Err`, and never retried.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::anchor::is_valid;
use crate::envelope::{Encoder, TransactionEnvelope};
use crate::errors::{EnvelopeError, LifecycleError};
use crate::logs::{LogFrame, LogInterpreter};
use crate::metrics::metrics;
use crate::transport::LedgerQuery;
use crate::types::{Durability, ExecutionError};

/// Knobs passed through to the ledger's simulation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Enforce signature presence and validity
    #[serde(default)]
    pub sign_verify: bool,

    /// Substitute the ledger's latest blockhash for the envelope's anchor
    #[serde(default = "default_true")]
    pub replace_recent_blockhash: bool,

    /// Accounts whose post-simulation state should be returned
    #[serde(default)]
    pub accounts_to_return: Vec<Pubkey>,
}

fn default_true() -> bool {
    true
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            sign_verify: false,
            replace_recent_blockhash: true,
            accounts_to_return: Vec::new(),
        }
    }
}

/// Post-simulation snapshot of one requested account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedAccount {
    pub address: Pubkey,
    /// `None` when the account does not exist after execution
    pub state: Option<AccountSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub lamports: u64,
    pub owner: String,
    pub data: Vec<u8>,
    pub executable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
    pub returned_accounts: Vec<ReturnedAccount>,
    pub err: Option<ExecutionError>,
}

impl SimulationResult {
    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }

    /// Compute limit with a safety margin, clamped to `[min, max]` (bounds in either order)
    pub fn suggested_compute_limit(&self, margin_pct: u32, min: u32, max: u32) -> Option<u32> {
        let units = self.units_consumed?;
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        let padded = units.saturating_mul(100 + margin_pct as u64) / 100;
        Some(padded.clamp(low as u64, high as u64) as u32)
    }

    /// Structured call trace of the simulated execution
    pub fn explain(&self) -> Vec<LogFrame> {
        LogInterpreter::parse(&self.logs, self.err.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct Simulator {
    backend: Arc<dyn LedgerQuery>,
    encoder: Arc<dyn Encoder>,
}

impl Simulator {
    pub fn new(backend: Arc<dyn LedgerQuery>, encoder: Arc<dyn Encoder>) -> Self {
        Self { backend, encoder }
    }

    #[instrument(skip(self, envelope, options), fields(level = %level, payer = %envelope.payer()))]
    pub async fn simulate(
        &self,
        envelope: &TransactionEnvelope,
        level: Durability,
        options: &SimulationOptions,
    ) -> Result<SimulationResult, LifecycleError> {
        if options.sign_verify && options.replace_recent_blockhash {
            return Err(LifecycleError::Configuration(
                "sign_verify cannot be combined with replace_recent_blockhash".to_string(),
            ));
        }

        if options.sign_verify && !envelope.is_fully_signed() {
            return Err(EnvelopeError::Incomplete {
                missing: envelope.missing_signers(),
            }
            .into());
        }

        if !options.replace_recent_blockhash {
            let height = self.backend.current_height(level).await?;
            if !is_valid(envelope.anchor(), height) {
                return Err(LifecycleError::Expired {
                    expiry_height: envelope.anchor().expiry_height,
                    observed_height: height,
                });
            }
        }

        let raw = self.encoder.encode(envelope)?;
        let result = self.backend.simulate(&raw, level, options).await?;

        metrics().simulations.inc();
        match &result.err {
            Some(err) => {
                metrics().simulation_failures.inc();
                info!(
                    error = %err,
                    logs = result.logs.len(),
                    "Simulation reported execution failure"
                );
            }
            None => debug!(
                units_consumed = ?result.units_consumed,
                logs = result.logs.len(),
                "Simulation succeeded"
            ),
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::WireEncoder;
    use crate::transport::InMemoryLedger;
    use crate::types::{Anchor, Encoding};
    use solana_sdk::{
        instruction::{AccountMeta, Instruction},
        signature::Keypair,
        signer::Signer,
    };

    fn setup() -> (Arc<InMemoryLedger>, Simulator) {
        let ledger = Arc::new(InMemoryLedger::new("sim"));
        let simulator = Simulator::new(ledger.clone(), Arc::new(WireEncoder));
        (ledger, simulator)
    }

    fn envelope(payer: &Keypair, anchor: Anchor) -> TransactionEnvelope {
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                AccountMeta::new(payer.pubkey(), true),
                AccountMeta::new(Pubkey::new_unique(), false),
            ],
            data: vec![1, 2, 3],
        };
        TransactionEnvelope::build(vec![ix], payer.pubkey(), anchor, Encoding::Versioned).unwrap()
    }

    #[tokio::test]
    async fn test_execution_failure_is_data() {
        let (ledger, simulator) = setup();
        ledger.set_simulation(SimulationResult {
            logs: vec![
                "Program Prog111 invoke [1]".to_string(),
                "Program Prog111 failed: AccountNotFound".to_string(),
            ],
            units_consumed: Some(0),
            returned_accounts: vec![],
            err: Some(ExecutionError::new("AccountNotFound")),
        });

        let payer = Keypair::new();
        let env = envelope(&payer, Anchor::new(ledger.blockhash_at(0), 150, 0));
        let result = simulator
            .simulate(&env, Durability::Processed, &SimulationOptions::default())
            .await
            .unwrap();

        assert_eq!(result.err, Some(ExecutionError::new("AccountNotFound")));
        assert!(!result.logs.is_empty());
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_sign_verify_requires_signatures() {
        let (_ledger, simulator) = setup();
        let payer = Keypair::new();
        let env = envelope(&payer, Anchor::new(Default::default(), 150, 0));

        let options = SimulationOptions {
            sign_verify: true,
            replace_recent_blockhash: false,
            accounts_to_return: vec![],
        };
        let err = simulator
            .simulate(&env, Durability::Processed, &options)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Envelope(EnvelopeError::Incomplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_sign_verify_with_replacement_is_rejected() {
        let (_ledger, simulator) = setup();
        let payer = Keypair::new();
        let env = envelope(&payer, Anchor::new(Default::default(), 150, 0));

        let options = SimulationOptions {
            sign_verify: true,
            ..SimulationOptions::default()
        };
        let err = simulator
            .simulate(&env, Durability::Processed, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_stale_anchor_only_checked_without_replacement() {
        let (ledger, simulator) = setup();
        ledger.set_height(500);
        let payer = Keypair::new();
        let env = envelope(&payer, Anchor::new(Default::default(), 100, 0));

        // replacement on: stale anchor is fine
        simulator
            .simulate(&env, Durability::Processed, &SimulationOptions::default())
            .await
            .unwrap();

        let options = SimulationOptions {
            replace_recent_blockhash: false,
            ..SimulationOptions::default()
        };
        let err = simulator
            .simulate(&env, Durability::Processed, &options)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::Expired {
                expiry_height: 100,
                observed_height: 500
            }
        );
    }

    #[tokio::test]
    async fn test_options_forwarded() {
        let (ledger, simulator) = setup();
        let payer = Keypair::new();
        let watched = Pubkey::new_unique();
        let env = envelope(&payer, Anchor::new(Default::default(), 150, 0));

        let options = SimulationOptions {
            accounts_to_return: vec![watched],
            ..SimulationOptions::default()
        };
        simulator
            .simulate(&env, Durability::Confirmed, &options)
            .await
            .unwrap();
        assert_eq!(ledger.last_simulation_options(), Some(options));
    }

    #[test]
    fn test_suggested_compute_limit() {
        let result = SimulationResult {
            logs: vec![],
            units_consumed: Some(100_000),
            returned_accounts: vec![],
            err: None,
        };
        assert_eq!(result.suggested_compute_limit(20, 1_000, 1_400_000), Some(120_000));
        assert_eq!(result.suggested_compute_limit(20, 200_000, 1_400_000), Some(200_000));
        assert_eq!(result.suggested_compute_limit(20, 1_000, 110_000), Some(110_000));
        // swapped bounds are accepted rather than panicking
        assert_eq!(result.suggested_compute_limit(20, 110_000, 1_000), Some(110_000));

        let unknown = SimulationResult {
            units_consumed: None,
            ..result
        };
        assert_eq!(unknown.suggested_compute_limit(20, 1_000, 1_400_000), None);
    }
}
