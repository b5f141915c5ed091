//! Caller-facing facade over the lifecycle components
//!
//! Every collaborator is passed in at construction; there is no process-wide
//! connection or default provider.

use nonempty::NonEmpty;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::anchor::BlockhashTracker;
use crate::broadcast::{BroadcastPolicy, PendingSubmission, Tier, TieredBroadcaster};
use crate::config::LifecycleConfig;
use crate::confirm::{ConfirmationTracker, DEFAULT_MAX_CONSECUTIVE_FAILURES};
use crate::envelope::{Encoder, TransactionEnvelope, WireEncoder};
use crate::errors::LifecycleError;
use crate::logs::{LogFrame, LogInterpreter};
use crate::simulate::{SimulationOptions, SimulationResult, Simulator};
use crate::structured_logging::SubmissionLogger;
use crate::transport::{LedgerQuery, RpcTransport, Transport};
use crate::types::{Anchor, ConfirmationStatus, Durability, Encoding, ExecutionError};

/// Knobs of the facade that are not owned by a single component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub simulation_level: Durability,
    pub encoding: Encoding,
    pub poll_interval: Duration,
    pub confirm_timeout: Option<Duration>,
    pub max_consecutive_failures: u32,
}

impl ClientSettings {
    pub fn new(simulation_level: Durability) -> Self {
        Self {
            simulation_level,
            encoding: Encoding::default(),
            poll_interval: Duration::from_millis(500),
            confirm_timeout: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug)]
pub struct LifecycleClient {
    anchors: BlockhashTracker,
    simulator: Simulator,
    broadcaster: TieredBroadcaster,
    confirmations: ConfirmationTracker,
    settings: ClientSettings,
}

impl LifecycleClient {
    /// Compose from explicit collaborators. Status polling uses the first tier.
    pub fn new(
        ledger: Arc<dyn LedgerQuery>,
        tiers: NonEmpty<Tier>,
        encoder: Arc<dyn Encoder>,
        settings: ClientSettings,
    ) -> Self {
        let broadcaster = TieredBroadcaster::new(tiers, encoder.clone());
        let confirmations = ConfirmationTracker::new(broadcaster.primary())
            .with_max_consecutive_failures(settings.max_consecutive_failures);

        Self {
            anchors: BlockhashTracker::new(ledger.clone()),
            simulator: Simulator::new(ledger, encoder),
            broadcaster,
            confirmations,
            settings,
        }
    }

    /// One node serving every role
    pub fn single<L>(ledger: Arc<L>, settings: ClientSettings) -> Self
    where
        L: Transport + LedgerQuery + 'static,
    {
        let tier = Tier::new(ledger.clone() as Arc<dyn Transport>);
        Self::new(ledger, NonEmpty::new(tier), Arc::new(WireEncoder), settings)
    }

    /// RPC tiers from configuration; the first tier also answers anchor and simulation queries
    pub fn from_config(config: &LifecycleConfig) -> Result<Self, LifecycleError> {
        config.validate()?;

        let transports: Vec<Arc<RpcTransport>> = config
            .tiers
            .iter()
            .map(|tier| Arc::new(RpcTransport::new(tier)))
            .collect();

        let rate_limit = config.broadcast.rate_limit();
        let tiers: Vec<Tier> = transports
            .iter()
            .map(|transport| {
                let tier = Tier::new(transport.clone() as Arc<dyn Transport>);
                match rate_limit {
                    Some(limit) => tier.with_rate_limit(limit),
                    None => tier,
                }
            })
            .collect();
        let tiers = NonEmpty::from_vec(tiers)
            .ok_or_else(|| LifecycleError::Configuration("at least one tier is required".to_string()))?;

        let settings = ClientSettings {
            simulation_level: config.simulation.level,
            encoding: config.transaction.encoding,
            poll_interval: config.confirmation.poll_interval(),
            confirm_timeout: config.confirmation.timeout(),
            max_consecutive_failures: config.confirmation.max_consecutive_failures,
        };

        let ledger: Arc<dyn LedgerQuery> = transports[0].clone();
        Ok(Self::new(ledger, tiers, Arc::new(WireEncoder), settings))
    }

    pub fn anchors(&self) -> &BlockhashTracker {
        &self.anchors
    }

    pub fn broadcaster(&self) -> &TieredBroadcaster {
        &self.broadcaster
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Fetch a fresh anchor at `level` and build an unsigned envelope on it
    pub async fn prepare(
        &self,
        operations: Vec<Instruction>,
        payer: Pubkey,
        level: Durability,
    ) -> Result<(TransactionEnvelope, Anchor), LifecycleError> {
        let anchor = self.anchors.fetch(level).await?;
        let envelope = TransactionEnvelope::build(operations, payer, anchor, self.settings.encoding)?;
        Ok((envelope, anchor))
    }

    pub async fn simulate(
        &self,
        envelope: &TransactionEnvelope,
        options: &SimulationOptions,
    ) -> Result<SimulationResult, LifecycleError> {
        self.simulator
            .simulate(envelope, self.settings.simulation_level, options)
            .await
    }

    /// Broadcast only; confirmation is left to the caller
    pub async fn submit(
        &self,
        envelope: &TransactionEnvelope,
        policy: &BroadcastPolicy,
    ) -> Result<PendingSubmission, LifecycleError> {
        self.broadcaster.submit(envelope, policy).await
    }

    /// Wait for an accepted submission to reach `target`
    pub async fn confirm(
        &self,
        pending: &PendingSubmission,
        target: Durability,
    ) -> Result<ConfirmationStatus, LifecycleError> {
        match self.settings.confirm_timeout {
            Some(timeout) => {
                self.confirmations
                    .await_level_with_timeout(
                        pending.envelope_id,
                        pending.anchor,
                        target,
                        self.settings.poll_interval,
                        timeout,
                    )
                    .await
            }
            None => {
                self.confirmations
                    .await_level(
                        pending.envelope_id,
                        pending.anchor,
                        target,
                        self.settings.poll_interval,
                    )
                    .await
            }
        }
    }

    /// Broadcast, then wait for `target`. `Expired` means: rebuild on a fresh anchor and resubmit.
    pub async fn submit_and_confirm(
        &self,
        envelope: &TransactionEnvelope,
        target: Durability,
        policy: &BroadcastPolicy,
    ) -> Result<ConfirmationStatus, LifecycleError> {
        let logger = SubmissionLogger::default();
        let started = Instant::now();
        let id = envelope.id().ok();

        if let Some(id) = &id {
            logger.log_submit(id, target);
        }

        let outcome = async {
            let pending = self.broadcaster.submit(envelope, policy).await?;
            logger.log_accepted(
                &pending.envelope_id,
                &pending.tier,
                pending.attempts,
                pending.deduplicated,
            );
            self.confirm(&pending, target).await
        }
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(status) => logger.log_confirmed(status, latency_ms),
            Err(err) => logger.log_failure(id.as_ref(), err, latency_ms),
        }
        outcome
    }

    /// Structured call trace of raw program logs
    pub fn explain<S: AsRef<str>>(&self, raw_logs: &[S], err: Option<&ExecutionError>) -> Vec<LogFrame> {
        LogInterpreter::parse(raw_logs, err)
    }
}
