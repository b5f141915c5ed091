//! Confirmation tracking
//!
//! Polls an envelope's status until it reaches a target durability, fails on-chain,
//! or its anchor's validity window passes. Expiry is judged by ledger height only;
//! wall-clock limits are a caller convenience layered on top.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::errors::LifecycleError;
use crate::metrics::{metrics, PendingGuard, Timer};
use crate::transport::Transport;
use crate::types::{Anchor, ConfirmationStatus, Durability, EnvelopeId, ExecutionError};

/// Consecutive polling failures tolerated before giving up
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    Unconfirmed,
    ProcessedSeen,
    ConfirmedSeen,
    Finalized,
    Errored(ExecutionError),
    Expired {
        expiry_height: u64,
        observed_height: u64,
    },
}

impl ConfirmationState {
    fn rank(&self) -> u8 {
        match self {
            Self::Unconfirmed => 0,
            Self::ProcessedSeen => 1,
            Self::ConfirmedSeen => 2,
            Self::Finalized => 3,
            Self::Errored(_) | Self::Expired { .. } => u8::MAX,
        }
    }

    fn from_level(level: Durability) -> Self {
        match level {
            Durability::Processed => Self::ProcessedSeen,
            Durability::Confirmed => Self::ConfirmedSeen,
            Durability::Finalized => Self::Finalized,
        }
    }

    /// No observation can move a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Errored(_) | Self::Expired { .. })
    }

    /// Durability reached so far, if any
    pub fn level(&self) -> Option<Durability> {
        match self {
            Self::ProcessedSeen => Some(Durability::Processed),
            Self::ConfirmedSeen => Some(Durability::Confirmed),
            Self::Finalized => Some(Durability::Finalized),
            _ => None,
        }
    }

    /// Expiry only applies before the ledger has confirmed the envelope
    fn can_expire(&self) -> bool {
        matches!(self, Self::Unconfirmed | Self::ProcessedSeen)
    }
}

/// Forward-only state machine for one envelope
#[derive(Debug, Clone)]
pub struct ConfirmationMachine {
    anchor: Anchor,
    state: ConfirmationState,
    latest: Option<ConfirmationStatus>,
}

impl ConfirmationMachine {
    pub fn new(anchor: Anchor) -> Self {
        Self {
            anchor,
            state: ConfirmationState::Unconfirmed,
            latest: None,
        }
    }

    pub fn state(&self) -> &ConfirmationState {
        &self.state
    }

    /// Status that produced the current state
    pub fn latest(&self) -> Option<&ConfirmationStatus> {
        self.latest.as_ref()
    }

    /// Apply a status observation. Returns whether the state moved.
    pub fn observe(&mut self, status: &ConfirmationStatus) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        let next = match &status.err {
            Some(err) => ConfirmationState::Errored(err.clone()),
            None => ConfirmationState::from_level(status.level),
        };

        if next.rank() <= self.state.rank() {
            return false;
        }

        self.state = next;
        self.latest = Some(status.clone());
        true
    }

    /// Apply a height observation. Returns whether the envelope expired.
    pub fn observe_height(&mut self, current_height: u64) -> bool {
        if !self.state.can_expire() || current_height <= self.anchor.expiry_height {
            return false;
        }

        self.state = ConfirmationState::Expired {
            expiry_height: self.anchor.expiry_height,
            observed_height: current_height,
        };
        true
    }

    pub fn reached(&self, target: Durability) -> bool {
        self.state.level().is_some_and(|level| level >= target)
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmationTracker {
    source: Arc<dyn Transport>,
    max_consecutive_failures: u32,
}

impl ConfirmationTracker {
    pub fn new(source: Arc<dyn Transport>) -> Self {
        Self {
            source,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Poll until `target` is reached or the envelope errors or expires.
    ///
    /// Dropping the returned future stops waiting; it never retracts a delivered
    /// submission, which may still land.
    #[instrument(skip(self, anchor), fields(id = %envelope_id, target = %target))]
    pub async fn await_level(
        &self,
        envelope_id: EnvelopeId,
        anchor: Anchor,
        target: Durability,
        poll_interval: Duration,
    ) -> Result<ConfirmationStatus, LifecycleError> {
        let _pending = PendingGuard::enter();
        let timer = Timer::new();
        let mut machine = ConfirmationMachine::new(anchor);
        let mut consecutive_failures = 0u32;

        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // height before status: an envelope landing in this round is seen before expiry is judged
            let polled = async {
                let height = self.source.block_height(Durability::Processed).await?;
                let status = self.source.signature_status(&envelope_id).await?;
                Ok::<_, crate::errors::TransportError>((height, status))
            }
            .await;

            let (height, status) = match polled {
                Ok(polled) => {
                    consecutive_failures = 0;
                    polled
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures > self.max_consecutive_failures {
                        warn!(error = %err, failures = consecutive_failures, "Giving up on status polling");
                        return Err(err.into());
                    }
                    debug!(error = %err, failures = consecutive_failures, "Status poll failed");
                    continue;
                }
            };

            if let Some(status) = &status {
                if machine.observe(status) {
                    debug!(state = ?machine.state(), slot = status.slot, "Confirmation advanced");
                }
            }

            if let ConfirmationState::Errored(err) = machine.state() {
                metrics().execution_errors.inc();
                warn!(error = %err, "Envelope failed on-chain");
                return Err(LifecycleError::Errored(err.clone()));
            }

            // a status at the target wins over a height read earlier in the same round
            if machine.reached(target) {
                if let Some(status) = machine.latest() {
                    metrics().confirmations_total.inc();
                    timer.observe_duration(&metrics().confirmation_latency);
                    info!(level = %status.level, slot = status.slot, "Target durability reached");
                    return Ok(status.clone());
                }
            }

            if machine.observe_height(height) {
                if let ConfirmationState::Expired {
                    expiry_height,
                    observed_height,
                } = machine.state()
                {
                    metrics().confirmations_expired.inc();
                    info!(
                        expiry_height = expiry_height,
                        observed_height = observed_height,
                        "Anchor expired before confirmation"
                    );
                    return Err(LifecycleError::Expired {
                        expiry_height: *expiry_height,
                        observed_height: *observed_height,
                    });
                }
            }
        }
    }

    /// [`Self::await_level`] bounded by a wall-clock limit
    pub async fn await_level_with_timeout(
        &self,
        envelope_id: EnvelopeId,
        anchor: Anchor,
        target: Durability,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<ConfirmationStatus, LifecycleError> {
        match tokio::time::timeout(
            timeout,
            self.await_level(envelope_id, anchor, target, poll_interval),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                metrics().confirmation_timeouts.inc();
                Err(LifecycleError::TimedOut {
                    elapsed_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::transport::memory::StatusStep;
    use crate::transport::InMemoryLedger;
    use proptest::prelude::*;
    use solana_sdk::{hash::Hash, signature::Signature};

    fn status(level: Durability, err: Option<&str>) -> ConfirmationStatus {
        ConfirmationStatus {
            envelope_id: EnvelopeId::Signature(Signature::from([1u8; 64])),
            level,
            slot: 1,
            err: err.map(ExecutionError::new),
        }
    }

    fn anchor(expiry_height: u64) -> Anchor {
        Anchor::new(Hash::default(), expiry_height, 0)
    }

    #[test]
    fn test_backward_observation_discarded() {
        let mut machine = ConfirmationMachine::new(anchor(100));
        assert!(machine.observe(&status(Durability::Confirmed, None)));
        assert!(!machine.observe(&status(Durability::Processed, None)));
        assert_eq!(machine.state(), &ConfirmationState::ConfirmedSeen);
        assert!(machine.reached(Durability::Processed));
        assert!(!machine.reached(Durability::Finalized));
    }

    #[test]
    fn test_errored_is_terminal() {
        let mut machine = ConfirmationMachine::new(anchor(100));
        machine.observe(&status(Durability::Processed, None));
        assert!(machine.observe(&status(Durability::Processed, Some("Custom(6001)"))));
        assert!(!machine.observe(&status(Durability::Finalized, None)));
        assert!(!machine.observe_height(500));
        assert!(matches!(machine.state(), ConfirmationState::Errored(_)));
    }

    #[test]
    fn test_expiry_only_before_confirmation() {
        let mut machine = ConfirmationMachine::new(anchor(100));
        assert!(!machine.observe_height(100));
        machine.observe(&status(Durability::Processed, None));
        assert!(machine.observe_height(101));

        let mut confirmed = ConfirmationMachine::new(anchor(100));
        confirmed.observe(&status(Durability::Confirmed, None));
        assert!(!confirmed.observe_height(101));
        assert_eq!(confirmed.state(), &ConfirmationState::ConfirmedSeen);
    }

    fn observation() -> impl Strategy<Value = Result<ConfirmationStatus, u64>> {
        prop_oneof![
            (0u8..3, any::<bool>()).prop_map(|(level, failed)| {
                let level = match level {
                    0 => Durability::Processed,
                    1 => Durability::Confirmed,
                    _ => Durability::Finalized,
                };
                Ok(status(level, failed.then_some("Custom(1)")))
            }),
            (0u64..200).prop_map(Err),
        ]
    }

    proptest! {
        #[test]
        fn prop_state_is_monotonic(observations in prop::collection::vec(observation(), 0..40)) {
            let mut machine = ConfirmationMachine::new(anchor(100));
            let mut previous = machine.state().clone();

            for observation in observations {
                match &observation {
                    Ok(status) => { machine.observe(status); }
                    Err(height) => { machine.observe_height(*height); }
                }
                let current = machine.state().clone();
                if previous.is_terminal() {
                    prop_assert_eq!(&current, &previous);
                }
                prop_assert!(current.rank() >= previous.rank());
                previous = current;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_when_height_passes_window() {
        let ledger = Arc::new(InMemoryLedger::new("confirm"));
        ledger.set_height(95);
        ledger.set_height_step(2);
        let tracker = ConfirmationTracker::new(ledger.clone());

        let id = EnvelopeId::Signature(Signature::from([3u8; 64]));
        let err = tracker
            .await_level(id, anchor(100), Durability::Confirmed, Duration::from_millis(400))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LifecycleError::Expired {
                expiry_height: 100,
                observed_height: 101
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_reached_in_expiring_round_is_success() {
        let ledger = Arc::new(InMemoryLedger::new("confirm"));
        ledger.set_height(101);
        let signature = Signature::from([8u8; 64]);
        ledger.script_statuses(signature, [StatusStep::Seen(Durability::Processed)]);
        let tracker = ConfirmationTracker::new(ledger);

        let status = tracker
            .await_level(
                EnvelopeId::Signature(signature),
                anchor(100),
                Durability::Processed,
                Duration::from_millis(400),
            )
            .await
            .unwrap();

        assert_eq!(status.level, Durability::Processed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processed_below_target_still_expires() {
        let ledger = Arc::new(InMemoryLedger::new("confirm"));
        ledger.set_height(101);
        let signature = Signature::from([9u8; 64]);
        ledger.script_statuses(signature, [StatusStep::Seen(Durability::Processed)]);
        let tracker = ConfirmationTracker::new(ledger);

        let err = tracker
            .await_level(
                EnvelopeId::Signature(signature),
                anchor(100),
                Durability::Confirmed,
                Duration::from_millis(400),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LifecycleError::Expired {
                expiry_height: 100,
                observed_height: 101
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_target_through_levels() {
        let ledger = Arc::new(InMemoryLedger::new("confirm"));
        let signature = Signature::from([4u8; 64]);
        ledger.script_statuses(
            signature,
            [
                StatusStep::Unseen,
                StatusStep::Seen(Durability::Processed),
                StatusStep::Seen(Durability::Confirmed),
                StatusStep::Seen(Durability::Finalized),
            ],
        );
        let tracker = ConfirmationTracker::new(ledger.clone());

        let status = tracker
            .await_level(
                EnvelopeId::Signature(signature),
                anchor(100),
                Durability::Finalized,
                Duration::from_millis(400),
            )
            .await
            .unwrap();

        assert_eq!(status.level, Durability::Finalized);
        assert_eq!(ledger.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_error_surfaces() {
        let ledger = Arc::new(InMemoryLedger::new("confirm"));
        let signature = Signature::from([5u8; 64]);
        ledger.script_statuses(
            signature,
            [StatusStep::Failed(
                Durability::Processed,
                ExecutionError::new(r#"{"InstructionError":[0,{"Custom":1}]}"#),
            )],
        );
        let tracker = ConfirmationTracker::new(ledger);

        let err = tracker
            .await_level(
                EnvelopeId::Signature(signature),
                anchor(100),
                Durability::Confirmed,
                Duration::from_millis(400),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Errored(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_consecutive_failures() {
        let ledger = Arc::new(InMemoryLedger::new("confirm"));
        ledger.fail_queries(true);
        let tracker = ConfirmationTracker::new(ledger).with_max_consecutive_failures(2);

        let err = tracker
            .await_level(
                EnvelopeId::Signature(Signature::from([6u8; 64])),
                anchor(100),
                Durability::Confirmed,
                Duration::from_millis(400),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Transport(TransportError::Transient { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_timeout() {
        let ledger = Arc::new(InMemoryLedger::new("confirm"));
        let tracker = ConfirmationTracker::new(ledger);

        let err = tracker
            .await_level_with_timeout(
                EnvelopeId::Signature(Signature::from([7u8; 64])),
                anchor(1_000_000),
                Durability::Confirmed,
                Duration::from_millis(400),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();

        assert_eq!(err, LifecycleError::TimedOut { elapsed_ms: 5000 });
    }
}
