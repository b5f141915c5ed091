//! Tiered broadcasting of signed envelopes
//!
//! Tiers are tried in order (or fanned out) with per-tier retry budgets.
//! A rejection is fatal immediately; transient failures retry with backoff and
//! fall through to the next tier once a tier's budget is spent.

pub mod log;
pub mod policy;

pub use log::{AttemptOutcome, EnvelopeDeduper, SubmissionAttempt, SubmissionLog, DEFAULT_LOG_RETENTION};
pub use policy::{Backoff, BroadcastPolicy, FanOut};

use futures::stream::{FuturesUnordered, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonempty::NonEmpty;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::anchor::is_valid;
use crate::envelope::{Encoder, TransactionEnvelope};
use crate::errors::{LifecycleError, TransportError};
use crate::metrics::{metrics, Timer};
use crate::transport::{SendOutcome, Transport};
use crate::types::{Anchor, Durability, EnvelopeId};

/// One delivery path with an optional send rate limit
#[derive(Clone)]
pub struct Tier {
    name: String,
    transport: Arc<dyn Transport>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("name", &self.name)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl Tier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            name: transport.name().to_string(),
            transport,
            limiter: None,
        }
    }

    /// Cap sends on this tier to `per_second`
    pub fn with_rate_limit(mut self, per_second: NonZeroU32) -> Self {
        self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(per_second))));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

/// Handle for an envelope some tier accepted; confirmation is a separate phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub envelope_id: EnvelopeId,
    pub anchor: Anchor,
    /// Tier that accepted the envelope
    pub tier: String,
    pub tier_index: usize,
    pub sent_at_height: Option<u64>,
    /// Sends made by the accepting tier
    pub attempts: u32,
    /// Answered from the dedupe window without sending
    pub deduplicated: bool,
}

enum TierOutcome {
    Delivered(PendingSubmission),
    Fatal(LifecycleError),
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Debug)]
pub struct TieredBroadcaster {
    tiers: NonEmpty<Tier>,
    encoder: Arc<dyn Encoder>,
    log: SubmissionLog,
    log_retention: Duration,
    deduper: EnvelopeDeduper,
}

impl TieredBroadcaster {
    pub fn new(tiers: NonEmpty<Tier>, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            tiers,
            encoder,
            log: SubmissionLog::new(),
            log_retention: DEFAULT_LOG_RETENTION,
            deduper: EnvelopeDeduper::new(),
        }
    }

    /// Keep settled submission records for `retention` after their last update
    pub fn with_log_retention(mut self, retention: Duration) -> Self {
        self.log_retention = retention;
        self
    }

    pub fn tiers(&self) -> &NonEmpty<Tier> {
        &self.tiers
    }

    /// Transport of the first tier, used for status polling
    pub fn primary(&self) -> Arc<dyn Transport> {
        self.tiers.head.transport.clone()
    }

    pub fn log(&self) -> &SubmissionLog {
        &self.log
    }

    /// Deliver a fully signed envelope. Seals the envelope against further signing.
    #[instrument(skip(self, envelope, policy), fields(fan_out = ?policy.fan_out))]
    pub async fn submit(
        &self,
        envelope: &TransactionEnvelope,
        policy: &BroadcastPolicy,
    ) -> Result<PendingSubmission, LifecycleError> {
        let envelope_id = envelope.id()?;
        let policy = policy.clone().normalized();

        let pruned = self.log.prune(self.log_retention, Instant::now());
        if pruned > 0 {
            debug!(pruned = pruned, "Pruned settled submission records");
        }

        if let Some(previous) = self
            .deduper
            .lookup(&envelope_id, policy.dedupe_window, Instant::now())
        {
            metrics().dedupe_hits.inc();
            debug!(id = %envelope_id, tier = %previous.tier, "Envelope already accepted, skipping send");
            return Ok(PendingSubmission {
                deduplicated: true,
                ..previous
            });
        }

        envelope.seal();
        let raw = self.encoder.encode(envelope)?;
        let anchor = *envelope.anchor();
        metrics().submissions_total.inc();
        let timer = Timer::new();

        let result = match policy.fan_out {
            FanOut::Sequential => self.submit_sequential(envelope_id, anchor, &raw, &policy).await,
            FanOut::Parallel => self.submit_fan_out(envelope_id, anchor, &raw, &policy, 0).await,
            FanOut::Staggered { delay_ms } => {
                self.submit_fan_out(envelope_id, anchor, &raw, &policy, delay_ms)
                    .await
            }
        };

        match &result {
            Ok(pending) => {
                timer.observe_duration(&metrics().broadcast_latency);
                self.deduper.remember(pending, Instant::now());
                info!(
                    id = %envelope_id,
                    tier = %pending.tier,
                    attempts = pending.attempts,
                    "Envelope accepted"
                );
            }
            Err(LifecycleError::BroadcastExhausted { .. }) => {
                metrics().broadcast_exhausted.inc();
            }
            Err(_) => {}
        }

        result
    }

    async fn submit_sequential(
        &self,
        envelope_id: EnvelopeId,
        anchor: Anchor,
        raw: &[u8],
        policy: &BroadcastPolicy,
    ) -> Result<PendingSubmission, LifecycleError> {
        let mut total_attempts = 0;
        let mut last_error = String::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            match self.run_tier(index, tier, envelope_id, anchor, raw, policy).await {
                TierOutcome::Delivered(pending) => return Ok(pending),
                TierOutcome::Fatal(err) => return Err(err),
                TierOutcome::Exhausted { attempts, last_error: err } => {
                    total_attempts += attempts;
                    last_error = err;
                }
            }
        }

        Err(LifecycleError::BroadcastExhausted {
            attempts: total_attempts,
            last_error,
        })
    }

    async fn submit_fan_out(
        &self,
        envelope_id: EnvelopeId,
        anchor: Anchor,
        raw: &[u8],
        policy: &BroadcastPolicy,
        stagger_ms: u64,
    ) -> Result<PendingSubmission, LifecycleError> {
        let mut in_flight: FuturesUnordered<_> = self
            .tiers
            .iter()
            .enumerate()
            .map(|(index, tier)| async move {
                let delay = stagger_ms.saturating_mul(index as u64);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                self.run_tier(index, tier, envelope_id, anchor, raw, policy).await
            })
            .collect();

        let mut total_attempts = 0;
        let mut last_error = String::new();

        // first acceptance or fatal answer wins; dropping the stream stops the other tiers
        let decided = loop {
            match in_flight.next().await {
                Some(TierOutcome::Delivered(pending)) => break Ok(pending),
                Some(TierOutcome::Fatal(err)) => break Err(err),
                Some(TierOutcome::Exhausted { attempts, last_error: err }) => {
                    total_attempts += attempts;
                    last_error = err;
                }
                None => {
                    return Err(LifecycleError::BroadcastExhausted {
                        attempts: total_attempts,
                        last_error,
                    })
                }
            }
        };
        drop(in_flight);

        let superseded = self.log.supersede_pending(&envelope_id);
        if superseded > 0 {
            debug!(id = %envelope_id, tiers = superseded, "Settled tiers still in flight");
        }
        decided
    }

    async fn run_tier(
        &self,
        index: usize,
        tier: &Tier,
        envelope_id: EnvelopeId,
        anchor: Anchor,
        raw: &[u8],
        policy: &BroadcastPolicy,
    ) -> TierOutcome {
        let mut last_error = String::new();

        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                metrics().submission_retries.inc();
                tokio::time::sleep(policy.backoff.delay_for(attempt - 1)).await;
            }
            if let Some(limiter) = &tier.limiter {
                limiter.until_ready().await;
            }

            // best effort: an unreadable height never blocks a send
            let height = tier.transport.block_height(Durability::Processed).await.ok();
            if let Some(height) = height {
                if !is_valid(&anchor, height) {
                    metrics().expired_before_send.inc();
                    warn!(
                        tier = %tier.name,
                        expiry_height = anchor.expiry_height,
                        height = height,
                        "Anchor expired before send"
                    );
                    return TierOutcome::Fatal(LifecycleError::Expired {
                        expiry_height: anchor.expiry_height,
                        observed_height: height,
                    });
                }
            }

            let attempts = self.log.record_attempt(envelope_id, index, &tier.name, height);
            metrics().submission_attempts.inc();

            match tier.transport.send(raw).await {
                Ok(outcome) => {
                    self.log.resolve(envelope_id, index, AttemptOutcome::Accepted);
                    if outcome == SendOutcome::AlreadyKnown {
                        debug!(tier = %tier.name, id = %envelope_id, "Tier already knew envelope");
                    }
                    return TierOutcome::Delivered(PendingSubmission {
                        envelope_id,
                        anchor,
                        tier: tier.name.clone(),
                        tier_index: index,
                        sent_at_height: height,
                        attempts,
                        deduplicated: false,
                    });
                }
                Err(TransportError::Rejected { reason, .. }) => {
                    metrics().submission_rejections.inc();
                    self.log
                        .resolve(envelope_id, index, AttemptOutcome::Rejected(reason.clone()));
                    warn!(tier = %tier.name, reason = %reason, "Envelope rejected");
                    return TierOutcome::Fatal(LifecycleError::Rejected {
                        tier: tier.name.clone(),
                        reason,
                    });
                }
                Err(TransportError::Expired { message, .. }) => {
                    self.log
                        .resolve(envelope_id, index, AttemptOutcome::Expired(message.clone()));
                    // the tier saw a height past expiry even when it cannot be read back
                    let observed_height = tier
                        .transport
                        .block_height(Durability::Processed)
                        .await
                        .ok()
                        .filter(|h| *h > anchor.expiry_height)
                        .unwrap_or(anchor.expiry_height + 1);
                    metrics().expired_before_send.inc();
                    warn!(tier = %tier.name, message = %message, "Tier reports anchor expired");
                    return TierOutcome::Fatal(LifecycleError::Expired {
                        expiry_height: anchor.expiry_height,
                        observed_height,
                    });
                }
                Err(err) => {
                    debug!(
                        tier = %tier.name,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "Transient send failure"
                    );
                    last_error = err.to_string();
                }
            }
        }

        self.log
            .resolve(envelope_id, index, AttemptOutcome::Exhausted(last_error.clone()));
        warn!(tier = %tier.name, attempts = policy.max_attempts, "Tier retry budget exhausted");
        TierOutcome::Exhausted {
            attempts: policy.max_attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::WireEncoder;
    use crate::errors::EnvelopeError;
    use crate::transport::{InMemoryLedger, ScriptedSend};
    use crate::types::Encoding;
    use solana_sdk::{
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        pubkey::Pubkey,
        signature::Keypair,
        signer::Signer,
    };

    fn signed_envelope(payer: &Keypair, expiry_height: u64) -> TransactionEnvelope {
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![AccountMeta::new(payer.pubkey(), true)],
            data: vec![7],
        };
        let anchor = Anchor::new(Hash::new_unique(), expiry_height, 0);
        let mut envelope =
            TransactionEnvelope::build(vec![ix], payer.pubkey(), anchor, Encoding::Legacy).unwrap();
        envelope.sign(payer).unwrap();
        envelope
    }

    fn broadcaster(ledgers: &[Arc<InMemoryLedger>]) -> TieredBroadcaster {
        let tiers: Vec<Tier> = ledgers
            .iter()
            .map(|ledger| Tier::new(ledger.clone() as Arc<dyn Transport>))
            .collect();
        let tiers = NonEmpty::from_vec(tiers).unwrap();
        TieredBroadcaster::new(tiers, Arc::new(WireEncoder))
    }

    fn policy(max_attempts: u32) -> BroadcastPolicy {
        BroadcastPolicy {
            max_attempts,
            backoff: Backoff::default(),
            dedupe_window: Duration::from_secs(60),
            fan_out: FanOut::Sequential,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_accept_stays_on_first_tier() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        first.script_sends([
            ScriptedSend::Transient("timeout".to_string()),
            ScriptedSend::Transient("connection reset".to_string()),
        ]);
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let pending = broadcaster.submit(&envelope, &policy(3)).await.unwrap();

        assert_eq!(pending.tier, "tier-1");
        assert_eq!(pending.attempts, 3);
        assert_eq!(first.send_calls(), 3);
        assert_eq!(second.send_calls(), 0);

        let attempts = broadcaster.log().attempts_for(&pending.envelope_id);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Accepted);
        assert_eq!(attempts[0].tier, "tier-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_fatal_without_fallback() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        first.script_sends([ScriptedSend::Reject("insufficient funds for fee".to_string())]);
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let err = broadcaster.submit(&envelope, &policy(3)).await.unwrap_err();

        assert_eq!(
            err,
            LifecycleError::Rejected {
                tier: "tier-1".to_string(),
                reason: "insufficient funds for fee".to_string()
            }
        );
        assert_eq!(first.send_calls(), 1);
        assert_eq!(second.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_then_exhausts() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        first.script_sends((0..2).map(|_| ScriptedSend::Transient("timeout".to_string())));
        second.script_sends((0..2).map(|_| ScriptedSend::Transient("503".to_string())));
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let err = broadcaster.submit(&envelope, &policy(2)).await.unwrap_err();

        match err {
            LifecycleError::BroadcastExhausted { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let id = envelope.id().unwrap();
        let attempts = broadcaster.log().attempts_for(&id);
        assert_eq!(attempts.len(), 2);
        assert!(attempts
            .iter()
            .all(|a| matches!(a.outcome, AttemptOutcome::Exhausted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_tier_used_after_first_exhausts() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        first.script_sends((0..2).map(|_| ScriptedSend::Transient("timeout".to_string())));
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let pending = broadcaster.submit(&envelope, &policy(2)).await.unwrap();
        assert_eq!(pending.tier, "tier-2");
        assert_eq!(pending.tier_index, 1);
        assert_eq!(second.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmit_is_idempotent() {
        let ledger = Arc::new(InMemoryLedger::new("tier-1"));
        let broadcaster = broadcaster(&[ledger.clone()]);

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let first = broadcaster.submit(&envelope, &policy(3)).await.unwrap();
        let second = broadcaster.submit(&envelope, &policy(3)).await.unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.envelope_id, second.envelope_id);
        assert_eq!(ledger.send_calls(), 1);
        assert_eq!(broadcaster.log().attempts_for(&first.envelope_id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmit_after_window_keeps_single_terminal_record() {
        let ledger = Arc::new(InMemoryLedger::new("tier-1"));
        ledger.script_sends([ScriptedSend::Accept, ScriptedSend::AlreadyKnown]);
        let broadcaster = broadcaster(&[ledger.clone()]);
        let policy = BroadcastPolicy {
            dedupe_window: Duration::ZERO,
            ..policy(3)
        };

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let first = broadcaster.submit(&envelope, &policy).await.unwrap();
        let second = broadcaster.submit(&envelope, &policy).await.unwrap();

        assert!(!second.deduplicated);
        assert_eq!(ledger.send_calls(), 2);
        let records = broadcaster.log().attempts_for(&first.envelope_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AttemptOutcome::Accepted);
        assert_eq!(records[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_unsigned_envelope_refused() {
        let ledger = Arc::new(InMemoryLedger::new("tier-1"));
        let broadcaster = broadcaster(&[ledger.clone()]);

        let payer = Keypair::new();
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![AccountMeta::new(payer.pubkey(), true)],
            data: vec![],
        };
        let envelope = TransactionEnvelope::build(
            vec![ix],
            payer.pubkey(),
            Anchor::new(Hash::new_unique(), 100, 0),
            Encoding::Versioned,
        )
        .unwrap();

        let err = broadcaster.submit(&envelope, &policy(1)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Envelope(EnvelopeError::Incomplete { .. })));
        assert!(!envelope.is_sealed());
        assert_eq!(ledger.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_submit_seals_envelope() {
        let ledger = Arc::new(InMemoryLedger::new("tier-1"));
        let broadcaster = broadcaster(&[ledger]);

        let payer = Keypair::new();
        let mut envelope = signed_envelope(&payer, 1_000);
        broadcaster.submit(&envelope, &policy(1)).await.unwrap();

        assert!(envelope.is_sealed());
        assert_eq!(envelope.sign(&payer), Err(EnvelopeError::AlreadyFinalized));
    }

    #[tokio::test]
    async fn test_expired_anchor_not_sent() {
        let ledger = Arc::new(InMemoryLedger::new("tier-1"));
        ledger.set_height(200);
        let broadcaster = broadcaster(&[ledger.clone()]);

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 100);
        let err = broadcaster.submit(&envelope, &policy(3)).await.unwrap_err();

        assert_eq!(
            err,
            LifecycleError::Expired {
                expiry_height: 100,
                observed_height: 200
            }
        );
        assert_eq!(ledger.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_fan_out_first_acceptance_wins() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        first.script_sends((0..3).map(|_| ScriptedSend::Transient("timeout".to_string())));
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);
        let policy = BroadcastPolicy {
            fan_out: FanOut::Parallel,
            ..policy(3)
        };

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let pending = broadcaster.submit(&envelope, &policy).await.unwrap();

        assert_eq!(pending.tier, "tier-2");
        assert_eq!(second.send_calls(), 1);
        let attempts = broadcaster.log().attempts_for(&pending.envelope_id);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Superseded);
        assert_eq!(attempts[1].outcome, AttemptOutcome::Accepted);
        assert!(attempts.iter().all(|a| a.outcome.is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staggered_fan_out_skips_late_tier() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);
        let policy = BroadcastPolicy {
            fan_out: FanOut::Staggered { delay_ms: 500 },
            ..policy(3)
        };

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let pending = broadcaster.submit(&envelope, &policy).await.unwrap();

        assert_eq!(pending.tier, "tier-1");
        assert_eq!(first.send_calls(), 1);
        assert_eq!(second.send_calls(), 0);
        let attempts = broadcaster.log().attempts_for(&pending.envelope_id);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staggered_fan_out_settles_slow_tier() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        first.script_sends((0..3).map(|_| ScriptedSend::Transient("timeout".to_string())));
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);
        let policy = BroadcastPolicy {
            fan_out: FanOut::Staggered { delay_ms: 50 },
            ..policy(3)
        };

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let pending = broadcaster.submit(&envelope, &policy).await.unwrap();

        assert_eq!(pending.tier, "tier-2");
        let attempts = broadcaster.log().attempts_for(&pending.envelope_id);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Superseded);
        assert_eq!(attempts[1].outcome, AttemptOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_reported_expiry_is_fatal() {
        let first = Arc::new(InMemoryLedger::new("tier-1"));
        let second = Arc::new(InMemoryLedger::new("tier-2"));
        first.script_sends([ScriptedSend::Expired("block height exceeded".to_string())]);
        let broadcaster = broadcaster(&[first.clone(), second.clone()]);

        let payer = Keypair::new();
        let envelope = signed_envelope(&payer, 1_000);
        let err = broadcaster.submit(&envelope, &policy(3)).await.unwrap_err();

        assert_eq!(
            err,
            LifecycleError::Expired {
                expiry_height: 1_000,
                observed_height: 1_001
            }
        );
        assert!(err.is_retryable());
        assert_eq!(first.send_calls(), 1);
        assert_eq!(second.send_calls(), 0);
        let slot = broadcaster.log().get(&envelope.id().unwrap(), 0).unwrap();
        assert!(matches!(slot.outcome, AttemptOutcome::Expired(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_records_pruned_after_retention() {
        let ledger = Arc::new(InMemoryLedger::new("tier-1"));
        let broadcaster = broadcaster(&[ledger]).with_log_retention(Duration::from_secs(1));

        let payer = Keypair::new();
        let old = signed_envelope(&payer, 1_000);
        let old_id = broadcaster.submit(&old, &policy(1)).await.unwrap().envelope_id;

        tokio::time::advance(Duration::from_secs(2)).await;
        let other = Keypair::new();
        let fresh = signed_envelope(&other, 1_000);
        let fresh_id = broadcaster.submit(&fresh, &policy(1)).await.unwrap().envelope_id;

        assert!(broadcaster.log().attempts_for(&old_id).is_empty());
        assert_eq!(broadcaster.log().attempts_for(&fresh_id).len(), 1);
        assert_eq!(broadcaster.log().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_tier_throttles_sends() {
        let ledger = Arc::new(InMemoryLedger::new("tier-1"));
        let tier = Tier::new(ledger.clone() as Arc<dyn Transport>)
            .with_rate_limit(NonZeroU32::new(2).unwrap());
        let broadcaster = TieredBroadcaster::new(NonEmpty::new(tier), Arc::new(WireEncoder));

        // burst of two, then one send per 500ms
        let started = std::time::Instant::now();
        for _ in 0..3 {
            let payer = Keypair::new();
            let envelope = signed_envelope(&payer, 1_000);
            broadcaster.submit(&envelope, &policy(1)).await.unwrap();
        }

        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(ledger.send_calls(), 3);
    }
}
