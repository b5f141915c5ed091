//! Submission bookkeeping shared by concurrent tier attempts
//!
//! Each envelope owns one entry holding a slot per tier, so lookups by envelope
//! never scan other envelopes. Entries older than the retention window are pruned
//! once none of their slots is still pending.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::PendingSubmission;
use crate::types::EnvelopeId;

/// How long settled submission records are kept by default
pub const DEFAULT_LOG_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Sent at least once, no final answer yet
    Pending,
    Accepted,
    Rejected(String),
    /// Retry budget spent on transient failures
    Exhausted(String),
    /// The tier reported the anchor as expired
    Expired(String),
    /// Another tier decided the submission while this one was still trying
    Superseded,
}

impl AttemptOutcome {
    /// The tier's attempt run has ended
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Final for the envelope; never overwritten by a later submission
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected(_) | Self::Expired(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionAttempt {
    pub envelope_id: EnvelopeId,
    pub tier: String,
    pub tier_index: usize,
    /// Ledger height observed just before the latest send, when it could be read
    pub sent_at_height: Option<u64>,
    pub attempts: u32,
    pub outcome: AttemptOutcome,
}

#[derive(Debug)]
struct EnvelopeSlots {
    touched_at: Instant,
    slots: BTreeMap<usize, SubmissionAttempt>,
}

impl EnvelopeSlots {
    fn has_pending(&self) -> bool {
        self.slots
            .values()
            .any(|slot| slot.outcome == AttemptOutcome::Pending)
    }
}

#[derive(Debug, Default)]
pub struct SubmissionLog {
    envelopes: DashMap<EnvelopeId, EnvelopeSlots>,
}

impl SubmissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one send on the slot; returns the slot's attempt total
    pub fn record_attempt(
        &self,
        envelope_id: EnvelopeId,
        tier_index: usize,
        tier: &str,
        sent_at_height: Option<u64>,
    ) -> u32 {
        let mut entry = self
            .envelopes
            .entry(envelope_id)
            .or_insert_with(|| EnvelopeSlots {
                touched_at: Instant::now(),
                slots: BTreeMap::new(),
            });
        entry.touched_at = Instant::now();

        let slot = entry
            .slots
            .entry(tier_index)
            .or_insert_with(|| SubmissionAttempt {
                envelope_id,
                tier: tier.to_string(),
                tier_index,
                sent_at_height: None,
                attempts: 0,
                outcome: AttemptOutcome::Pending,
            });

        slot.attempts += 1;
        if sent_at_height.is_some() {
            slot.sent_at_height = sent_at_height;
        }
        if !slot.outcome.is_final() {
            slot.outcome = AttemptOutcome::Pending;
        }
        slot.attempts
    }

    /// Set the slot outcome unless it is already final. Returns whether it changed.
    pub fn resolve(&self, envelope_id: EnvelopeId, tier_index: usize, outcome: AttemptOutcome) -> bool {
        let Some(mut entry) = self.envelopes.get_mut(&envelope_id) else {
            return false;
        };
        entry.touched_at = Instant::now();
        match entry.slots.get_mut(&tier_index) {
            Some(slot) if !slot.outcome.is_final() => {
                slot.outcome = outcome;
                true
            }
            _ => false,
        }
    }

    /// Settle every slot of the envelope still pending. Returns how many changed.
    pub fn supersede_pending(&self, envelope_id: &EnvelopeId) -> usize {
        let Some(mut entry) = self.envelopes.get_mut(envelope_id) else {
            return 0;
        };
        let mut settled = 0;
        for slot in entry.slots.values_mut() {
            if slot.outcome == AttemptOutcome::Pending {
                slot.outcome = AttemptOutcome::Superseded;
                settled += 1;
            }
        }
        settled
    }

    pub fn get(&self, envelope_id: &EnvelopeId, tier_index: usize) -> Option<SubmissionAttempt> {
        self.envelopes
            .get(envelope_id)
            .and_then(|entry| entry.slots.get(&tier_index).cloned())
    }

    /// All slots of an envelope, ordered by tier
    pub fn attempts_for(&self, envelope_id: &EnvelopeId) -> Vec<SubmissionAttempt> {
        self.envelopes
            .get(envelope_id)
            .map(|entry| entry.slots.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every record of an envelope. Returns whether any existed.
    pub fn forget(&self, envelope_id: &EnvelopeId) -> bool {
        self.envelopes.remove(envelope_id).is_some()
    }

    /// Drop settled envelopes untouched for at least `retention`
    pub fn prune(&self, retention: Duration, now: Instant) -> usize {
        let before = self.envelopes.len();
        self.envelopes.retain(|_, entry| {
            entry.has_pending() || now.saturating_duration_since(entry.touched_at) < retention
        });
        before.saturating_sub(self.envelopes.len())
    }

    /// Number of envelopes with records
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

/// Remembers accepted envelopes so a re-submit inside the window is answered locally
#[derive(Debug, Default)]
pub struct EnvelopeDeduper {
    accepted: DashMap<EnvelopeId, (Instant, PendingSubmission)>,
}

impl EnvelopeDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, envelope_id: &EnvelopeId, window: Duration, now: Instant) -> Option<PendingSubmission> {
        self.evict_expired(window, now);
        self.accepted
            .get(envelope_id)
            .map(|entry| entry.value().1.clone())
    }

    pub fn remember(&self, pending: &PendingSubmission, now: Instant) {
        self.accepted
            .insert(pending.envelope_id, (now, pending.clone()));
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    fn evict_expired(&self, window: Duration, now: Instant) {
        self.accepted
            .retain(|_, (accepted_at, _)| now.saturating_duration_since(*accepted_at) < window);
    }
}
