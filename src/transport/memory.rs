//! In-memory ledger used for dry runs and deterministic tests
//!
//! Behaves like a single RPC node whose answers are scripted: send outcomes are
//! consumed in order, signature statuses step forward on each poll, and block
//! height only moves when told to (or by a fixed step per height query).

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use solana_sdk::{hash::Hash, signature::Signature, transaction::VersionedTransaction};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

use super::{LedgerQuery, SendOutcome, Transport};
use crate::errors::TransportError;
use crate::simulate::{SimulationOptions, SimulationResult};
use crate::types::{ConfirmationStatus, Durability, EnvelopeId, ExecutionError};

/// Scripted answer to one `send` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedSend {
    Accept,
    AlreadyKnown,
    Transient(String),
    Reject(String),
    /// Tier reports the anchor's validity window as passed
    Expired(String),
}

/// Scripted answer to one status poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusStep {
    Unseen,
    Seen(Durability),
    Failed(Durability, ExecutionError),
}

#[derive(Debug)]
pub struct InMemoryLedger {
    name: String,
    height: AtomicU64,
    height_step: AtomicU64,
    fail_queries: AtomicBool,
    auto_land: Mutex<Option<Durability>>,
    send_script: Mutex<VecDeque<ScriptedSend>>,
    status_script: Mutex<HashMap<Signature, VecDeque<StatusStep>>>,
    simulation: Mutex<Option<SimulationResult>>,
    last_simulation: Mutex<Option<SimulationOptions>>,
    sent: Mutex<Vec<Vec<u8>>>,
    send_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl InMemoryLedger {
    /// Heights an anchor stays valid after it is issued
    pub const VALIDITY_WINDOW: u64 = 150;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            height: AtomicU64::new(0),
            height_step: AtomicU64::new(0),
            fail_queries: AtomicBool::new(false),
            auto_land: Mutex::new(None),
            send_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(HashMap::new()),
            simulation: Mutex::new(None),
            last_simulation: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn advance(&self, by: u64) {
        self.height.fetch_add(by, Ordering::SeqCst);
    }

    /// Advance height by `step` every time a tier asks for it
    pub fn set_height_step(&self, step: u64) {
        self.height_step.store(step, Ordering::SeqCst);
    }

    /// Make every query (height, blockhash, status, simulate) fail transiently
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Accepted payloads immediately appear at `level`
    pub fn auto_land(&self, level: Option<Durability>) {
        *self.auto_land.lock() = level;
    }

    /// Queue answers for upcoming `send` calls; afterwards sends are accepted
    pub fn script_sends(&self, outcomes: impl IntoIterator<Item = ScriptedSend>) {
        self.send_script.lock().extend(outcomes);
    }

    /// Queue status answers for a signature; the last step repeats
    pub fn script_statuses(&self, signature: Signature, steps: impl IntoIterator<Item = StatusStep>) {
        self.status_script
            .lock()
            .entry(signature)
            .or_default()
            .extend(steps);
    }

    pub fn set_simulation(&self, result: SimulationResult) {
        *self.simulation.lock() = Some(result);
    }

    pub fn last_simulation_options(&self) -> Option<SimulationOptions> {
        self.last_simulation.lock().clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Blockhash issued at a given height; deterministic per ledger name
    pub fn blockhash_at(&self, height: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(height.to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        Hash::new_from_array(digest)
    }

    fn check_queries(&self) -> Result<(), TransportError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(TransportError::transient(&self.name, "connection reset by peer"));
        }
        Ok(())
    }

    fn land(&self, raw: &[u8], level: Durability) {
        if let Ok(tx) = bincode::deserialize::<VersionedTransaction>(raw) {
            if let Some(signature) = tx.signatures.first() {
                let mut script = self.status_script.lock();
                let steps = script.entry(*signature).or_default();
                steps.clear();
                steps.push_back(StatusStep::Seen(level));
            }
        }
    }
}

#[async_trait]
impl Transport for InMemoryLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, raw: &[u8]) -> Result<SendOutcome, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.send_script.lock().pop_front().unwrap_or(ScriptedSend::Accept);
        debug!(ledger = %self.name, outcome = ?next, "Scripted send");

        match next {
            ScriptedSend::Accept => {
                self.sent.lock().push(raw.to_vec());
                let auto_land = *self.auto_land.lock();
                if let Some(level) = auto_land {
                    self.land(raw, level);
                }
                Ok(SendOutcome::Accepted)
            }
            ScriptedSend::AlreadyKnown => Ok(SendOutcome::AlreadyKnown),
            ScriptedSend::Transient(message) => Err(TransportError::transient(&self.name, message)),
            ScriptedSend::Reject(reason) => Err(TransportError::rejected(&self.name, reason)),
            ScriptedSend::Expired(message) => Err(TransportError::expired(&self.name, message)),
        }
    }

    async fn block_height(&self, _level: Durability) -> Result<u64, TransportError> {
        self.check_queries()?;
        let step = self.height_step.load(Ordering::SeqCst);
        Ok(self.height.fetch_add(step, Ordering::SeqCst))
    }

    async fn signature_status(
        &self,
        id: &EnvelopeId,
    ) -> Result<Option<ConfirmationStatus>, TransportError> {
        self.check_queries()?;
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let step = {
            let mut script = self.status_script.lock();
            match script.get_mut(id.signature()) {
                Some(steps) if steps.len() > 1 => steps.pop_front(),
                Some(steps) => steps.front().cloned(),
                None => None,
            }
        };

        let slot = self.height();
        Ok(match step {
            None | Some(StatusStep::Unseen) => None,
            Some(StatusStep::Seen(level)) => Some(ConfirmationStatus {
                envelope_id: *id,
                level,
                slot,
                err: None,
            }),
            Some(StatusStep::Failed(level, err)) => Some(ConfirmationStatus {
                envelope_id: *id,
                level,
                slot,
                err: Some(err),
            }),
        })
    }
}

#[async_trait]
impl LedgerQuery for InMemoryLedger {
    async fn latest_blockhash(&self, _level: Durability) -> Result<(Hash, u64), TransportError> {
        self.check_queries()?;
        let height = self.height();
        Ok((self.blockhash_at(height), height + Self::VALIDITY_WINDOW))
    }

    async fn current_height(&self, _level: Durability) -> Result<u64, TransportError> {
        self.check_queries()?;
        Ok(self.height())
    }

    async fn simulate(
        &self,
        _raw: &[u8],
        _level: Durability,
        options: &SimulationOptions,
    ) -> Result<SimulationResult, TransportError> {
        self.check_queries()?;
        *self.last_simulation.lock() = Some(options.clone());
        Ok(self.simulation.lock().clone().unwrap_or_else(|| SimulationResult {
            logs: Vec::new(),
            units_consumed: Some(0),
            returned_accounts: Vec::new(),
            err: None,
        }))
    }
}
