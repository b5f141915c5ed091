//! Structured logging setup and per-submission event logging

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::errors::LifecycleError;
use crate::observability::CorrelationId;
use crate::types::{ConfirmationStatus, Durability, EnvelopeId};

/// Initialize the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let default_filter = if verbose {
        "tx_lifecycle=debug,txlife=debug,info"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }

    Ok(())
}

/// Structured logger for one submit-and-confirm cycle
#[derive(Debug, Clone)]
pub struct SubmissionLogger {
    correlation_id: CorrelationId,
}

impl SubmissionLogger {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_submit(&self, id: &EnvelopeId, target: Durability) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            envelope_id = %id,
            target = %target,
            "Submitting envelope"
        );
    }

    pub fn log_accepted(&self, id: &EnvelopeId, tier: &str, attempts: u32, deduplicated: bool) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            envelope_id = %id,
            tier = %tier,
            attempts = attempts,
            deduplicated = deduplicated,
            "Envelope delivered"
        );
    }

    pub fn log_confirmed(&self, status: &ConfirmationStatus, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            envelope_id = %status.envelope_id,
            level = %status.level,
            slot = status.slot,
            latency_ms = latency_ms,
            "Envelope confirmed"
        );
    }

    pub fn log_failure(&self, id: Option<&EnvelopeId>, error: &LifecycleError, latency_ms: u64) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            envelope_id = ?id.map(ToString::to_string),
            category = error.category(),
            retryable = error.is_retryable(),
            error = %error,
            latency_ms = latency_ms,
            "Submission failed"
        );
    }
}

impl Default for SubmissionLogger {
    fn default() -> Self {
        Self::new(CorrelationId::new())
    }
}
