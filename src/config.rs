//! Configuration for the transaction lifecycle client
//!
//! Loaded from a TOML file with `TXLIFE__SECTION__KEY` environment overrides.
//! Durability levels have no defaults: every section that polls or queries the
//! ledger names its level explicitly.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use crate::broadcast::{Backoff, BroadcastPolicy, FanOut};
use crate::errors::LifecycleError;
use crate::simulate::SimulationOptions;
use crate::transport::RpcTransportConfig;
use crate::types::{Durability, Encoding};

/// Main client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Broadcast tiers in priority order; the first also serves anchors and simulations
    pub tiers: Vec<RpcTransportConfig>,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    pub confirmation: ConfirmationConfig,

    pub simulation: SimulationConfig,

    pub transaction: TransactionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Attempts per tier, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,

    #[serde(default)]
    pub fan_out: FanOut,

    /// Per-tier send cap
    #[serde(default)]
    pub rate_limit_per_second: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    pub target: Durability,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Wall-clock limit on top of height-based expiry
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub level: Durability,

    #[serde(default)]
    pub sign_verify: bool,

    #[serde(default = "default_true")]
    pub replace_recent_blockhash: bool,

    /// Safety margin applied to simulated compute units
    #[serde(default = "default_compute_margin_pct")]
    pub compute_margin_pct: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Durability of the anchor fetched by `prepare`
    pub anchor_level: Durability,

    #[serde(default)]
    pub encoding: Encoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default)]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 5_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_jitter_factor() -> f64 { 0.1 }
fn default_dedupe_window_ms() -> u64 { 60_000 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_max_consecutive_failures() -> u32 { 5 }
fn default_compute_margin_pct() -> u32 { 20 }
fn default_log_level() -> String { "tx_lifecycle=info,warn".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
            dedupe_window_ms: default_dedupe_window_ms(),
            fan_out: FanOut::default(),
            rate_limit_per_second: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: default_metrics_port(),
        }
    }
}

impl BroadcastConfig {
    pub fn policy(&self) -> BroadcastPolicy {
        BroadcastPolicy {
            max_attempts: self.max_attempts,
            backoff: Backoff {
                base_delay_ms: self.base_delay_ms,
                max_delay_ms: self.max_delay_ms,
                multiplier: self.multiplier,
                jitter_factor: self.jitter_factor,
            },
            dedupe_window: Duration::from_millis(self.dedupe_window_ms),
            fan_out: self.fan_out,
        }
    }

    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.rate_limit_per_second.and_then(NonZeroU32::new)
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl SimulationConfig {
    pub fn options(&self) -> SimulationOptions {
        SimulationOptions {
            sign_verify: self.sign_verify,
            replace_recent_blockhash: self.replace_recent_blockhash,
            accounts_to_return: Vec::new(),
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from a TOML file layered with `TXLIFE__*` environment overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("TXLIFE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.tiers.is_empty() {
            return Err(LifecycleError::Configuration(
                "at least one tier is required".to_string(),
            ));
        }

        for tier in &self.tiers {
            if tier.name.trim().is_empty() || tier.url.trim().is_empty() {
                return Err(LifecycleError::Configuration(
                    "every tier needs a name and a url".to_string(),
                ));
            }
        }

        let mut names: Vec<&str> = self.tiers.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.tiers.len() {
            return Err(LifecycleError::Configuration(
                "tier names must be unique".to_string(),
            ));
        }

        if self.broadcast.max_attempts == 0 {
            return Err(LifecycleError::Configuration(
                "broadcast.max_attempts must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.broadcast.jitter_factor) {
            return Err(LifecycleError::Configuration(
                "broadcast.jitter_factor must be within [0, 1]".to_string(),
            ));
        }

        if self.broadcast.multiplier < 1.0 {
            return Err(LifecycleError::Configuration(
                "broadcast.multiplier must be >= 1".to_string(),
            ));
        }

        if self.confirmation.poll_interval_ms == 0 {
            return Err(LifecycleError::Configuration(
                "confirmation.poll_interval_ms must be positive".to_string(),
            ));
        }

        if self.simulation.sign_verify && self.simulation.replace_recent_blockhash {
            return Err(LifecycleError::Configuration(
                "simulation.sign_verify cannot be combined with replace_recent_blockhash".to_string(),
            ));
        }

        Ok(())
    }
}
