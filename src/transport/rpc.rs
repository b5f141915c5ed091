//! JSON-RPC transport backed by the solana-client nonblocking `RpcClient`
//!
//! Anchors and heights use the typed client calls. Sends, status lookups and
//! simulations go through raw requests so the wire shape stays under our control.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use solana_client::{client_error::ClientError, nonblocking::rpc_client::RpcClient, rpc_request::RpcRequest};
use solana_sdk::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{LedgerQuery, SendOutcome, Transport};
use crate::errors::TransportError;
use crate::simulate::{AccountSnapshot, ReturnedAccount, SimulationOptions, SimulationResult};
use crate::types::{ConfirmationStatus, Durability, EnvelopeId, ExecutionError};

fn default_timeout_ms() -> u64 {
    10_000
}

/// Connection settings for one RPC tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcTransportConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RpcTransportConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

pub struct RpcTransport {
    name: String,
    client: Arc<RpcClient>,
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("name", &self.name)
            .field("url", &self.client.url())
            .finish()
    }
}

impl RpcTransport {
    pub fn new(config: &RpcTransportConfig) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            config.url.clone(),
            Duration::from_millis(config.timeout_ms),
            Durability::Confirmed.commitment(),
        );
        Self {
            name: config.name.clone(),
            client: Arc::new(client),
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    fn classify(&self, err: ClientError) -> TransportError {
        let message = err.to_string();
        // already-processed only matters for sends; elsewhere it is a plain rejection
        TransportError::classify(&self.name, &message)
            .unwrap_or_else(|| TransportError::rejected(&self.name, message))
    }

    fn malformed(&self, what: &str) -> TransportError {
        TransportError::transient(&self.name, format!("malformed {} response", what))
    }
}

#[async_trait]
impl Transport for RpcTransport {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, raw), fields(tier = %self.name, bytes = raw.len()))]
    async fn send(&self, raw: &[u8]) -> Result<SendOutcome, TransportError> {
        let params = json!([
            STANDARD.encode(raw),
            { "encoding": "base64", "skipPreflight": true }
        ]);

        match self.client.send::<Value>(RpcRequest::SendTransaction, params).await {
            Ok(signature) => {
                debug!(signature = %signature, "Transaction accepted");
                Ok(SendOutcome::Accepted)
            }
            Err(err) => match TransportError::classify(&self.name, &err.to_string()) {
                None => {
                    debug!("Transaction already known to tier");
                    Ok(SendOutcome::AlreadyKnown)
                }
                Some(classified) => {
                    warn!(error = %classified, "Send failed");
                    Err(classified)
                }
            },
        }
    }

    async fn block_height(&self, level: Durability) -> Result<u64, TransportError> {
        self.client
            .get_block_height_with_commitment(level.commitment())
            .await
            .map_err(|e| self.classify(e))
    }

    #[instrument(skip(self), fields(tier = %self.name, id = %id))]
    async fn signature_status(
        &self,
        id: &EnvelopeId,
    ) -> Result<Option<ConfirmationStatus>, TransportError> {
        let params = json!([
            [id.signature().to_string()],
            { "searchTransactionHistory": true }
        ]);
        let response = self
            .client
            .send::<Value>(RpcRequest::GetSignatureStatuses, params)
            .await
            .map_err(|e| self.classify(e))?;

        let entry = response
            .get("value")
            .and_then(Value::as_array)
            .and_then(|values| values.first())
            .ok_or_else(|| self.malformed("getSignatureStatuses"))?;

        parse_status(*id, entry).map_err(|_| self.malformed("getSignatureStatuses"))
    }
}

#[async_trait]
impl LedgerQuery for RpcTransport {
    async fn latest_blockhash(&self, level: Durability) -> Result<(Hash, u64), TransportError> {
        self.client
            .get_latest_blockhash_with_commitment(level.commitment())
            .await
            .map_err(|e| self.classify(e))
    }

    async fn current_height(&self, level: Durability) -> Result<u64, TransportError> {
        Transport::block_height(self, level).await
    }

    #[instrument(skip(self, raw, options), fields(tier = %self.name, bytes = raw.len()))]
    async fn simulate(
        &self,
        raw: &[u8],
        level: Durability,
        options: &SimulationOptions,
    ) -> Result<SimulationResult, TransportError> {
        let addresses: Vec<String> = options
            .accounts_to_return
            .iter()
            .map(|key| key.to_string())
            .collect();

        let mut config = json!({
            "encoding": "base64",
            "sigVerify": options.sign_verify,
            "replaceRecentBlockhash": options.replace_recent_blockhash,
            "commitment": level.as_str(),
        });
        if !addresses.is_empty() {
            config["accounts"] = json!({ "addresses": addresses, "encoding": "base64" });
        }

        let response = self
            .client
            .send::<Value>(RpcRequest::SimulateTransaction, json!([STANDARD.encode(raw), config]))
            .await
            .map_err(|e| self.classify(e))?;

        let value = response
            .get("value")
            .ok_or_else(|| self.malformed("simulateTransaction"))?;
        parse_simulation(value, options).map_err(|_| self.malformed("simulateTransaction"))
    }
}

#[derive(Debug)]
struct Malformed;

fn parse_status(id: EnvelopeId, entry: &Value) -> Result<Option<ConfirmationStatus>, Malformed> {
    if entry.is_null() {
        return Ok(None);
    }

    let slot = entry.get("slot").and_then(Value::as_u64).ok_or(Malformed)?;
    let level = match entry.get("confirmationStatus").and_then(Value::as_str) {
        Some(status) => status.parse::<Durability>().map_err(|_| Malformed)?,
        // older nodes: a null confirmation count means rooted
        None if entry.get("confirmations").is_some_and(Value::is_null) => Durability::Finalized,
        None => Durability::Processed,
    };
    let err = entry
        .get("err")
        .filter(|e| !e.is_null())
        .map(ExecutionError::from_json);

    Ok(Some(ConfirmationStatus {
        envelope_id: id,
        level,
        slot,
        err,
    }))
}

fn parse_simulation(value: &Value, options: &SimulationOptions) -> Result<SimulationResult, Malformed> {
    let logs = match value.get("logs") {
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| line.as_str().map(str::to_string).ok_or(Malformed))
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    let units_consumed = value.get("unitsConsumed").and_then(Value::as_u64);
    let err = value
        .get("err")
        .filter(|e| !e.is_null())
        .map(ExecutionError::from_json);

    let accounts = match value.get("accounts") {
        Some(Value::Array(accounts)) => accounts.as_slice(),
        _ => &[][..],
    };
    let returned_accounts = options
        .accounts_to_return
        .iter()
        .zip(accounts.iter().map(Some).chain(std::iter::repeat(None)))
        .map(|(address, account)| -> Result<ReturnedAccount, Malformed> {
            let state = match account {
                Some(account) if !account.is_null() => Some(parse_account(account)?),
                _ => None,
            };
            Ok(ReturnedAccount {
                address: *address,
                state,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SimulationResult {
        logs,
        units_consumed,
        returned_accounts,
        err,
    })
}

fn parse_account(account: &Value) -> Result<AccountSnapshot, Malformed> {
    let lamports = account.get("lamports").and_then(Value::as_u64).ok_or(Malformed)?;
    let owner = account
        .get("owner")
        .and_then(Value::as_str)
        .ok_or(Malformed)?
        .to_string();
    let executable = account
        .get("executable")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // ["<base64>", "base64"]
    let data = match account.get("data") {
        Some(Value::Array(parts)) => {
            let encoded = parts.first().and_then(Value::as_str).ok_or(Malformed)?;
            STANDARD.decode(encoded).map_err(|_| Malformed)?
        }
        _ => Vec::new(),
    };

    Ok(AccountSnapshot {
        lamports,
        owner,
        data,
        executable,
    })
}
