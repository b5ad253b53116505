//! TRON HTTP API client (TronGrid compatible).
//!
//! Provides async access to:
//! - Stake freezing and expired-unfreeze withdrawal
//! - Resource delegation and undelegation
//! - Account balance and resource queries
//! - Recent account transactions (for usage detection)
//!
//! Every write is submit-and-poll: the call broadcasts and returns a
//! transaction id immediately; confirmation is the caller's concern.

use crate::address;
use crate::types::{
    AccountInfo, AccountResource, AccountTransaction, RawAccount, RawAccountResource,
    RawMaxDelegatable, RawTxPage, RawTxResponse, TxResult,
};
use rental_types::{ResourceType, TronConfig};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// TRON network configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TronNetwork {
    Mainnet,
    Shasta,
    Nile,
}

impl TronNetwork {
    /// Parse from string (environment variable).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => TronNetwork::Mainnet,
            "nile" => TronNetwork::Nile,
            _ => TronNetwork::Shasta, // Default to the Shasta testnet
        }
    }

    /// Get the TronGrid API base URL.
    pub fn api_url(&self) -> &'static str {
        match self {
            TronNetwork::Mainnet => "https://api.trongrid.io",
            TronNetwork::Shasta => "https://api.shasta.trongrid.io",
            TronNetwork::Nile => "https://nile.trongrid.io",
        }
    }

    /// Get the block explorer URL.
    pub fn explorer_url(&self) -> &'static str {
        match self {
            TronNetwork::Mainnet => "https://tronscan.org/#",
            TronNetwork::Shasta => "https://shasta.tronscan.org/#",
            TronNetwork::Nile => "https://nile.tronscan.org/#",
        }
    }
}

/// Errors that can occur when talking to the TRON network.
///
/// Chain-level rejections do not appear here: they come back as
/// `TxResult { success: false, .. }` so callers can treat them as permanent.
#[derive(Debug, Error)]
pub enum TronError {
    #[error("API request failed: {0}")]
    ApiRequest(String),

    #[error("API request timed out: {0}")]
    Timeout(String),

    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    ParseResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl TronError {
    /// Transport and node-side failures are retryable; malformed requests
    /// and bad addresses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TronError::ApiRequest(_) | TronError::Timeout(_) => true,
            TronError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Async client for the TRON HTTP API.
pub struct TronClient {
    network: TronNetwork,
    api_base: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TronClient {
    /// Create a new TRON client against the network's public endpoint.
    pub fn new(network: TronNetwork) -> Result<Self, TronError> {
        Self::with_api_url(network, network.api_url().to_string(), None, 30)
    }

    /// Create a client from application configuration.
    pub fn from_config(config: &TronConfig) -> Result<Self, TronError> {
        let network = TronNetwork::parse(&config.network);
        let api_base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| network.api_url().to_string());
        Self::with_api_url(
            network,
            api_base,
            config.api_key.clone(),
            config.request_timeout_secs,
        )
    }

    /// Create a client with a custom API URL (for self-hosted nodes).
    pub fn with_api_url(
        network: TronNetwork,
        api_url: String,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, TronError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TronError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            network,
            api_base: api_url,
            api_key,
            client,
        })
    }

    /// Get the network this client is configured for.
    pub fn network(&self) -> TronNetwork {
        self.network
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        let mut req = self.client.post(&url);
        if let Some(key) = &self.api_key {
            req = req.header("TRON-PRO-API-KEY", key);
        }
        req
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header("TRON-PRO-API-KEY", key);
        }
        req
    }

    fn map_transport(e: reqwest::Error) -> TronError {
        if e.is_timeout() {
            TronError::Timeout(e.to_string())
        } else {
            TronError::ApiRequest(e.to_string())
        }
    }

    /// Submit a write operation and classify the outcome.
    async fn submit(&self, path: &str, body: serde_json::Value) -> Result<TxResult, TronError> {
        let response = self
            .post(path)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TronError::ApiError { status, body });
        }

        let raw: RawTxResponse = response
            .json()
            .await
            .map_err(|e| TronError::ParseResponse(e.to_string()))?;

        if let Some(txid) = raw.txid {
            return Ok(TxResult::ok(txid));
        }

        if let Some(err) = raw.error {
            return Ok(TxResult::rejected(err));
        }

        if let Some(result) = raw.result {
            if result.result != Some(true) {
                let code = result.code.unwrap_or_else(|| "UNKNOWN".to_string());
                let message = result
                    .message
                    .map(|m| decode_message(&m))
                    .unwrap_or_default();
                return Ok(TxResult::rejected(format!("{}: {}", code, message)));
            }
        }

        Err(TronError::ParseResponse(
            "response carried neither txID nor an error".to_string(),
        ))
    }

    fn require_valid(address: &str) -> Result<(), TronError> {
        if address::is_valid_address(address) {
            Ok(())
        } else {
            Err(TronError::InvalidAddress(address.to_string()))
        }
    }

    /// Freeze balance to generate delegable resources for the pool.
    pub async fn freeze_balance(
        &self,
        owner_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError> {
        Self::require_valid(owner_address)?;
        self.submit(
            "/wallet/freezebalancev2",
            json!({
                "owner_address": owner_address,
                "frozen_balance": amount,
                "resource": resource.to_string(),
                "visible": true,
            }),
        )
        .await
    }

    /// Delegate frozen resources to a receiver address.
    pub async fn delegate_resource(
        &self,
        owner_address: &str,
        receiver_address: &str,
        amount: i64,
        resource: ResourceType,
        lock: bool,
        lock_period_days: i64,
    ) -> Result<TxResult, TronError> {
        Self::require_valid(owner_address)?;
        Self::require_valid(receiver_address)?;
        // lock_period is expressed in blocks; one block every 3 seconds
        let lock_period = lock_period_days * 24 * 60 * 60 / 3;
        self.submit(
            "/wallet/delegateresource",
            json!({
                "owner_address": owner_address,
                "receiver_address": receiver_address,
                "balance": amount,
                "resource": resource.to_string(),
                "lock": lock,
                "lock_period": lock_period,
                "visible": true,
            }),
        )
        .await
    }

    /// Begin unstaking; funds enter the mandatory waiting period.
    pub async fn unfreeze_balance(
        &self,
        owner_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError> {
        Self::require_valid(owner_address)?;
        self.submit(
            "/wallet/unfreezebalancev2",
            json!({
                "owner_address": owner_address,
                "unfreeze_balance": amount,
                "resource": resource.to_string(),
                "visible": true,
            }),
        )
        .await
    }

    /// Revoke a previous delegation.
    pub async fn undelegate_resource(
        &self,
        owner_address: &str,
        receiver_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError> {
        Self::require_valid(owner_address)?;
        Self::require_valid(receiver_address)?;
        self.submit(
            "/wallet/undelegateresource",
            json!({
                "owner_address": owner_address,
                "receiver_address": receiver_address,
                "balance": amount,
                "resource": resource.to_string(),
                "visible": true,
            }),
        )
        .await
    }

    /// Withdraw unfrozen funds whose waiting period has expired.
    pub async fn withdraw_expired_unfreeze(
        &self,
        owner_address: &str,
    ) -> Result<TxResult, TronError> {
        Self::require_valid(owner_address)?;
        self.submit(
            "/wallet/withdrawexpireunfreeze",
            json!({
                "owner_address": owner_address,
                "visible": true,
            }),
        )
        .await
    }

    /// Get basic account state (balance).
    pub async fn get_account(&self, address: &str) -> Result<AccountInfo, TronError> {
        Self::require_valid(address)?;
        let response = self
            .post("/wallet/getaccount")
            .json(&json!({ "address": address, "visible": true }))
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TronError::ApiError { status, body });
        }

        let raw: RawAccount = response
            .json()
            .await
            .map_err(|e| TronError::ParseResponse(e.to_string()))?;

        Ok(AccountInfo {
            address: raw.address.unwrap_or_else(|| address.to_string()),
            balance: raw.balance,
        })
    }

    /// Get resource usage and limits for an account.
    pub async fn get_account_resource(&self, address: &str) -> Result<AccountResource, TronError> {
        Self::require_valid(address)?;
        let response = self
            .post("/wallet/getaccountresource")
            .json(&json!({ "address": address, "visible": true }))
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TronError::ApiError { status, body });
        }

        let raw: RawAccountResource = response
            .json()
            .await
            .map_err(|e| TronError::ParseResponse(e.to_string()))?;

        Ok(AccountResource {
            energy_used: raw.energy_used,
            energy_limit: raw.energy_limit,
            net_used: raw.net_used,
            net_limit: raw.net_limit,
        })
    }

    /// Maximum amount the owner can still delegate for the given resource.
    pub async fn get_can_delegate_max(
        &self,
        owner_address: &str,
        resource: ResourceType,
    ) -> Result<i64, TronError> {
        Self::require_valid(owner_address)?;
        let resource_code = match resource {
            ResourceType::Bandwidth => 0,
            ResourceType::Energy => 1,
        };
        let response = self
            .post("/wallet/getcandelegatedmaxsize")
            .json(&json!({
                "owner_address": owner_address,
                "type": resource_code,
                "visible": true,
            }))
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TronError::ApiError { status, body });
        }

        let raw: RawMaxDelegatable = response
            .json()
            .await
            .map_err(|e| TronError::ParseResponse(e.to_string()))?;

        Ok(raw.max_size)
    }

    /// Confirmed transactions on an account since `min_timestamp_ms`,
    /// newest first. Used by the usage monitor to detect consumption.
    pub async fn get_account_transactions(
        &self,
        address: &str,
        min_timestamp_ms: i64,
        limit: usize,
    ) -> Result<Vec<AccountTransaction>, TronError> {
        Self::require_valid(address)?;
        let path = format!(
            "/v1/accounts/{}/transactions?only_confirmed=true&min_timestamp={}&limit={}",
            address, min_timestamp_ms, limit
        );
        let response = self.get(&path).send().await.map_err(Self::map_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TronError::ApiError { status, body });
        }

        let raw: RawTxPage = response
            .json()
            .await
            .map_err(|e| TronError::ParseResponse(e.to_string()))?;

        Ok(raw.data.into_iter().map(Into::into).collect())
    }

    /// Get transaction URL for the block explorer.
    pub fn tx_url(&self, txid: &str) -> String {
        format!("{}/transaction/{}", self.network.explorer_url(), txid)
    }
}

/// Rejection messages come back hex-encoded; fall back to the raw string.
fn decode_message(message: &str) -> String {
    match hex::decode(message) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| message.to_string()),
        Err(_) => message.to_string(),
    }
}
