//! Wire types for the TRON HTTP API.

use serde::{Deserialize, Serialize};

/// Outcome of a submitted write operation.
///
/// `success == false` means the chain rejected the operation (permanent);
/// transport-level failures surface as `TronError` instead and are
/// candidates for retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResult {
    pub success: bool,
    pub txid: Option<String>,
    pub error: Option<String>,
}

impl TxResult {
    pub fn ok(txid: String) -> Self {
        Self {
            success: true,
            txid: Some(txid),
            error: None,
        }
    }

    pub fn rejected(reason: String) -> Self {
        Self {
            success: false,
            txid: None,
            error: Some(reason),
        }
    }
}

/// Basic account state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    /// Liquid balance in SUN
    pub balance: i64,
}

/// Resource usage and limits for an account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountResource {
    pub energy_used: i64,
    pub energy_limit: i64,
    pub net_used: i64,
    pub net_limit: i64,
}

impl AccountResource {
    pub fn energy_available(&self) -> i64 {
        (self.energy_limit - self.energy_used).max(0)
    }
}

/// A confirmed transaction observed on an account, with the resources it
/// consumed. Used by the usage monitor to detect consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub tx_id: String,
    pub energy_usage: i64,
    pub net_usage: i64,
    /// Block timestamp in milliseconds
    pub timestamp_ms: i64,
}

/// Raw response for transaction-creating endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct RawTxResponse {
    #[serde(rename = "txID")]
    pub txid: Option<String>,
    pub result: Option<RawResult>,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawResult {
    pub result: Option<bool>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Raw response for `getaccount`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawAccount {
    pub address: Option<String>,
    #[serde(default)]
    pub balance: i64,
}

/// Raw response for `getaccountresource`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawAccountResource {
    #[serde(rename = "EnergyUsed", default)]
    pub energy_used: i64,
    #[serde(rename = "EnergyLimit", default)]
    pub energy_limit: i64,
    #[serde(rename = "NetUsed", default)]
    pub net_used: i64,
    #[serde(rename = "NetLimit", default)]
    pub net_limit: i64,
}

/// Raw response for `getcandelegatedmaxsize`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawMaxDelegatable {
    #[serde(default)]
    pub max_size: i64,
}

/// Raw response for the account transaction listing.
#[derive(Debug, Deserialize)]
pub(crate) struct RawTxPage {
    #[serde(default)]
    pub data: Vec<RawAccountTx>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAccountTx {
    #[serde(rename = "txID")]
    pub tx_id: String,
    #[serde(default)]
    pub energy_usage_total: i64,
    #[serde(default)]
    pub net_usage: i64,
    #[serde(default)]
    pub block_timestamp: i64,
}

impl From<RawAccountTx> for AccountTransaction {
    fn from(raw: RawAccountTx) -> Self {
        AccountTransaction {
            tx_id: raw.tx_id,
            energy_usage: raw.energy_usage_total,
            net_usage: raw.net_usage,
            timestamp_ms: raw.block_timestamp,
        }
    }
}
