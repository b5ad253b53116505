use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default delegation lock period in days.
pub const DEFAULT_LOCK_PERIOD_DAYS: i64 = 3;

/// Unique identifier for an order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn generate() -> Self {
        OrderId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        OrderId(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        OrderId(s.to_string())
    }
}

/// Unique identifier for a user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// On-chain transaction identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub String);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TxId {
    fn from(s: String) -> Self {
        TxId(s)
    }
}

impl From<&str> for TxId {
    fn from(s: &str) -> Self {
        TxId(s.to_string())
    }
}

/// Product type of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// One-shot rental sized for a single transaction
    EnergyFlash,
    /// Subscription-style quota of transactions, billed daily
    TransactionPackage,
    /// TRX exchange order
    TrxExchange,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::EnergyFlash => write!(f, "energy_flash"),
            OrderType::TransactionPackage => write!(f, "transaction_package"),
            OrderType::TrxExchange => write!(f, "trx_exchange"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "energy_flash" => Ok(OrderType::EnergyFlash),
            "transaction_package" => Ok(OrderType::TransactionPackage),
            "trx_exchange" => Ok(OrderType::TrxExchange),
            other => Err(format!("unknown order type: {}", other)),
        }
    }
}

/// Order state in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    PendingDelegation,
    Active,
    Completed,
    ManuallyCompleted,
    Failed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::ManuallyCompleted
                | OrderStatus::Failed
                | OrderStatus::Cancelled
                | OrderStatus::Expired
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Paid => write!(f, "paid"),
            OrderStatus::Processing => write!(f, "processing"),
            OrderStatus::PendingDelegation => write!(f, "pending_delegation"),
            OrderStatus::Active => write!(f, "active"),
            OrderStatus::Completed => write!(f, "completed"),
            OrderStatus::ManuallyCompleted => write!(f, "manually_completed"),
            OrderStatus::Failed => write!(f, "failed"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "processing" => Ok(OrderStatus::Processing),
            "pending_delegation" => Ok(OrderStatus::PendingDelegation),
            "active" => Ok(OrderStatus::Active),
            "completed" => Ok(OrderStatus::Completed),
            "manually_completed" => Ok(OrderStatus::ManuallyCompleted),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "expired" => Ok(OrderStatus::Expired),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Consumable on-chain resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Energy,
    Bandwidth,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Energy => write!(f, "ENERGY"),
            ResourceType::Bandwidth => write!(f, "BANDWIDTH"),
        }
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ENERGY" => Ok(ResourceType::Energy),
            "BANDWIDTH" => Ok(ResourceType::Bandwidth),
            other => Err(format!("unknown resource type: {}", other)),
        }
    }
}

/// Delegation confirmation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Confirmed,
    Failed,
}

impl fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegationStatus::Pending => write!(f, "pending"),
            DelegationStatus::Confirmed => write!(f, "confirmed"),
            DelegationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DelegationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DelegationStatus::Pending),
            "confirmed" => Ok(DelegationStatus::Confirmed),
            "failed" => Ok(DelegationStatus::Failed),
            other => Err(format!("unknown delegation status: {}", other)),
        }
    }
}

/// Order record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Resource amount requested (energy units for flash orders, staked SUN otherwise)
    pub resource_amount: i64,
    pub resource_type: ResourceType,
    /// Transaction quota for package orders; 0 otherwise
    pub transaction_count: i32,
    /// Transactions already consumed against the quota
    pub used_count: i32,
    pub receiver_address: String,
    /// Price in SUN
    pub price: i64,
    pub currency: String,
    pub lock_period_days: i64,
    pub delegation_id: Option<String>,
    pub payment_tx_hash: Option<TxId>,
    /// Package orders with this flag pay no daily fee
    pub no_daily_fee: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the order first becomes active; anchors fee and expiry clocks
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_package(&self) -> bool {
        self.order_type == OrderType::TransactionPackage
    }

    /// Remaining transaction quota for package orders.
    pub fn remaining_quota(&self) -> i32 {
        (self.transaction_count - self.used_count).max(0)
    }

    /// Whether the delegation lock period has elapsed since activation.
    pub fn lock_period_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.activated_at {
            Some(activated) => now - activated >= chrono::Duration::days(self.lock_period_days),
            None => false,
        }
    }
}

/// Resource delegation record, created by the orchestrator.
/// Never mutated after confirmation except for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateRecord {
    pub id: String,
    pub tx_hash: TxId,
    pub owner_address: String,
    pub receiver_address: String,
    pub resource_type: ResourceType,
    pub amount: i64,
    pub lock: bool,
    pub lock_period_days: i64,
    pub status: DelegationStatus,
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Freeze operation against the pool's own stake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeRecord {
    pub id: String,
    pub tx_hash: TxId,
    pub owner_address: String,
    pub resource_type: ResourceType,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Unfreeze operation; funds become withdrawable after `withdrawable_at`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnfreezeRecord {
    pub id: String,
    pub tx_hash: TxId,
    pub owner_address: String,
    pub resource_type: ResourceType,
    pub amount: i64,
    pub withdrawable_at: DateTime<Utc>,
    pub withdrawn: bool,
    pub created_at: DateTime<Utc>,
}

/// Observed on-chain resource consumption, keyed by transaction hash.
/// Append-only; produced exclusively by the usage monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyUsageLog {
    pub order_id: OrderId,
    pub address: String,
    pub amount: i64,
    pub tx_hash: TxId,
    pub observed_at: DateTime<Utc>,
}

/// Daily fee charge for a package order.
/// One record per order per billing day; uniqueness is the dedup guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeDeduction {
    pub order_id: OrderId,
    pub fee_day: NaiveDate,
    pub amount: i64,
    pub charged_at: DateTime<Utc>,
}

/// Audit trail entry for manual overrides and terminal transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub order_id: OrderId,
    pub actor: String,
    pub action: String,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// Fields that may change alongside a status update. Each caller sets only
/// the fields its operation is allowed to touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusExtra {
    pub delegation_id: Option<String>,
    pub payment_tx_hash: Option<TxId>,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Search filter for order listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub user_id: Option<UserId>,
    pub order_type: Option<OrderType>,
    pub status: Option<OrderStatus>,
    pub receiver_address: Option<String>,
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// TRON network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TronConfig {
    pub network: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Pool address that owns the delegable stake
    pub owner_address: String,
    pub request_timeout_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

/// Full application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub tron: TronConfig,
}

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Domain error taxonomy shared across the workspace
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Duplicate flash-rent order: receiver {0} already has an active delegation")]
    DuplicateFlashRent(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Transaction quota exhausted for order {0}")]
    QuotaExhausted(OrderId),

    #[error("Fee already charged for order {order_id} on {fee_day}")]
    FeeAlreadyCharged { order_id: OrderId, fee_day: NaiveDate },

    #[error("Insufficient delegable balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Chain rejected operation: {0}")]
    ChainRejected(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Expected business conflicts; mapped to HTTP 409 at the boundary.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::DuplicateFlashRent(_) | Error::FeeAlreadyCharged { .. }
        )
    }

    /// Transient infrastructure failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkError(_) | Error::Timeout(_))
    }
}
