//! TRON integration for the energy rental engine.
//!
//! This crate provides:
//! - TRON HTTP API client (TronGrid-compatible)
//! - Stake freeze / delegate / undelegate / withdraw operations
//! - Account balance, resource and transaction queries
//! - Pure base58check address validation
//!
//! Writes are submit-and-poll: the client broadcasts and returns a
//! transaction id; the orchestrator owns confirmation and retry policy.

pub mod address;
pub mod client;
pub mod types;

use async_trait::async_trait;
use rental_types::ResourceType;

pub use address::{decode_address, is_valid_address, AddressError};
pub use client::{TronClient, TronError, TronNetwork};
pub use types::{AccountInfo, AccountResource, AccountTransaction, TxResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The chain-facing seam the engine is built against.
///
/// `TronClient` is the production implementation; tests use in-memory
/// fakes. All writes return `TxResult` (chain rejection is a permanent,
/// in-band outcome) and transport failures surface as `TronError`.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn freeze(
        &self,
        owner_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError>;

    async fn unfreeze(
        &self,
        owner_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError>;

    async fn delegate(
        &self,
        owner_address: &str,
        receiver_address: &str,
        amount: i64,
        resource: ResourceType,
        lock: bool,
        lock_period_days: i64,
    ) -> Result<TxResult, TronError>;

    async fn undelegate(
        &self,
        owner_address: &str,
        receiver_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError>;

    async fn withdraw_expired_unfreeze(&self, owner_address: &str)
        -> Result<TxResult, TronError>;

    async fn get_account(&self, address: &str) -> Result<AccountInfo, TronError>;

    async fn get_account_resource(&self, address: &str) -> Result<AccountResource, TronError>;

    /// Maximum amount the owner can still delegate for the given resource.
    async fn delegable_balance(
        &self,
        owner_address: &str,
        resource: ResourceType,
    ) -> Result<i64, TronError>;

    /// Confirmed transactions on an account since `min_timestamp_ms`.
    async fn account_transactions(
        &self,
        address: &str,
        min_timestamp_ms: i64,
        limit: usize,
    ) -> Result<Vec<AccountTransaction>, TronError>;

    /// Pure format check; no RPC round-trip.
    fn is_valid_address(&self, address: &str) -> bool;
}

#[async_trait]
impl ResourceClient for TronClient {
    async fn freeze(
        &self,
        owner_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError> {
        self.freeze_balance(owner_address, amount, resource).await
    }

    async fn unfreeze(
        &self,
        owner_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError> {
        self.unfreeze_balance(owner_address, amount, resource).await
    }

    async fn delegate(
        &self,
        owner_address: &str,
        receiver_address: &str,
        amount: i64,
        resource: ResourceType,
        lock: bool,
        lock_period_days: i64,
    ) -> Result<TxResult, TronError> {
        self.delegate_resource(
            owner_address,
            receiver_address,
            amount,
            resource,
            lock,
            lock_period_days,
        )
        .await
    }

    async fn undelegate(
        &self,
        owner_address: &str,
        receiver_address: &str,
        amount: i64,
        resource: ResourceType,
    ) -> Result<TxResult, TronError> {
        self.undelegate_resource(owner_address, receiver_address, amount, resource)
            .await
    }

    async fn withdraw_expired_unfreeze(
        &self,
        owner_address: &str,
    ) -> Result<TxResult, TronError> {
        TronClient::withdraw_expired_unfreeze(self, owner_address).await
    }

    async fn get_account(&self, address: &str) -> Result<AccountInfo, TronError> {
        TronClient::get_account(self, address).await
    }

    async fn get_account_resource(&self, address: &str) -> Result<AccountResource, TronError> {
        TronClient::get_account_resource(self, address).await
    }

    async fn delegable_balance(
        &self,
        owner_address: &str,
        resource: ResourceType,
    ) -> Result<i64, TronError> {
        self.get_can_delegate_max(owner_address, resource).await
    }

    async fn account_transactions(
        &self,
        address: &str,
        min_timestamp_ms: i64,
        limit: usize,
    ) -> Result<Vec<AccountTransaction>, TronError> {
        self.get_account_transactions(address, min_timestamp_ms, limit)
            .await
    }

    fn is_valid_address(&self, address: &str) -> bool {
        address::is_valid_address(address)
    }
}
