//! Persistence seam. Business logic only sees these traits; rows are typed
//! before they cross it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    EncryptedWalletKey, Strategy, StrategyKind, TradingWallet, TransactionLog, Trigger,
};
use crate::error::TradeError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// Active strategies whose `next_execution` is unset or not after `now`.
    async fn due_strategies(&self, now: DateTime<Utc>) -> Result<Vec<Strategy>, TradeError>;

    async fn strategy(&self, id: i64) -> Result<Option<Strategy>, TradeError>;

    /// Active pair-trade strategies on the given pair, in either order.
    async fn pair_strategies(
        &self,
        mint_a: &str,
        mint_b: &str,
    ) -> Result<Vec<Strategy>, TradeError>;

    async fn trading_wallet(&self, id: i64) -> Result<Option<TradingWallet>, TradeError>;

    async fn update_config(&self, id: i64, kind: &StrategyKind) -> Result<(), TradeError>;

    /// Stamps `last_executed`; `next_execution` never moves backwards.
    async fn mark_executed(
        &self,
        id: i64,
        executed_at: DateTime<Utc>,
        next_execution: DateTime<Utc>,
    ) -> Result<(), TradeError>;
}

#[async_trait]
pub trait KeyRecordStore: Send + Sync {
    /// Replaces any active row for the wallet with a fresh version-1 row.
    async fn insert_active_key(
        &self,
        owner_id: &str,
        trading_wallet_id: i64,
        session_key_encrypted: &str,
        wallet_keys_encrypted: &str,
    ) -> Result<i64, TradeError>;

    async fn active_key(
        &self,
        trading_wallet_id: i64,
    ) -> Result<Option<EncryptedWalletKey>, TradeError>;

    async fn touch_key(&self, key_id: i64, at: DateTime<Utc>) -> Result<(), TradeError>;

    /// Rewrites both ciphertexts if the row is still at `expected_version`.
    async fn rotate_key(
        &self,
        key_id: i64,
        expected_version: i32,
        session_key_encrypted: &str,
        wallet_keys_encrypted: &str,
        at: DateTime<Utc>,
    ) -> Result<i32, TradeError>;
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Triggers flagged for a swap with a non-HOLD direction.
    async fn due_triggers(&self) -> Result<Vec<Trigger>, TradeError>;

    /// Clears `trigger_swap`, bumps `trigger_count`, stamps `last_triggered_at`.
    async fn reset_trigger(&self, id: i64, at: DateTime<Utc>) -> Result<(), TradeError>;
}

#[async_trait]
pub trait TradeLog: Send + Sync {
    async fn append(&self, entry: &TransactionLog) -> Result<(), TradeError>;
}
