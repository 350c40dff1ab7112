use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{KeyRecordStore, StrategyStore, TradeLog, TriggerStore};
use crate::domain::{
    EncryptedWalletKey, Strategy, StrategyKind, TradingWallet, TransactionLog, Trigger,
};
use crate::error::TradeError;

#[derive(Default)]
struct Tables {
    strategies: HashMap<i64, Strategy>,
    wallets: HashMap<i64, TradingWallet>,
    keys: Vec<EncryptedWalletKey>,
    triggers: HashMap<i64, Trigger>,
    logs: Vec<TransactionLog>,
    next_key_id: i64,
}

/// In-process store with the same semantics as [`super::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_strategy(&self, strategy: Strategy) {
        self.tables.lock().await.strategies.insert(strategy.id, strategy);
    }

    pub async fn put_wallet(&self, wallet: TradingWallet) {
        self.tables.lock().await.wallets.insert(wallet.id, wallet);
    }

    pub async fn put_trigger(&self, trigger: Trigger) {
        self.tables.lock().await.triggers.insert(trigger.id, trigger);
    }

    pub async fn trigger(&self, id: i64) -> Option<Trigger> {
        self.tables.lock().await.triggers.get(&id).cloned()
    }

    pub async fn logs(&self) -> Vec<TransactionLog> {
        self.tables.lock().await.logs.clone()
    }

    /// Every key row for a wallet, active or not.
    pub async fn key_rows(&self, trading_wallet_id: i64) -> Vec<EncryptedWalletKey> {
        self.tables
            .lock()
            .await
            .keys
            .iter()
            .filter(|k| k.trading_wallet_id == trading_wallet_id)
            .cloned()
            .collect()
    }

    /// Overwrites the stored ciphertexts of the active row.
    #[cfg(test)]
    pub(crate) async fn tamper_active_key(
        &self,
        trading_wallet_id: i64,
        f: impl FnOnce(&mut EncryptedWalletKey),
    ) -> bool {
        let mut t = self.tables.lock().await;
        match t
            .keys
            .iter_mut()
            .find(|k| k.trading_wallet_id == trading_wallet_id && k.is_active)
        {
            Some(row) => {
                f(row);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StrategyStore for MemoryStore {
    async fn due_strategies(&self, now: DateTime<Utc>) -> Result<Vec<Strategy>, TradeError> {
        let t = self.tables.lock().await;
        let mut due: Vec<Strategy> =
            t.strategies.values().filter(|s| s.is_due(now)).cloned().collect();
        due.sort_by_key(|s| s.id);
        Ok(due)
    }

    async fn strategy(&self, id: i64) -> Result<Option<Strategy>, TradeError> {
        Ok(self.tables.lock().await.strategies.get(&id).cloned())
    }

    async fn pair_strategies(
        &self,
        mint_a: &str,
        mint_b: &str,
    ) -> Result<Vec<Strategy>, TradeError> {
        let t = self.tables.lock().await;
        let mut found: Vec<Strategy> = t
            .strategies
            .values()
            .filter(|s| s.is_active)
            .filter(|s| {
                matches!(&s.kind, StrategyKind::PairTrade(cfg) if cfg.matches_pair(mint_a, mint_b))
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }

    async fn trading_wallet(&self, id: i64) -> Result<Option<TradingWallet>, TradeError> {
        Ok(self.tables.lock().await.wallets.get(&id).cloned())
    }

    async fn update_config(&self, id: i64, kind: &StrategyKind) -> Result<(), TradeError> {
        let mut t = self.tables.lock().await;
        let strategy = t
            .strategies
            .get_mut(&id)
            .ok_or_else(|| TradeError::NotFound(format!("strategy {id}")))?;
        strategy.kind = kind.clone();
        Ok(())
    }

    async fn mark_executed(
        &self,
        id: i64,
        executed_at: DateTime<Utc>,
        next_execution: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        let mut t = self.tables.lock().await;
        let strategy = t
            .strategies
            .get_mut(&id)
            .ok_or_else(|| TradeError::NotFound(format!("strategy {id}")))?;
        strategy.last_executed = Some(executed_at);
        strategy.next_execution = Some(match strategy.next_execution {
            Some(current) if current > next_execution => current,
            _ => next_execution,
        });
        Ok(())
    }
}

#[async_trait]
impl KeyRecordStore for MemoryStore {
    async fn insert_active_key(
        &self,
        owner_id: &str,
        trading_wallet_id: i64,
        session_key_encrypted: &str,
        wallet_keys_encrypted: &str,
    ) -> Result<i64, TradeError> {
        let mut t = self.tables.lock().await;
        for row in t.keys.iter_mut().filter(|k| k.trading_wallet_id == trading_wallet_id) {
            row.is_active = false;
        }
        t.next_key_id += 1;
        let id = t.next_key_id;
        t.keys.push(EncryptedWalletKey {
            id,
            trading_wallet_id,
            owner_id: owner_id.to_string(),
            session_key_encrypted: session_key_encrypted.to_string(),
            wallet_keys_encrypted: wallet_keys_encrypted.to_string(),
            version: 1,
            last_used: None,
            is_active: true,
        });
        Ok(id)
    }

    async fn active_key(
        &self,
        trading_wallet_id: i64,
    ) -> Result<Option<EncryptedWalletKey>, TradeError> {
        let t = self.tables.lock().await;
        Ok(t.keys
            .iter()
            .find(|k| k.trading_wallet_id == trading_wallet_id && k.is_active)
            .cloned())
    }

    async fn touch_key(&self, key_id: i64, at: DateTime<Utc>) -> Result<(), TradeError> {
        let mut t = self.tables.lock().await;
        if let Some(row) = t.keys.iter_mut().find(|k| k.id == key_id) {
            row.last_used = Some(at);
        }
        Ok(())
    }

    async fn rotate_key(
        &self,
        key_id: i64,
        expected_version: i32,
        session_key_encrypted: &str,
        wallet_keys_encrypted: &str,
        at: DateTime<Utc>,
    ) -> Result<i32, TradeError> {
        let mut t = self.tables.lock().await;
        let row = t
            .keys
            .iter_mut()
            .find(|k| k.id == key_id && k.is_active && k.version == expected_version)
            .ok_or_else(|| {
                TradeError::NotFound(format!("active key {key_id} at version {expected_version}"))
            })?;
        row.session_key_encrypted = session_key_encrypted.to_string();
        row.wallet_keys_encrypted = wallet_keys_encrypted.to_string();
        row.version += 1;
        row.last_used = Some(at);
        Ok(row.version)
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn due_triggers(&self) -> Result<Vec<Trigger>, TradeError> {
        let t = self.tables.lock().await;
        let mut due: Vec<Trigger> = t.triggers.values().filter(|tr| tr.is_due()).cloned().collect();
        due.sort_by_key(|tr| tr.id);
        Ok(due)
    }

    async fn reset_trigger(&self, id: i64, at: DateTime<Utc>) -> Result<(), TradeError> {
        let mut t = self.tables.lock().await;
        let trigger = t
            .triggers
            .get_mut(&id)
            .ok_or_else(|| TradeError::NotFound(format!("trigger {id}")))?;
        trigger.trigger_swap = false;
        trigger.trigger_count += 1;
        trigger.last_triggered_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl TradeLog for MemoryStore {
    async fn append(&self, entry: &TransactionLog) -> Result<(), TradeError> {
        self.tables.lock().await.logs.push(entry.clone());
        Ok(())
    }
}
