use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{error, warn};

use super::{KeyRecordStore, StrategyStore, TradeLog, TriggerStore};
use crate::audit::{AuditRecord, AuditSink};
use crate::domain::{
    Direction, EncryptedWalletKey, Strategy, StrategyKind, TradingWallet, TransactionLog, Trigger,
};
use crate::error::TradeError;

const STRATEGY_COLUMNS: &str =
    "id, trading_wallet_id, type, config, is_active, last_executed, next_execution";

const TRIGGER_COLUMNS: &str = "id, token_a_mint, token_b_mint, token_a_symbol, token_b_symbol, \
     current_direction, trigger_swap, trigger_count, last_triggered_at";

#[derive(Debug, FromRow)]
struct StrategyRow {
    id: i64,
    trading_wallet_id: i64,
    #[sqlx(rename = "type")]
    strategy_type: String,
    config: serde_json::Value,
    is_active: bool,
    last_executed: Option<DateTime<Utc>>,
    next_execution: Option<DateTime<Utc>>,
}

impl StrategyRow {
    fn into_strategy(self) -> Result<Strategy, String> {
        let kind = StrategyKind::from_parts(&self.strategy_type, self.config)
            .map_err(|e| format!("type {}: {e}", self.strategy_type))?;
        Ok(Strategy {
            id: self.id,
            trading_wallet_id: self.trading_wallet_id,
            kind,
            is_active: self.is_active,
            last_executed: self.last_executed,
            next_execution: self.next_execution,
        })
    }
}

#[derive(Debug, FromRow)]
struct TriggerRow {
    id: i64,
    token_a_mint: String,
    token_b_mint: String,
    token_a_symbol: String,
    token_b_symbol: String,
    current_direction: String,
    trigger_swap: bool,
    trigger_count: i64,
    last_triggered_at: Option<DateTime<Utc>>,
}

impl TriggerRow {
    fn into_trigger(self) -> Result<Trigger, String> {
        let current_direction = Direction::parse(&self.current_direction)
            .ok_or_else(|| format!("unknown direction {}", self.current_direction))?;
        Ok(Trigger {
            id: self.id,
            token_a_mint: self.token_a_mint,
            token_b_mint: self.token_b_mint,
            token_a_symbol: self.token_a_symbol,
            token_b_symbol: self.token_b_symbol,
            current_direction,
            trigger_swap: self.trigger_swap,
            trigger_count: self.trigger_count,
            last_triggered_at: self.last_triggered_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct KeyRow {
    id: i64,
    trading_wallet_id: i64,
    owner_id: String,
    session_key_encrypted: String,
    wallet_keys_encrypted: String,
    version: i32,
    last_used: Option<DateTime<Utc>>,
    is_active: bool,
}

impl From<KeyRow> for EncryptedWalletKey {
    fn from(r: KeyRow) -> Self {
        Self {
            id: r.id,
            trading_wallet_id: r.trading_wallet_id,
            owner_id: r.owner_id,
            session_key_encrypted: r.session_key_encrypted,
            wallet_keys_encrypted: r.wallet_keys_encrypted,
            version: r.version,
            last_used: r.last_used,
            is_active: r.is_active,
        }
    }
}

/// Rows that fail to parse are logged and left out of the batch.
fn quarantine<R, T>(table: &str, rows: Vec<R>, parse: impl Fn(R) -> Result<T, String>) -> Vec<T>
where
    R: std::fmt::Debug,
{
    rows.into_iter()
        .filter_map(|row| {
            let summary = format!("{row:?}");
            match parse(row) {
                Ok(v) => Some(v),
                Err(reason) => {
                    warn!(table, %reason, row = %truncate(&summary, 200), "store.quarantined_row");
                    None
                }
            }
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TradeError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StrategyStore for PgStore {
    async fn due_strategies(&self, now: DateTime<Utc>) -> Result<Vec<Strategy>, TradeError> {
        let rows: Vec<StrategyRow> = sqlx::query_as(&format!(
            "SELECT {STRATEGY_COLUMNS} FROM strategies \
             WHERE is_active = TRUE AND (next_execution IS NULL OR next_execution <= $1) \
             ORDER BY id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(quarantine("strategies", rows, StrategyRow::into_strategy))
    }

    async fn strategy(&self, id: i64) -> Result<Option<Strategy>, TradeError> {
        let row: Option<StrategyRow> =
            sqlx::query_as(&format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            None => Ok(None),
            Some(row) => row
                .into_strategy()
                .map(Some)
                .map_err(|reason| TradeError::Validation(format!("strategy {id}: {reason}"))),
        }
    }

    async fn pair_strategies(
        &self,
        mint_a: &str,
        mint_b: &str,
    ) -> Result<Vec<Strategy>, TradeError> {
        let rows: Vec<StrategyRow> = sqlx::query_as(&format!(
            "SELECT {STRATEGY_COLUMNS} FROM strategies \
             WHERE is_active = TRUE AND type = 'pair-trade' \
               AND ((config->>'tokenAMint' = $1 AND config->>'tokenBMint' = $2) \
                 OR (config->>'tokenAMint' = $2 AND config->>'tokenBMint' = $1)) \
             ORDER BY id"
        ))
        .bind(mint_a)
        .bind(mint_b)
        .fetch_all(&self.pool)
        .await?;
        Ok(quarantine("strategies", rows, StrategyRow::into_strategy))
    }

    async fn trading_wallet(&self, id: i64) -> Result<Option<TradingWallet>, TradeError> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            "SELECT id, public_key, main_wallet_pubkey FROM trading_wallets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, public_key, main_wallet)| TradingWallet {
            id,
            public_key,
            main_wallet,
        }))
    }

    async fn update_config(&self, id: i64, kind: &StrategyKind) -> Result<(), TradeError> {
        let config = kind
            .config_json()
            .map_err(|e| TradeError::Validation(format!("strategy {id} config: {e}")))?;
        let res = sqlx::query("UPDATE strategies SET config = $2 WHERE id = $1 AND type = $3")
            .bind(id)
            .bind(config)
            .bind(kind.type_name())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(TradeError::NotFound(format!("strategy {id}")));
        }
        Ok(())
    }

    async fn mark_executed(
        &self,
        id: i64,
        executed_at: DateTime<Utc>,
        next_execution: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        sqlx::query(
            "UPDATE strategies SET last_executed = $2, \
             next_execution = GREATEST(COALESCE(next_execution, $3), $3) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(executed_at)
        .bind(next_execution)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyRecordStore for PgStore {
    async fn insert_active_key(
        &self,
        owner_id: &str,
        trading_wallet_id: i64,
        session_key_encrypted: &str,
        wallet_keys_encrypted: &str,
    ) -> Result<i64, TradeError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE encrypted_wallet_keys SET is_active = FALSE \
             WHERE trading_wallet_id = $1 AND is_active = TRUE",
        )
        .bind(trading_wallet_id)
        .execute(&mut *tx)
        .await?;
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO encrypted_wallet_keys \
             (trading_wallet_id, owner_id, session_key_encrypted, wallet_keys_encrypted, \
              version, is_active, created_at) \
             VALUES ($1, $2, $3, $4, 1, TRUE, NOW()) RETURNING id",
        )
        .bind(trading_wallet_id)
        .bind(owner_id)
        .bind(session_key_encrypted)
        .bind(wallet_keys_encrypted)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn active_key(
        &self,
        trading_wallet_id: i64,
    ) -> Result<Option<EncryptedWalletKey>, TradeError> {
        let row: Option<KeyRow> = sqlx::query_as(
            "SELECT id, trading_wallet_id, owner_id, session_key_encrypted, wallet_keys_encrypted, \
             version, last_used, is_active \
             FROM encrypted_wallet_keys WHERE trading_wallet_id = $1 AND is_active = TRUE",
        )
        .bind(trading_wallet_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EncryptedWalletKey::from))
    }

    async fn touch_key(&self, key_id: i64, at: DateTime<Utc>) -> Result<(), TradeError> {
        sqlx::query("UPDATE encrypted_wallet_keys SET last_used = $2 WHERE id = $1")
            .bind(key_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
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
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE encrypted_wallet_keys \
             SET session_key_encrypted = $3, wallet_keys_encrypted = $4, \
                 version = version + 1, last_used = $5 \
             WHERE id = $1 AND version = $2 AND is_active = TRUE \
             RETURNING version",
        )
        .bind(key_id)
        .bind(expected_version)
        .bind(session_key_encrypted)
        .bind(wallet_keys_encrypted)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(v,)| v).ok_or_else(|| {
            TradeError::NotFound(format!("active key {key_id} at version {expected_version}"))
        })
    }
}

#[async_trait]
impl TriggerStore for PgStore {
    async fn due_triggers(&self) -> Result<Vec<Trigger>, TradeError> {
        let rows: Vec<TriggerRow> = sqlx::query_as(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM pair_trade_triggers \
             WHERE trigger_swap = TRUE AND current_direction <> 'HOLD' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(quarantine("pair_trade_triggers", rows, TriggerRow::into_trigger))
    }

    async fn reset_trigger(&self, id: i64, at: DateTime<Utc>) -> Result<(), TradeError> {
        let res = sqlx::query(
            "UPDATE pair_trade_triggers \
             SET trigger_swap = FALSE, trigger_count = trigger_count + 1, last_triggered_at = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(TradeError::NotFound(format!("trigger {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TradeLog for PgStore {
    async fn append(&self, entry: &TransactionLog) -> Result<(), TradeError> {
        sqlx::query(
            "INSERT INTO transaction_logs \
             (signature, trading_wallet_id, main_wallet_pubkey, amount, token_mint, \
              timestamp, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&entry.signature)
        .bind(entry.trading_wallet_id)
        .bind(&entry.main_wallet)
        .bind(entry.amount)
        .bind(&entry.token_mint)
        .bind(entry.timestamp)
        .bind(&entry.details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn record(&self, record: AuditRecord) {
        let res = sqlx::query(
            "INSERT INTO key_audit_log \
             (operation_type, status, error_message, metadata, created_at) \
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(record.operation.as_str())
        .bind(record.status.as_str())
        .bind(record.error_message.as_deref())
        .bind(&record.metadata)
        .execute(&self.pool)
        .await;
        if let Err(e) = res {
            error!(operation = record.operation.as_str(), error = %e, "audit.write_failed");
        }
    }
}
