use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSMuhn9hoPEjUHLkCEaY4kw1Yg6bS9VMG";

/// Mirror-wallet signatures kept for de-duplication.
pub const MAX_PROCESSED_SIGNATURES: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub id: i64,
    pub trading_wallet_id: i64,
    pub kind: StrategyKind,
    pub is_active: bool,
    pub last_executed: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
}

impl Strategy {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_execution.map_or(true, |next| next <= now)
    }
}

/// Closed set of strategy types. Persisted as `type` + `config` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "kebab-case")]
pub enum StrategyKind {
    MirrorWallet(MirrorWalletConfig),
    PriceTrigger(PriceTriggerConfig),
    VaultAllocation(VaultAllocationConfig),
    PriceLevels(PriceLevelsConfig),
    PairTrade(PairTradeConfig),
}

impl StrategyKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StrategyKind::MirrorWallet(_) => "mirror-wallet",
            StrategyKind::PriceTrigger(_) => "price-trigger",
            StrategyKind::VaultAllocation(_) => "vault-allocation",
            StrategyKind::PriceLevels(_) => "price-levels",
            StrategyKind::PairTrade(_) => "pair-trade",
        }
    }

    /// Rebuilds the tagged value from the split `type` / `config` columns.
    pub fn from_parts(type_name: &str, config: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::json!({ "type": type_name, "config": config }))
    }

    pub fn config_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            StrategyKind::MirrorWallet(c) => serde_json::to_value(c),
            StrategyKind::PriceTrigger(c) => serde_json::to_value(c),
            StrategyKind::VaultAllocation(c) => serde_json::to_value(c),
            StrategyKind::PriceLevels(c) => serde_json::to_value(c),
            StrategyKind::PairTrade(c) => serde_json::to_value(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorWalletConfig {
    pub monitored_wallet: String,
    /// Share of the mirrored trade, in percent.
    pub percentage: f64,
    #[serde(default)]
    pub max_amount: Option<f64>,
    #[serde(default)]
    pub slippage_bps: Option<u16>,
    #[serde(default)]
    pub processed_signatures: Vec<String>,
    /// Set once the wallet's history has been recorded, even when it had none.
    #[serde(default)]
    pub seeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceCondition {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTriggerConfig {
    pub token_mint: String,
    #[serde(default = "default_quote_mint")]
    pub quote_mint: String,
    pub condition: PriceCondition,
    pub trigger_price: f64,
    pub action: TradeSide,
    /// Human units of the asset being sold (quote on buy, token on sell).
    pub amount: f64,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub slippage_bps: Option<u16>,
    #[serde(default)]
    pub last_trigger_price: Option<f64>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub mint: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultAllocationConfig {
    #[serde(default = "default_quote_mint")]
    pub base_mint: String,
    pub allocations: Vec<Allocation>,
    pub rebalance_threshold_pct: f64,
    /// Minimum trade value, in base-asset units.
    #[serde(default)]
    pub min_trade_value: f64,
    #[serde(default)]
    pub slippage_bps: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceLevel {
    pub price: f64,
    pub side: TradeSide,
    pub amount: f64,
    #[serde(default)]
    pub executed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceLevelsConfig {
    pub token_mint: String,
    #[serde(default = "default_quote_mint")]
    pub quote_mint: String,
    pub levels: Vec<PriceLevel>,
    #[serde(default)]
    pub slippage_bps: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairTradeConfig {
    pub token_a_mint: String,
    pub token_b_mint: String,
    /// Mint currently held by the strategy; always one of the pair.
    pub current_token: String,
    /// Human units of `current_token`; zero means the full wallet balance.
    #[serde(default)]
    pub allocated_amount: f64,
    #[serde(default)]
    pub slippage_bps: Option<u16>,
}

impl PairTradeConfig {
    pub fn matches_pair(&self, mint_a: &str, mint_b: &str) -> bool {
        (self.token_a_mint == mint_a && self.token_b_mint == mint_b)
            || (self.token_a_mint == mint_b && self.token_b_mint == mint_a)
    }

    pub fn other_token(&self) -> &str {
        if self.current_token == self.token_a_mint {
            &self.token_b_mint
        } else {
            &self.token_a_mint
        }
    }
}

fn default_quote_mint() -> String {
    USDC_MINT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingWallet {
    pub id: i64,
    pub public_key: String,
    pub main_wallet: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedWalletKey {
    pub id: i64,
    pub trading_wallet_id: i64,
    pub owner_id: String,
    pub session_key_encrypted: String,
    pub wallet_keys_encrypted: String,
    pub version: i32,
    pub last_used: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    AToB,
    BToA,
    Hold,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::AToB => "A_TO_B",
            Direction::BToA => "B_TO_A",
            Direction::Hold => "HOLD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "A_TO_B" => Some(Direction::AToB),
            "B_TO_A" => Some(Direction::BToA),
            "HOLD" => Some(Direction::Hold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub id: i64,
    pub token_a_mint: String,
    pub token_b_mint: String,
    pub token_a_symbol: String,
    pub token_b_symbol: String,
    pub current_direction: Direction,
    pub trigger_swap: bool,
    pub trigger_count: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn is_due(&self) -> bool {
        self.trigger_swap && self.current_direction != Direction::Hold
    }

    /// What gets sold for what when this trigger fires, `None` while holding.
    pub fn source(&self) -> Option<TriggerSource> {
        let (from, to, from_sym, to_sym) = match self.current_direction {
            Direction::AToB => (
                &self.token_a_mint,
                &self.token_b_mint,
                &self.token_a_symbol,
                &self.token_b_symbol,
            ),
            Direction::BToA => (
                &self.token_b_mint,
                &self.token_a_mint,
                &self.token_b_symbol,
                &self.token_a_symbol,
            ),
            Direction::Hold => return None,
        };
        Some(TriggerSource {
            trigger_id: self.id,
            direction: self.current_direction,
            from_mint: from.clone(),
            to_mint: to.clone(),
            symbols: format!("{from_sym}/{to_sym}"),
        })
    }
}

/// Context handed to a pair-trade worker when a trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSource {
    pub trigger_id: i64,
    pub direction: Direction,
    pub from_mint: String,
    pub to_mint: String,
    pub symbols: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionLog {
    pub signature: String,
    pub trading_wallet_id: i64,
    pub main_wallet: String,
    pub amount: f64,
    pub token_mint: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}
