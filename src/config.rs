use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use crate::keystore::AppSecret;

/// Hard ceiling for slippage escalation (10%).
pub const SLIPPAGE_CAP_BPS: u16 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    // RPC / APIs
    pub rpc_http_url: String,
    pub jupiter_base_url: String,
    pub jupiter_price_url: String,

    // Persistence
    pub database_url: String,
    pub db_max_connections: u32,

    // Keys
    pub app_secret: AppSecret,

    // Alerts
    pub slack_webhook_url: Option<String>,

    // Execution
    pub dry_run: bool,
    pub default_slippage_bps: u16,
    pub max_slippage_bps: u16,
    pub fee_account: Option<String>,
    pub platform_fee_bps: Option<u16>,
    pub min_fee_reserve_lamports: u64,
    pub confirm_timeout: Duration,

    // Loops
    pub scheduler_interval: Duration,
    pub strategy_interval: Duration,
    pub trigger_check_interval: Duration,

    pub log_json: bool,
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|s| s.trim().to_lowercase()) {
        None => default,
        Some(v) if v.is_empty() => default,
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "y" || v == "on" => true,
        Some(v) if v == "0" || v == "false" || v == "no" || v == "n" || v == "off" => false,
        Some(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|x| x.trim().parse().ok())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rpc_http_url = std::env::var("SOLANA_RPC_URL")
            .or_else(|_| std::env::var("HELIUS_HTTP_URL"))
            .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string());
        let jupiter_base_url = std::env::var("JUPITER_BASE_URL")
            .unwrap_or_else(|_| "https://quote-api.jup.ag/v6".to_string());
        let jupiter_price_url = std::env::var("JUPITER_PRICE_URL")
            .unwrap_or_else(|_| "https://api.jup.ag/price/v2".to_string());

        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let db_max_connections = env_parse::<u32>("DB_MAX_CONNECTIONS").unwrap_or(5).max(1);

        let raw_secret = std::env::var("WALLET_ENCRYPTION_KEY")
            .context("WALLET_ENCRYPTION_KEY is required")?;
        let app_secret = AppSecret::from_hex(raw_secret.trim())?;

        let slack_webhook_url = env_opt("SLACK_WEBHOOK_URL");

        let dry_run = env_bool("DRY_RUN", true);
        let default_slippage_bps = env_parse::<u16>("DEFAULT_SLIPPAGE_BPS").unwrap_or(50);
        let max_slippage_bps = env_parse::<u16>("MAX_SLIPPAGE_BPS").unwrap_or(SLIPPAGE_CAP_BPS);
        if max_slippage_bps > SLIPPAGE_CAP_BPS {
            return Err(anyhow!("MAX_SLIPPAGE_BPS cannot exceed {SLIPPAGE_CAP_BPS}"));
        }
        if default_slippage_bps == 0 || default_slippage_bps > max_slippage_bps {
            return Err(anyhow!("DEFAULT_SLIPPAGE_BPS must be within 1..=MAX_SLIPPAGE_BPS"));
        }

        let fee_account = env_opt("FEE_ACCOUNT");
        let platform_fee_bps = env_parse::<u16>("PLATFORM_FEE_BPS");
        if platform_fee_bps.is_some() && fee_account.is_none() {
            return Err(anyhow!("PLATFORM_FEE_BPS requires FEE_ACCOUNT"));
        }
        let min_fee_reserve_lamports =
            env_parse::<u64>("MIN_FEE_RESERVE_LAMPORTS").unwrap_or(5_000_000);
        let confirm_timeout =
            Duration::from_secs(env_parse::<u64>("CONFIRM_TIMEOUT_SECS").unwrap_or(60).max(1));

        let scheduler_interval =
            Duration::from_secs(env_parse::<u64>("SCHEDULER_INTERVAL_SECS").unwrap_or(60).max(1));
        let strategy_interval =
            Duration::from_secs(env_parse::<u64>("STRATEGY_INTERVAL_SECS").unwrap_or(60).max(1));
        let trigger_check_interval = Duration::from_secs(
            env_parse::<u64>("TRIGGER_CHECK_INTERVAL_SECS").unwrap_or(5).max(1),
        );

        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            rpc_http_url,
            jupiter_base_url,
            jupiter_price_url,
            database_url,
            db_max_connections,
            app_secret,
            slack_webhook_url,
            dry_run,
            default_slippage_bps,
            max_slippage_bps,
            fee_account,
            platform_fee_bps,
            min_fee_reserve_lamports,
            confirm_timeout,
            scheduler_interval,
            strategy_interval,
            trigger_check_interval,
            log_json,
        })
    }
}
