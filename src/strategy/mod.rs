pub mod mirror;
pub mod pair_trade;
pub mod price_levels;
pub mod price_trigger;
pub mod vault;

use chrono::{DateTime, Utc};
use serde_json::json;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chain::{ChainRpc, WalletActivity};
use crate::domain::{StrategyKind, TradingWallet, TransactionLog};
use crate::error::TradeError;
use crate::executor::{SwapExecutor, SwapResult, TradeRequest};
use crate::jupiter::PriceFeed;
use crate::keystore::{decode_keypair, EnvelopeKeyStore};
use crate::store::{StrategyStore, TradeLog};

/// Shared collaborators for every handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub executor: Arc<SwapExecutor>,
    pub chain: Arc<dyn ChainRpc>,
    pub prices: Arc<dyn PriceFeed>,
    pub activity: Arc<dyn WalletActivity>,
    pub strategies: Arc<dyn StrategyStore>,
    pub trade_log: Arc<dyn TradeLog>,
}

/// One unit of work. The keypair is borrowed for the unit only.
pub struct StrategyJob<'a> {
    pub strategy_id: i64,
    pub wallet: &'a TradingWallet,
    pub keypair: &'a Keypair,
    pub now: DateTime<Utc>,
}

impl HandlerContext {
    pub async fn swap(
        &self,
        job: &StrategyJob<'_>,
        input_mint: &str,
        output_mint: &str,
        amount: f64,
        slippage_bps: Option<u16>,
    ) -> Result<SwapResult, TradeError> {
        self.executor
            .execute_swap(TradeRequest {
                input_mint: input_mint.to_string(),
                output_mint: output_mint.to_string(),
                amount,
                slippage_bps,
                signer: job.keypair,
                platform_fee: None,
            })
            .await
    }

    /// Persists the updated config, then appends the trade row.
    pub async fn commit(
        &self,
        job: &StrategyJob<'_>,
        kind: &StrategyKind,
        result: &SwapResult,
    ) -> Result<(), TradeError> {
        self.strategies.update_config(job.strategy_id, kind).await?;
        self.log_trade(job, kind.type_name(), result).await
    }

    pub async fn log_trade(
        &self,
        job: &StrategyJob<'_>,
        type_name: &str,
        result: &SwapResult,
    ) -> Result<(), TradeError> {
        let entry = TransactionLog {
            signature: result.signature.clone(),
            trading_wallet_id: job.wallet.id,
            main_wallet: job.wallet.main_wallet.clone(),
            amount: result.input_amount_ui,
            token_mint: result.input_mint.clone(),
            timestamp: Utc::now(),
            details: json!({
                "strategyId": job.strategy_id,
                "type": type_name,
                "outputMint": result.output_mint,
                "outputAmount": result.output_amount_ui,
                "slippageBps": result.slippage_bps,
                "attempts": result.attempts.len(),
                "feeApplied": result.fee_applied,
                "message": result.message,
            }),
        };
        self.trade_log.append(&entry).await?;
        info!(
            strategy_id = job.strategy_id,
            kind = type_name,
            signature = %result.signature,
            "strategy.trade_logged"
        );
        Ok(())
    }
}

/// Loads the wallet and decrypts its signer. The plaintext key is dropped
/// before this returns; only the keypair leaves.
pub async fn load_signer(
    strategies: &dyn StrategyStore,
    keys: &EnvelopeKeyStore,
    wallet_id: i64,
) -> Result<(TradingWallet, Keypair), TradeError> {
    let wallet = strategies
        .trading_wallet(wallet_id)
        .await?
        .ok_or_else(|| TradeError::NotFound(format!("trading wallet {wallet_id}")))?;
    let keypair = {
        let secret = keys.get_wallet_private_key(wallet.id).await?;
        decode_keypair(&secret)?
    };
    if keypair.pubkey().to_string() != wallet.public_key {
        return Err(TradeError::Integrity(format!(
            "decrypted key does not match trading wallet {}",
            wallet.id
        )));
    }
    Ok((wallet, keypair))
}

/// Runs the handler for `kind`; returns the number of swaps that landed.
pub async fn dispatch(
    ctx: &HandlerContext,
    job: &StrategyJob<'_>,
    kind: StrategyKind,
) -> Result<usize, TradeError> {
    match kind {
        StrategyKind::MirrorWallet(mut cfg) => mirror::run(ctx, job, &mut cfg).await,
        StrategyKind::PriceTrigger(mut cfg) => price_trigger::run(ctx, job, &mut cfg).await,
        StrategyKind::VaultAllocation(cfg) => vault::run(ctx, job, &cfg).await,
        StrategyKind::PriceLevels(mut cfg) => price_levels::run(ctx, job, &mut cfg).await,
        // driven by the trigger daemon
        StrategyKind::PairTrade(_) => {
            debug!(strategy_id = job.strategy_id, "strategy.pair_trade_skipped");
            Ok(0)
        }
    }
}
