//! Pair-trade workers, driven by the trigger daemon rather than the scheduler.

use async_trait::async_trait;
use chrono::Utc;
use solana_sdk::signature::Signer;
use std::sync::Arc;
use tracing::{info, warn};

use super::{load_signer, HandlerContext, StrategyJob};
use crate::chain::parse_pubkey;
use crate::domain::{PairTradeConfig, StrategyKind, TriggerSource};
use crate::error::TradeError;
use crate::keystore::EnvelopeKeyStore;

#[derive(Debug, Clone, PartialEq)]
pub struct SwapOutcome {
    pub success: bool,
    pub signature: Option<String>,
    pub error: Option<String>,
}

impl SwapOutcome {
    pub fn landed(signature: String) -> Self {
        Self {
            success: true,
            signature: Some(signature),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            signature: None,
            error: Some(error.to_string()),
        }
    }
}

/// Executes one pair-trade strategy's side of a trigger.
#[async_trait]
pub trait PairTradeWorker: Send + Sync {
    async fn execute_swap(&self, source: &TriggerSource) -> SwapOutcome;
}

/// Maps a strategy id to the worker that trades for it.
#[async_trait]
pub trait WorkerResolver: Send + Sync {
    async fn resolve(&self, strategy_id: i64) -> Result<Arc<dyn PairTradeWorker>, TradeError>;
}

/// Resolves every strategy to an in-process worker backed by the swap executor.
pub struct ExecutorWorkerResolver {
    ctx: HandlerContext,
    keys: Arc<EnvelopeKeyStore>,
}

impl ExecutorWorkerResolver {
    pub fn new(ctx: HandlerContext, keys: Arc<EnvelopeKeyStore>) -> Self {
        Self { ctx, keys }
    }
}

#[async_trait]
impl WorkerResolver for ExecutorWorkerResolver {
    async fn resolve(&self, strategy_id: i64) -> Result<Arc<dyn PairTradeWorker>, TradeError> {
        Ok(Arc::new(ExecutorWorker {
            strategy_id,
            ctx: self.ctx.clone(),
            keys: self.keys.clone(),
        }))
    }
}

struct ExecutorWorker {
    strategy_id: i64,
    ctx: HandlerContext,
    keys: Arc<EnvelopeKeyStore>,
}

#[async_trait]
impl PairTradeWorker for ExecutorWorker {
    async fn execute_swap(&self, source: &TriggerSource) -> SwapOutcome {
        match self.swap(source).await {
            Ok(signature) => SwapOutcome::landed(signature),
            Err(e) => {
                warn!(
                    strategy_id = self.strategy_id,
                    trigger_id = source.trigger_id,
                    error = %e,
                    "pair_trade.swap_failed"
                );
                SwapOutcome::failed(e)
            }
        }
    }
}

impl ExecutorWorker {
    async fn swap(&self, source: &TriggerSource) -> Result<String, TradeError> {
        let strategy = self
            .ctx
            .strategies
            .strategy(self.strategy_id)
            .await?
            .ok_or_else(|| TradeError::NotFound(format!("strategy {}", self.strategy_id)))?;
        let StrategyKind::PairTrade(mut cfg) = strategy.kind else {
            return Err(TradeError::Validation(format!(
                "strategy {} is not a pair trade",
                self.strategy_id
            )));
        };
        if cfg.current_token != source.from_mint {
            return Err(TradeError::Validation(format!(
                "strategy {} holds {}, trigger sells {}",
                self.strategy_id, cfg.current_token, source.from_mint
            )));
        }
        if cfg.other_token() != source.to_mint {
            return Err(TradeError::Validation(format!(
                "strategy {} does not trade {}",
                self.strategy_id, source.to_mint
            )));
        }

        let (wallet, keypair) = load_signer(
            self.ctx.strategies.as_ref(),
            &self.keys,
            strategy.trading_wallet_id,
        )
        .await?;

        let job = StrategyJob {
            strategy_id: self.strategy_id,
            wallet: &wallet,
            keypair: &keypair,
            now: Utc::now(),
        };
        flip(&self.ctx, &job, &mut cfg, &source.to_mint).await
    }
}

/// Sells the held token for `to_mint` and records the new holding.
async fn flip(
    ctx: &HandlerContext,
    job: &StrategyJob<'_>,
    cfg: &mut PairTradeConfig,
    to_mint: &str,
) -> Result<String, TradeError> {
    let amount = if cfg.allocated_amount > 0.0 {
        cfg.allocated_amount
    } else {
        ctx.chain
            .token_balance(&job.keypair.pubkey(), &parse_pubkey(&cfg.current_token)?)
            .await?
    };
    if amount <= 0.0 {
        return Err(TradeError::Validation(format!("no {} balance to swap", cfg.current_token)));
    }

    let from_mint = cfg.current_token.clone();
    let result = ctx.swap(job, &from_mint, to_mint, amount, cfg.slippage_bps).await?;

    cfg.current_token = to_mint.to_string();
    cfg.allocated_amount = result.output_amount_ui;
    ctx.commit(job, &StrategyKind::PairTrade(cfg.clone()), &result).await?;
    info!(
        strategy_id = job.strategy_id,
        from = %from_mint,
        to = %to_mint,
        amount,
        received = result.output_amount_ui,
        signature = %result.signature,
        "pair_trade.flipped"
    );
    Ok(result.signature)
}
