use solana_sdk::signature::Signer;
use tracing::{debug, info, warn};

use super::{HandlerContext, StrategyJob};
use crate::chain::parse_pubkey;
use crate::domain::VaultAllocationConfig;
use crate::error::TradeError;

const PCT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Rebalance {
    pub mint: String,
    /// `true` sells `mint` into the base asset, `false` buys it.
    pub sell: bool,
    /// Human units of the asset being sold.
    pub amount: f64,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct Holding {
    pub mint: String,
    pub balance: f64,
    /// USD price per unit.
    pub price: f64,
}

pub fn validate(cfg: &VaultAllocationConfig) -> Result<(), TradeError> {
    if cfg.allocations.iter().any(|a| !(a.percentage >= 0.0)) {
        return Err(TradeError::Validation("allocation percentages must be non-negative".into()));
    }
    let total: f64 = cfg.allocations.iter().map(|a| a.percentage).sum();
    if total > 100.0 + PCT_EPSILON {
        return Err(TradeError::Validation(format!(
            "allocation percentages sum to {total}, above 100"
        )));
    }
    if !(cfg.rebalance_threshold_pct >= 0.0) {
        return Err(TradeError::Validation("rebalance threshold must be non-negative".into()));
    }
    Ok(())
}

/// Trades that bring each allocation back within the threshold: sells first, then buys.
/// Values are in base-asset units.
pub fn plan(
    cfg: &VaultAllocationConfig,
    holdings: &[Holding],
) -> Result<Vec<Rebalance>, TradeError> {
    let base_price = holdings
        .iter()
        .find(|h| h.mint == cfg.base_mint)
        .map(|h| h.price)
        .filter(|p| *p > 0.0)
        .ok_or_else(|| TradeError::NotFound(format!("no price for base asset {}", cfg.base_mint)))?;

    let value_of = |h: &Holding| h.balance * h.price / base_price;
    let total: f64 = holdings.iter().map(value_of).sum();
    if total <= 0.0 {
        return Ok(vec![]);
    }

    let mut sells = Vec::new();
    let mut buys = Vec::new();
    for alloc in cfg.allocations.iter().filter(|a| a.mint != cfg.base_mint) {
        let Some(holding) = holdings.iter().find(|h| h.mint == alloc.mint) else {
            continue;
        };
        let current_pct = value_of(holding) / total * 100.0;
        let drift = current_pct - alloc.percentage;
        if drift.abs() <= cfg.rebalance_threshold_pct {
            continue;
        }
        let value = drift.abs() / 100.0 * total;
        if value < cfg.min_trade_value {
            continue;
        }
        if drift > 0.0 {
            if holding.price <= 0.0 {
                continue;
            }
            sells.push(Rebalance {
                mint: alloc.mint.clone(),
                sell: true,
                amount: value * base_price / holding.price,
                value,
            });
        } else {
            buys.push(Rebalance {
                mint: alloc.mint.clone(),
                sell: false,
                amount: value,
                value,
            });
        }
    }
    sells.extend(buys);
    Ok(sells)
}

pub async fn run(
    ctx: &HandlerContext,
    job: &StrategyJob<'_>,
    cfg: &VaultAllocationConfig,
) -> Result<usize, TradeError> {
    validate(cfg)?;

    let mut mints = vec![cfg.base_mint.clone()];
    for alloc in &cfg.allocations {
        if !mints.contains(&alloc.mint) {
            mints.push(alloc.mint.clone());
        }
    }
    let prices = ctx.prices.prices(&mints).await?;
    let owner = job.keypair.pubkey();

    let mut holdings = Vec::with_capacity(mints.len());
    for mint in &mints {
        let Some(price) = prices.get(mint).copied() else {
            warn!(strategy_id = job.strategy_id, %mint, "strategy.vault.unpriced");
            continue;
        };
        let balance = ctx.chain.token_balance(&owner, &parse_pubkey(mint)?).await?;
        holdings.push(Holding {
            mint: mint.clone(),
            balance,
            price,
        });
    }

    let trades = plan(cfg, &holdings)?;
    if trades.is_empty() {
        debug!(strategy_id = job.strategy_id, "strategy.vault.balanced");
        return Ok(0);
    }

    let mut landed = 0;
    let mut first_error = None;
    for trade in trades {
        let (input, output) = if trade.sell {
            (trade.mint.as_str(), cfg.base_mint.as_str())
        } else {
            (cfg.base_mint.as_str(), trade.mint.as_str())
        };
        info!(
            strategy_id = job.strategy_id,
            mint = %trade.mint,
            sell = trade.sell,
            amount = trade.amount,
            value = trade.value,
            "strategy.vault.rebalance"
        );
        match ctx.swap(job, input, output, trade.amount, cfg.slippage_bps).await {
            Ok(result) => {
                ctx.log_trade(job, "vault-allocation", &result).await?;
                landed += 1;
            }
            Err(e) => {
                warn!(
                    strategy_id = job.strategy_id,
                    mint = %trade.mint,
                    error = %e,
                    "strategy.vault.swap_failed"
                );
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if landed == 0 => Err(e),
        _ => Ok(landed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allocation, NATIVE_MINT, USDC_MINT};
    use crate::strategy::fixtures::Harness;
    use chrono::Utc;
    use solana_sdk::pubkey::Pubkey;

    fn config(allocations: Vec<(&str, f64)>) -> VaultAllocationConfig {
        VaultAllocationConfig {
            base_mint: USDC_MINT.into(),
            allocations: allocations
                .into_iter()
                .map(|(mint, percentage)| Allocation { mint: mint.into(), percentage })
                .collect(),
            rebalance_threshold_pct: 5.0,
            min_trade_value: 10.0,
            slippage_bps: None,
        }
    }

    fn holding(mint: &str, balance: f64, price: f64) -> Holding {
        Holding { mint: mint.into(), balance, price }
    }

    #[test]
    fn rejects_allocations_over_100_percent() {
        let cfg = config(vec![("a", 60.0), ("b", 50.0)]);
        assert!(matches!(validate(&cfg), Err(TradeError::Validation(_))));
        assert!(validate(&config(vec![("a", 60.0), ("b", 40.0)])).is_ok());
    }

    #[test]
    fn sells_overweight_before_buying_underweight() {
        let other = Pubkey::new_unique().to_string();
        let cfg = config(vec![(other.as_str(), 50.0), (NATIVE_MINT, 50.0)]);
        // 1000 USDC total: 800 in `other`, 200 in SOL, nothing in base
        let holdings = vec![
            holding(USDC_MINT, 0.0, 1.0),
            holding(&other, 400.0, 2.0),
            holding(NATIVE_MINT, 2.0, 100.0),
        ];

        let trades = plan(&cfg, &holdings).unwrap();

        assert_eq!(trades.len(), 2);
        assert!(trades[0].sell);
        assert_eq!(trades[0].mint, other);
        assert!((trades[0].value - 300.0).abs() < 1e-9);
        assert!((trades[0].amount - 150.0).abs() < 1e-9);
        assert!(!trades[1].sell);
        assert_eq!(trades[1].mint, NATIVE_MINT);
        assert!((trades[1].amount - 300.0).abs() < 1e-9);
    }

    #[test]
    fn drift_within_threshold_or_below_minimum_is_ignored() {
        let cfg = config(vec![(NATIVE_MINT, 50.0)]);
        let holdings = vec![holding(USDC_MINT, 480.0, 1.0), holding(NATIVE_MINT, 5.2, 100.0)];
        assert!(plan(&cfg, &holdings).unwrap().is_empty());

        let mut small = config(vec![(NATIVE_MINT, 50.0)]);
        small.min_trade_value = 500.0;
        let holdings = vec![holding(USDC_MINT, 100.0, 1.0), holding(NATIVE_MINT, 9.0, 100.0)];
        assert!(plan(&small, &holdings).unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_swaps_against_live_balances() {
        let h = Harness::new();
        h.prices.set(USDC_MINT, 1.0).await;
        h.prices.set(NATIVE_MINT, 100.0).await;
        h.chain.set_token_balance(USDC_MINT, 1000.0).await;
        h.chain.set_token_balance(NATIVE_MINT, 0.0).await;
        let cfg = config(vec![(NATIVE_MINT, 50.0)]);

        let landed = run(&h.ctx, &h.job(5, Utc::now()), &cfg).await.unwrap();

        assert_eq!(landed, 1);
        let quote = &h.agg.quotes().await[0];
        assert_eq!(quote.input_mint, USDC_MINT);
        assert_eq!(quote.output_mint, NATIVE_MINT);
        assert_eq!(quote.amount, "500000000");
        assert_eq!(h.store.logs().await.len(), 1);
    }
}
