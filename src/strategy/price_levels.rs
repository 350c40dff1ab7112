use tracing::{info, warn};

use super::{HandlerContext, StrategyJob};
use crate::domain::{PriceLevelsConfig, StrategyKind, TradeSide};
use crate::error::TradeError;

/// Fires each unexecuted level the current price has crossed, at most once per level.
pub async fn run(
    ctx: &HandlerContext,
    job: &StrategyJob<'_>,
    cfg: &mut PriceLevelsConfig,
) -> Result<usize, TradeError> {
    if cfg.levels.iter().all(|l| l.executed) {
        return Ok(0);
    }
    let price = ctx.prices.price(&cfg.token_mint).await?;

    let mut landed = 0;
    let mut first_error = None;
    for idx in 0..cfg.levels.len() {
        let level = cfg.levels[idx].clone();
        if level.executed {
            continue;
        }
        let (crossed, input, output) = match level.side {
            TradeSide::Buy => (price <= level.price, &cfg.quote_mint, &cfg.token_mint),
            TradeSide::Sell => (price >= level.price, &cfg.token_mint, &cfg.quote_mint),
        };
        if !crossed {
            continue;
        }
        let (input, output) = (input.clone(), output.clone());

        info!(
            strategy_id = job.strategy_id,
            price,
            level = level.price,
            side = ?level.side,
            "strategy.price_levels.crossed"
        );
        match ctx.swap(job, &input, &output, level.amount, cfg.slippage_bps).await {
            Ok(result) => {
                cfg.levels[idx].executed = true;
                ctx.commit(job, &StrategyKind::PriceLevels(cfg.clone()), &result).await?;
                landed += 1;
            }
            Err(e) => {
                warn!(
                    strategy_id = job.strategy_id,
                    level = level.price,
                    error = %e,
                    "strategy.price_levels.swap_failed"
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
    use crate::domain::{PriceLevel, NATIVE_MINT, USDC_MINT};
    use crate::strategy::fixtures::Harness;
    use chrono::Utc;

    fn config() -> PriceLevelsConfig {
        PriceLevelsConfig {
            token_mint: NATIVE_MINT.into(),
            quote_mint: USDC_MINT.into(),
            levels: vec![
                PriceLevel { price: 120.0, side: TradeSide::Buy, amount: 100.0, executed: false },
                PriceLevel { price: 140.0, side: TradeSide::Buy, amount: 50.0, executed: false },
                PriceLevel { price: 180.0, side: TradeSide::Sell, amount: 1.0, executed: false },
            ],
            slippage_bps: None,
        }
    }

    #[tokio::test]
    async fn fires_crossed_levels_once() {
        let h = Harness::new();
        h.prices.set(NATIVE_MINT, 135.0).await;
        let mut cfg = config();
        h.put(4, StrategyKind::PriceLevels(cfg.clone())).await;
        let now = Utc::now();

        assert_eq!(run(&h.ctx, &h.job(4, now), &mut cfg).await.unwrap(), 1);
        let executed: Vec<bool> = cfg.levels.iter().map(|l| l.executed).collect();
        assert_eq!(executed, vec![false, true, false]);
        assert_eq!(h.agg.quotes().await[0].amount, "50000000");

        // same price again: nothing new
        assert_eq!(run(&h.ctx, &h.job(4, now), &mut cfg).await.unwrap(), 0);
        assert_eq!(h.agg.quotes().await.len(), 1);

        h.prices.set(NATIVE_MINT, 185.0).await;
        assert_eq!(run(&h.ctx, &h.job(4, now), &mut cfg).await.unwrap(), 1);
        let sell = &h.agg.quotes().await[1];
        assert_eq!(sell.input_mint, NATIVE_MINT);
        match h.kind(4).await {
            StrategyKind::PriceLevels(c) => assert!(c.levels[1].executed && c.levels[2].executed),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn fully_executed_ladder_skips_price_lookup() {
        let h = Harness::new();
        let mut cfg = config();
        cfg.levels.iter_mut().for_each(|l| l.executed = true);
        assert_eq!(run(&h.ctx, &h.job(4, Utc::now()), &mut cfg).await.unwrap(), 0);
    }
}
