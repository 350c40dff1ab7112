use chrono::Duration;
use tracing::{debug, info};

use super::{HandlerContext, StrategyJob};
use crate::domain::{PriceCondition, PriceTriggerConfig, StrategyKind, TradeSide};
use crate::error::TradeError;

pub async fn run(
    ctx: &HandlerContext,
    job: &StrategyJob<'_>,
    cfg: &mut PriceTriggerConfig,
) -> Result<usize, TradeError> {
    let price = ctx.prices.price(&cfg.token_mint).await?;
    let hit = match cfg.condition {
        PriceCondition::Above => price >= cfg.trigger_price,
        PriceCondition::Below => price <= cfg.trigger_price,
    };
    if !hit {
        debug!(
            strategy_id = job.strategy_id,
            price,
            trigger = cfg.trigger_price,
            "strategy.price_trigger.idle"
        );
        return Ok(0);
    }
    if let Some(last) = cfg.last_triggered_at {
        let cooldown = Duration::seconds(cfg.cooldown_secs.min(u32::MAX as u64) as i64);
        if job.now < last + cooldown {
            debug!(strategy_id = job.strategy_id, %last, "strategy.price_trigger.cooling_down");
            return Ok(0);
        }
    }

    let (input, output) = match cfg.action {
        TradeSide::Buy => (cfg.quote_mint.clone(), cfg.token_mint.clone()),
        TradeSide::Sell => (cfg.token_mint.clone(), cfg.quote_mint.clone()),
    };
    info!(
        strategy_id = job.strategy_id,
        price,
        trigger = cfg.trigger_price,
        action = ?cfg.action,
        "strategy.price_trigger.fired"
    );
    let result = ctx.swap(job, &input, &output, cfg.amount, cfg.slippage_bps).await?;

    cfg.last_trigger_price = Some(price);
    cfg.last_triggered_at = Some(job.now);
    ctx.commit(job, &StrategyKind::PriceTrigger(cfg.clone()), &result).await?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NATIVE_MINT, USDC_MINT};
    use crate::strategy::fixtures::Harness;
    use chrono::Utc;

    fn config(condition: PriceCondition, action: TradeSide) -> PriceTriggerConfig {
        PriceTriggerConfig {
            token_mint: NATIVE_MINT.into(),
            quote_mint: USDC_MINT.into(),
            condition,
            trigger_price: 150.0,
            action,
            amount: 2.0,
            cooldown_secs: 3600,
            slippage_bps: Some(100),
            last_trigger_price: None,
            last_triggered_at: None,
        }
    }

    #[tokio::test]
    async fn sells_when_price_rises_above_trigger() {
        let h = Harness::new();
        h.prices.set(NATIVE_MINT, 151.0).await;
        let mut cfg = config(PriceCondition::Above, TradeSide::Sell);
        h.put(3, StrategyKind::PriceTrigger(cfg.clone())).await;
        let now = Utc::now();

        assert_eq!(run(&h.ctx, &h.job(3, now), &mut cfg).await.unwrap(), 1);

        let quotes = h.agg.quotes().await;
        assert_eq!(quotes[0].input_mint, NATIVE_MINT);
        assert_eq!(quotes[0].output_mint, USDC_MINT);
        assert_eq!(quotes[0].slippage_bps, 100);
        match h.kind(3).await {
            StrategyKind::PriceTrigger(c) => {
                assert_eq!(c.last_trigger_price, Some(151.0));
                assert_eq!(c.last_triggered_at, Some(now));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.store.logs().await.len(), 1);
    }

    #[tokio::test]
    async fn condition_not_met_is_a_no_op() {
        let h = Harness::new();
        h.prices.set(NATIVE_MINT, 140.0).await;
        let mut cfg = config(PriceCondition::Above, TradeSide::Sell);

        assert_eq!(run(&h.ctx, &h.job(3, Utc::now()), &mut cfg).await.unwrap(), 0);
        assert!(h.agg.quotes().await.is_empty());
    }

    #[tokio::test]
    async fn cooldown_suppresses_refire() {
        let h = Harness::new();
        h.prices.set(NATIVE_MINT, 120.0).await;
        let now = Utc::now();
        let mut cfg = config(PriceCondition::Below, TradeSide::Buy);
        cfg.last_triggered_at = Some(now - Duration::minutes(10));

        assert_eq!(run(&h.ctx, &h.job(3, now), &mut cfg).await.unwrap(), 0);

        cfg.last_triggered_at = Some(now - Duration::hours(2));
        h.put(3, StrategyKind::PriceTrigger(cfg.clone())).await;
        assert_eq!(run(&h.ctx, &h.job(3, now), &mut cfg).await.unwrap(), 1);
        let quotes = h.agg.quotes().await;
        assert_eq!(quotes[0].input_mint, USDC_MINT);
        assert_eq!(quotes[0].amount, "2000000");
    }

    #[tokio::test]
    async fn missing_price_is_not_found() {
        let h = Harness::new();
        let mut cfg = config(PriceCondition::Above, TradeSide::Sell);
        let err = run(&h.ctx, &h.job(3, Utc::now()), &mut cfg).await.unwrap_err();
        assert!(matches!(err, TradeError::NotFound(_)));
    }
}
