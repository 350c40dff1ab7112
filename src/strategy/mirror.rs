use tracing::{info, warn};

use super::{HandlerContext, StrategyJob};
use crate::chain::parse_pubkey;
use crate::domain::{MirrorWalletConfig, StrategyKind, MAX_PROCESSED_SIGNATURES};
use crate::error::TradeError;

/// Copies unseen swaps of the monitored wallet, scaled by `percentage`.
pub async fn run(
    ctx: &HandlerContext,
    job: &StrategyJob<'_>,
    cfg: &mut MirrorWalletConfig,
) -> Result<usize, TradeError> {
    if !(cfg.percentage > 0.0 && cfg.percentage <= 100.0) {
        return Err(TradeError::Validation(format!(
            "mirror percentage must be in (0, 100], got {}",
            cfg.percentage
        )));
    }
    let monitored = parse_pubkey(&cfg.monitored_wallet)?;
    let recent = ctx.activity.recent_swaps(&monitored, MAX_PROCESSED_SIGNATURES).await?;

    // First look at the wallet: remember its history, trade nothing.
    if !cfg.seeded && cfg.processed_signatures.is_empty() {
        cfg.processed_signatures = recent.iter().map(|s| s.signature.clone()).collect();
        cfg.seeded = true;
        ctx.strategies
            .update_config(job.strategy_id, &StrategyKind::MirrorWallet(cfg.clone()))
            .await?;
        info!(
            strategy_id = job.strategy_id,
            signatures = cfg.processed_signatures.len(),
            "strategy.mirror.seeded"
        );
        return Ok(0);
    }

    let unseen: Vec<_> = recent
        .into_iter()
        .filter(|s| !cfg.processed_signatures.contains(&s.signature))
        .collect();
    if unseen.is_empty() {
        return Ok(0);
    }

    let mut landed = 0;
    let mut first_error = None;
    // oldest first, so the mirrored order matches the original
    for observed in unseen.into_iter().rev() {
        remember(cfg, &observed.signature);

        let mut amount = observed.input_amount * cfg.percentage / 100.0;
        if let Some(max) = cfg.max_amount {
            amount = amount.min(max);
        }
        if amount <= 0.0 {
            continue;
        }

        match ctx
            .swap(job, &observed.input_mint, &observed.output_mint, amount, cfg.slippage_bps)
            .await
        {
            Ok(result) => {
                ctx.commit(job, &StrategyKind::MirrorWallet(cfg.clone()), &result).await?;
                landed += 1;
            }
            Err(e) => {
                warn!(
                    strategy_id = job.strategy_id,
                    source_signature = %observed.signature,
                    error = %e,
                    "strategy.mirror.swap_failed"
                );
                first_error.get_or_insert(e);
            }
        }
    }

    // failed copies are not retried
    ctx.strategies
        .update_config(job.strategy_id, &StrategyKind::MirrorWallet(cfg.clone()))
        .await?;

    match first_error {
        Some(e) if landed == 0 => Err(e),
        _ => Ok(landed),
    }
}

/// Newest first, bounded.
fn remember(cfg: &mut MirrorWalletConfig, signature: &str) {
    cfg.processed_signatures.insert(0, signature.to_string());
    cfg.processed_signatures.truncate(MAX_PROCESSED_SIGNATURES);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ObservedSwap;
    use crate::domain::{NATIVE_MINT, USDC_MINT};
    use crate::strategy::fixtures::Harness;
    use chrono::Utc;
    use solana_sdk::pubkey::Pubkey;

    fn observed(sig: &str, amount: f64) -> ObservedSwap {
        ObservedSwap {
            signature: sig.into(),
            input_mint: NATIVE_MINT.into(),
            output_mint: USDC_MINT.into(),
            input_amount: amount,
            output_amount: amount * 150.0,
        }
    }

    fn config(processed: Vec<String>) -> MirrorWalletConfig {
        MirrorWalletConfig {
            monitored_wallet: Pubkey::new_unique().to_string(),
            percentage: 50.0,
            max_amount: Some(1.0),
            slippage_bps: None,
            processed_signatures: processed,
            seeded: false,
        }
    }

    #[tokio::test]
    async fn first_run_seeds_without_trading() {
        let h = Harness::new();
        h.activity.set(vec![observed("s2", 1.0), observed("s1", 1.0)]).await;
        let mut cfg = config(vec![]);
        h.put(1, StrategyKind::MirrorWallet(cfg.clone())).await;

        let landed = run(&h.ctx, &h.job(1, Utc::now()), &mut cfg).await.unwrap();

        assert_eq!(landed, 0);
        assert!(h.agg.quotes().await.is_empty());
        match h.kind(1).await {
            StrategyKind::MirrorWallet(c) => assert_eq!(c.processed_signatures, vec!["s2", "s1"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn fresh_wallet_first_swap_is_mirrored() {
        let h = Harness::new();
        let mut cfg = config(vec![]);
        h.put(1, StrategyKind::MirrorWallet(cfg.clone())).await;

        assert_eq!(run(&h.ctx, &h.job(1, Utc::now()), &mut cfg).await.unwrap(), 0);
        match h.kind(1).await {
            StrategyKind::MirrorWallet(c) => {
                assert!(c.seeded);
                assert!(c.processed_signatures.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        h.activity.set(vec![observed("first", 1.0)]).await;
        let landed = run(&h.ctx, &h.job(1, Utc::now()), &mut cfg).await.unwrap();

        assert_eq!(landed, 1);
        assert_eq!(h.agg.quotes().await.len(), 1);
        assert_eq!(cfg.processed_signatures, vec!["first"]);
    }

    #[tokio::test]
    async fn mirrors_unseen_swaps_scaled_and_capped() {
        let h = Harness::new();
        h.activity
            .set(vec![observed("new2", 4.0), observed("new1", 1.0), observed("old", 1.0)])
            .await;
        let mut cfg = config(vec!["old".into()]);
        h.put(1, StrategyKind::MirrorWallet(cfg.clone())).await;

        let landed = run(&h.ctx, &h.job(1, Utc::now()), &mut cfg).await.unwrap();

        assert_eq!(landed, 2);
        let amounts: Vec<String> = h.agg.quotes().await.into_iter().map(|q| q.amount).collect();
        // 50% of 1.0 SOL, then 50% of 4.0 capped at 1.0
        assert_eq!(amounts, vec!["500000000", "1000000000"]);
        assert_eq!(cfg.processed_signatures, vec!["new2", "new1", "old"]);
        assert_eq!(h.store.logs().await.len(), 2);
    }

    #[test]
    fn processed_list_is_bounded() {
        let mut cfg = config((0..MAX_PROCESSED_SIGNATURES).map(|i| format!("s{i}")).collect());
        remember(&mut cfg, "latest");
        assert_eq!(cfg.processed_signatures.len(), MAX_PROCESSED_SIGNATURES);
        assert_eq!(cfg.processed_signatures[0], "latest");
        assert!(!cfg.processed_signatures.contains(&format!("s{}", MAX_PROCESSED_SIGNATURES - 1)));
    }

    #[tokio::test]
    async fn rejects_out_of_range_percentage() {
        let h = Harness::new();
        let mut cfg = config(vec![]);
        cfg.percentage = 150.0;
        let err = run(&h.ctx, &h.job(1, Utc::now()), &mut cfg).await.unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }
}
