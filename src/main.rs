use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use solana_strategy_engine::audit::{AuditSink, FanoutAuditSink, TracingAuditSink};
use solana_strategy_engine::chain::SolanaRpc;
use solana_strategy_engine::config::Config;
use solana_strategy_engine::executor::{ExecutorSettings, SwapExecutor};
use solana_strategy_engine::jupiter::JupiterClient;
use solana_strategy_engine::keystore::EnvelopeKeyStore;
use solana_strategy_engine::monitoring;
use solana_strategy_engine::notifier::Notifier;
use solana_strategy_engine::scheduler::StrategyScheduler;
use solana_strategy_engine::store::PgStore;
use solana_strategy_engine::strategy::pair_trade::ExecutorWorkerResolver;
use solana_strategy_engine::strategy::HandlerContext;
use solana_strategy_engine::trigger_daemon::PairTradeTriggerDaemon;

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env if present (no-op in prod/systemd envs)
    let _ = dotenvy::dotenv();

    let cfg = Config::from_env()?;
    monitoring::init_tracing(cfg.log_json);

    info!(
        dry_run = cfg.dry_run,
        rpc = %cfg.rpc_http_url,
        jupiter = %cfg.jupiter_base_url,
        default_slippage_bps = cfg.default_slippage_bps,
        max_slippage_bps = cfg.max_slippage_bps,
        platform_fee = cfg.platform_fee_bps.is_some(),
        scheduler_secs = cfg.scheduler_interval.as_secs(),
        trigger_secs = cfg.trigger_check_interval.as_secs(),
        "boot"
    );

    let store = Arc::new(PgStore::connect(&cfg.database_url, cfg.db_max_connections).await?);
    let jupiter = Arc::new(JupiterClient::new(
        cfg.jupiter_base_url.clone(),
        cfg.jupiter_price_url.clone(),
    ));
    let rpc = Arc::new(SolanaRpc::new(cfg.rpc_http_url.clone(), cfg.confirm_timeout));
    let executor = Arc::new(SwapExecutor::new(
        jupiter.clone(),
        rpc.clone(),
        ExecutorSettings::from_config(&cfg),
    ));

    let audit = Arc::new(FanoutAuditSink::new(vec![
        store.clone() as Arc<dyn AuditSink>,
        Arc::new(TracingAuditSink),
    ]));
    let keys = Arc::new(EnvelopeKeyStore::new(cfg.app_secret.clone(), store.clone(), audit));
    let notifier = Arc::new(Notifier::new(cfg.slack_webhook_url.clone()));

    let ctx = HandlerContext {
        executor,
        chain: rpc.clone(),
        prices: jupiter,
        activity: rpc,
        strategies: store.clone(),
        trade_log: store.clone(),
    };

    let scheduler = Arc::new(StrategyScheduler::new(
        ctx.clone(),
        keys.clone(),
        notifier.clone(),
        cfg.scheduler_interval,
        cfg.strategy_interval,
    ));
    let mut daemon = PairTradeTriggerDaemon::new(
        store.clone(),
        store.clone(),
        notifier,
        cfg.trigger_check_interval,
    );
    daemon.set_worker_resolver(Arc::new(ExecutorWorkerResolver::new(ctx, keys)));
    let daemon = Arc::new(daemon);

    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });
    let daemon_task = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.start().await }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; finishing in-flight work");
    scheduler.stop();
    daemon.stop();

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "scheduler task panicked");
    }
    match daemon_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "trigger daemon exited with error"),
        Err(e) => error!(error = %e, "trigger daemon task panicked"),
    }
    info!("shutdown complete");
    Ok(())
}
