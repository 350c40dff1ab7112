//! Fixed-interval strategy runner.
//!
//! Each cycle walks the due strategies one at a time. A unit that fails is
//! logged and alerted, then treated like a success for scheduling: its
//! `next_execution` moves one interval forward either way.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::domain::{Strategy, StrategyKind};
use crate::error::TradeError;
use crate::keystore::EnvelopeKeyStore;
use crate::notifier::Alerts;
use crate::strategy::{dispatch, load_signer, HandlerContext, StrategyJob};

#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub strategy_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub processed: usize,
    pub swaps: usize,
    pub failures: Vec<UnitFailure>,
}

pub struct StrategyScheduler {
    ctx: HandlerContext,
    keys: Arc<EnvelopeKeyStore>,
    alerts: Arc<dyn Alerts>,
    tick: Duration,
    reschedule_after: chrono::Duration,
    stopped: AtomicBool,
    wake: Notify,
}

impl StrategyScheduler {
    /// `tick` is the loop cadence; `reschedule_after` is added to `next_execution`
    /// after every unit.
    pub fn new(
        ctx: HandlerContext,
        keys: Arc<EnvelopeKeyStore>,
        alerts: Arc<dyn Alerts>,
        tick: Duration,
        reschedule_after: Duration,
    ) -> Self {
        Self {
            ctx,
            keys,
            alerts,
            tick,
            reschedule_after: chrono::Duration::from_std(reschedule_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub async fn run_once(&self) -> Result<CycleReport, TradeError> {
        let due = self.ctx.strategies.due_strategies(Utc::now()).await?;
        let mut report = CycleReport::default();

        for strategy in due {
            let id = strategy.id;
            let kind = strategy.kind.type_name();
            report.processed += 1;

            match self.run_unit(strategy).await {
                Ok(swaps) => report.swaps += swaps,
                Err(e) => {
                    error!(strategy_id = id, kind, error = %e, "scheduler.unit_failed");
                    self.alerts
                        .unit_failed(
                            "scheduler",
                            &format!("strategy {id} ({kind})"),
                            &e.to_string(),
                        )
                        .await;
                    report.failures.push(UnitFailure {
                        strategy_id: id,
                        error: e.to_string(),
                    });
                }
            }

            let finished = Utc::now();
            if let Err(e) = self
                .ctx
                .strategies
                .mark_executed(id, finished, finished + self.reschedule_after)
                .await
            {
                error!(strategy_id = id, error = %e, "scheduler.mark_executed_failed");
            }
        }

        Ok(report)
    }

    async fn run_unit(&self, strategy: Strategy) -> Result<usize, TradeError> {
        if matches!(strategy.kind, StrategyKind::PairTrade(_)) {
            // no key needed, nothing to do
            return Ok(0);
        }
        let (wallet, keypair) = load_signer(
            self.ctx.strategies.as_ref(),
            &self.keys,
            strategy.trading_wallet_id,
        )
        .await?;
        let job = StrategyJob {
            strategy_id: strategy.id,
            wallet: &wallet,
            keypair: &keypair,
            now: Utc::now(),
        };
        dispatch(&self.ctx, &job, strategy.kind).await
    }

    /// Runs cycles until [`stop`](Self::stop) is called. In-flight cycles finish first.
    pub async fn run(&self) {
        info!(tick_secs = self.tick.as_secs(), "scheduler.start");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => continue,
            }
            let started = Utc::now();
            match self.run_once().await {
                Ok(report) if report.failures.is_empty() => info!(
                    processed = report.processed,
                    swaps = report.swaps,
                    elapsed_ms = (Utc::now() - started).num_milliseconds(),
                    "scheduler.cycle"
                ),
                Ok(report) => warn!(
                    processed = report.processed,
                    swaps = report.swaps,
                    failed = report.failures.len(),
                    "scheduler.cycle"
                ),
                Err(e) => error!(error = %e, "scheduler.cycle_failed"),
            }
        }
        info!("scheduler.stopped");
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}
