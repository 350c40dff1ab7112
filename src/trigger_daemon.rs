//! Fast poller that fans a pair-trade trigger out to every strategy on the pair.
//!
//! A trigger observed as due is reset exactly once per pass, whatever the
//! individual swaps did. Failed swaps are not retried until the next trigger.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::domain::{StrategyKind, Trigger};
use crate::error::TradeError;
use crate::notifier::Alerts;
use crate::store::{StrategyStore, TriggerStore};
use crate::strategy::pair_trade::{SwapOutcome, WorkerResolver};

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct StrategySwap {
    pub strategy_id: i64,
    pub outcome: SwapOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerReport {
    pub trigger_id: i64,
    pub swaps: Vec<StrategySwap>,
    pub reset: bool,
}

pub struct PairTradeTriggerDaemon {
    triggers: Arc<dyn TriggerStore>,
    strategies: Arc<dyn StrategyStore>,
    alerts: Arc<dyn Alerts>,
    resolver: Option<Arc<dyn WorkerResolver>>,
    check_interval: watch::Sender<Duration>,
    stopped: AtomicBool,
    wake: Notify,
}

impl PairTradeTriggerDaemon {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        strategies: Arc<dyn StrategyStore>,
        alerts: Arc<dyn Alerts>,
        check_interval: Duration,
    ) -> Self {
        let (check_interval, _) = watch::channel(check_interval.max(MIN_CHECK_INTERVAL));
        Self {
            triggers,
            strategies,
            alerts,
            resolver: None,
            check_interval,
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn set_worker_resolver(&mut self, resolver: Arc<dyn WorkerResolver>) {
        self.resolver = Some(resolver);
    }

    /// Takes effect immediately: the running loop restarts its timer.
    pub fn set_check_interval(&self, interval: Duration) {
        self.check_interval.send_replace(interval.max(MIN_CHECK_INTERVAL));
    }

    pub fn check_interval(&self) -> Duration {
        *self.check_interval.borrow()
    }

    fn resolver(&self) -> Result<&Arc<dyn WorkerResolver>, TradeError> {
        self.resolver
            .as_ref()
            .ok_or_else(|| {
                TradeError::NotConfigured("pair-trade worker resolver is not set".into())
            })
    }

    pub async fn run_once(&self) -> Result<Vec<TriggerReport>, TradeError> {
        let due = self.triggers.due_triggers().await?;
        if due.is_empty() {
            return Ok(vec![]);
        }
        let resolver = self.resolver()?;

        let mut reports = Vec::with_capacity(due.len());
        for trigger in due.iter().filter(|t| t.is_due()) {
            reports.push(self.process(resolver.as_ref(), trigger).await);
        }
        Ok(reports)
    }

    async fn process(&self, resolver: &dyn WorkerResolver, trigger: &Trigger) -> TriggerReport {
        let mut report = TriggerReport {
            trigger_id: trigger.id,
            swaps: vec![],
            reset: false,
        };
        let Some(source) = trigger.source() else {
            return report;
        };

        let strategies = match self
            .strategies
            .pair_strategies(&trigger.token_a_mint, &trigger.token_b_mint)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                // left set, so the next pass sees it again
                error!(
                    trigger_id = trigger.id,
                    error = %e,
                    "trigger_daemon.strategy_lookup_failed"
                );
                return report;
            }
        };
        info!(
            trigger_id = trigger.id,
            direction = trigger.current_direction.as_str(),
            pair = %source.symbols,
            strategies = strategies.len(),
            "trigger_daemon.fired"
        );

        for strategy in strategies {
            let StrategyKind::PairTrade(cfg) = &strategy.kind else {
                continue;
            };
            if cfg.current_token != source.from_mint {
                debug!(
                    strategy_id = strategy.id,
                    holds = %cfg.current_token,
                    "trigger_daemon.already_positioned"
                );
                continue;
            }

            let outcome = match resolver.resolve(strategy.id).await {
                Ok(worker) => worker.execute_swap(&source).await,
                Err(e) => SwapOutcome::failed(e),
            };
            if outcome.success {
                info!(
                    trigger_id = trigger.id,
                    strategy_id = strategy.id,
                    signature = outcome.signature.as_deref().unwrap_or_default(),
                    "trigger_daemon.swap_ok"
                );
            } else {
                let err = outcome.error.clone().unwrap_or_default();
                warn!(
                    trigger_id = trigger.id,
                    strategy_id = strategy.id,
                    error = %err,
                    "trigger_daemon.swap_failed"
                );
                self.alerts
                    .unit_failed(
                        "trigger daemon",
                        &format!("strategy {} on {}", strategy.id, source.symbols),
                        &err,
                    )
                    .await;
            }
            report.swaps.push(StrategySwap {
                strategy_id: strategy.id,
                outcome,
            });
        }

        match self.triggers.reset_trigger(trigger.id, Utc::now()).await {
            Ok(()) => report.reset = true,
            Err(e) => error!(trigger_id = trigger.id, error = %e, "trigger_daemon.reset_failed"),
        }
        report
    }

    /// Polls until [`stop`](Self::stop). Fails fast when no resolver was injected.
    pub async fn start(&self) -> Result<(), TradeError> {
        self.resolver()?;
        let mut interval_rx = self.check_interval.subscribe();
        let mut ticker = new_ticker(*interval_rx.borrow_and_update());
        info!(interval_ms = self.check_interval().as_millis() as u64, "trigger_daemon.start");

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = interval_rx.changed() => {
                    if changed.is_ok() {
                        let every = *interval_rx.borrow_and_update();
                        ticker = new_ticker(every);
                        info!(
                            interval_ms = every.as_millis() as u64,
                            "trigger_daemon.interval_changed"
                        );
                    }
                    continue;
                }
                _ = self.wake.notified() => continue,
            }
            match self.run_once().await {
                Ok(reports) if !reports.is_empty() => {
                    let failed: usize = reports
                        .iter()
                        .map(|r| r.swaps.iter().filter(|s| !s.outcome.success).count())
                        .sum();
                    info!(triggers = reports.len(), failed, "trigger_daemon.pass");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "trigger_daemon.pass_failed"),
            }
        }
        info!("trigger_daemon.stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// First tick fires immediately.
fn new_ticker(every: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
