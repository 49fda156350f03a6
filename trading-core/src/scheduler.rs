//! The Scheduler: a single cooperative loop over every active strategy
//! (spec §5). One pass visits every strategy sequentially — this alone
//! gives the per-strategy serialization spec §5 requires, since no two
//! ticks ever run concurrently — sleeps for the configured cadence, and
//! repeats until shutdown.
//!
//! Grounded on `resilience/kill_switch.rs`'s `KillSwitch` (atomic state +
//! `ctrlc::set_handler`) for the shutdown-signal shape, simplified to a
//! single `Running`/`ShuttingDown` `AtomicBool` since this engine has none
//! of the teacher's SIGUSR1/SIGUSR2 pause/resume states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::engine::StrategyEngine;
use crate::errors::PersistenceError;
use crate::health::HealthMonitor;
use crate::notify::NotificationSink;
use crate::persistence::StrategyStore;

/// Minimum gap between two risk-denial notifications for the same strategy
/// (spec §4.6: "a notification is sent only if ≥20 minutes have elapsed
/// since the previous denial notification for this strategy").
fn denial_notification_cooldown() -> ChronoDuration {
    ChronoDuration::minutes(20)
}

/// Shared shutdown flag, flippable from a synchronous `ctrlc` handler and
/// observed by the async loop via a `Notify` so a long sleep is interrupted
/// immediately rather than on its next tick boundary.
#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Installs a process-wide `ctrlc` handler that triggers this signal.
    /// Should be called once, from the binary's `main`.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            warn!("received shutdown signal, finishing in-flight strategy before exit");
            signal.trigger();
        })
    }

    async fn sleep_or_shutdown(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.notify.notified() => {}
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Scheduler {
    store: Arc<StrategyStore>,
    engine: Arc<StrategyEngine>,
    health_monitor: Arc<HealthMonitor>,
    notifier: Arc<dyn NotificationSink>,
    interval: Duration,
    shutdown: ShutdownSignal,
    /// Per-strategy last risk-denial notification time (spec §4.6), mirrors
    /// `HealthMonitor::last_checked`'s throttle pattern.
    last_denial_notified_at: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<StrategyStore>,
        engine: Arc<StrategyEngine>,
        health_monitor: Arc<HealthMonitor>,
        notifier: Arc<dyn NotificationSink>,
        interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            engine,
            health_monitor,
            notifier,
            interval,
            shutdown,
            last_denial_notified_at: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` and records `now` if a denial notification for
    /// `strategy_id` hasn't fired within the cooldown window.
    fn should_notify_denial(&self, strategy_id: &str) -> bool {
        let now = Utc::now();
        let mut last = self
            .last_denial_notified_at
            .lock()
            .expect("scheduler mutex poisoned");
        if let Some(prev) = last.get(strategy_id) {
            if now - *prev < denial_notification_cooldown() {
                return false;
            }
        }
        last.insert(strategy_id.to_string(), now);
        true
    }

    /// Runs until `shutdown` is triggered. Every pass reloads
    /// `strategies.json` fresh, so strategies added/deactivated between
    /// passes take effect without a restart (spec §5).
    pub async fn run(&self) -> Result<(), PersistenceError> {
        info!(interval_secs = self.interval.as_secs(), "scheduler starting");
        while !self.shutdown.requested() {
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "scheduler pass failed to load strategies, retrying next interval");
            }
            if self.shutdown.requested() {
                break;
            }
            self.shutdown.sleep_or_shutdown(self.interval).await;
        }
        info!("scheduler shut down");
        Ok(())
    }

    async fn run_once(&self) -> Result<(), PersistenceError> {
        let strategies = self.store.load_strategies()?;
        for strategy in strategies.iter().filter(|s| s.active) {
            if self.shutdown.requested() {
                break;
            }
            match self.engine.process_strategy(strategy).await {
                Ok(outcome) => {
                    if outcome.risk_denied && self.should_notify_denial(&strategy.id) {
                        self.notifier
                            .notify(&format!("[{}] signal denied by risk gate", strategy.id))
                            .await;
                    }
                }
                Err(err) => {
                    warn!(strategy_id = %strategy.id, error = %err, "tick failed");
                }
            }

            if let Some(state) = self.store.load_state(&strategy.id)? {
                if let Some(report) = self.health_monitor.check(strategy, &state) {
                    if report.has_critical() {
                        warn!(strategy_id = %strategy.id, "critical health finding, auto-deactivating");
                        self.notifier
                            .notify(&format!(
                                "[{}] critical health finding: {}",
                                strategy.id,
                                report
                                    .findings
                                    .iter()
                                    .map(|f| f.message.as_str())
                                    .collect::<Vec<_>>()
                                    .join("; ")
                            ))
                            .await;
                        // Spec §4.9's auto-disable rule applies to a critical
                        // health finding, not just repeated tick failures.
                        if let Err(err) = self.engine.deactivate_strategy(&strategy.id).await {
                            warn!(strategy_id = %strategy.id, error = %err, "failed to auto-deactivate after critical health finding");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketInfo;
    use crate::domain::order::OrderSide;
    use crate::domain::strategy::{Symbol, Timeframe};
    use crate::exchange::{ExchangeAdapter, ExchangeError, OhlcvBar, OrderAck, OrderStatusReport, PositionsSnapshot};
    use crate::handler::StrategyHandler;
    use crate::health::HealthMonitor;
    use crate::notify::NullSink;
    use crate::order_manager::OrderManagerConfig;
    use crate::persistence::StrategyStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    struct UnusedAdapter;

    #[async_trait]
    impl ExchangeAdapter for UnusedAdapter {
        async fn fetch_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, ExchangeError> {
            unreachable!("not exercised")
        }
        async fn get_current_price(&self, _symbol: Symbol) -> Result<Option<Decimal>, ExchangeError> {
            unreachable!("not exercised")
        }
        async fn fetch_ohlcv(
            &self,
            _symbol: Symbol,
            _timeframe: Timeframe,
            _limit: usize,
        ) -> Result<Vec<OhlcvBar>, ExchangeError> {
            unreachable!("not exercised")
        }
        async fn create_limit_order(
            &self,
            _symbol: Symbol,
            _side: OrderSide,
            _quantity: Decimal,
            _price: Decimal,
        ) -> Result<OrderAck, ExchangeError> {
            unreachable!("not exercised")
        }
        async fn create_market_order(
            &self,
            _symbol: Symbol,
            _side: OrderSide,
            _quantity: Decimal,
        ) -> Result<OrderAck, ExchangeError> {
            unreachable!("not exercised")
        }
        async fn cancel_order(&self, _symbol: Symbol, _order_id: &str) -> Result<(), ExchangeError> {
            unreachable!("not exercised")
        }
        async fn check_order_status_detailed(
            &self,
            _symbol: Symbol,
            _order_ids: &[String],
        ) -> Result<Vec<OrderStatusReport>, ExchangeError> {
            unreachable!("not exercised")
        }
        async fn get_all_positions(&self) -> Result<PositionsSnapshot, ExchangeError> {
            unreachable!("not exercised")
        }
    }

    fn scheduler() -> (tempfile::TempDir, Scheduler) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StrategyStore::new(dir.path()));
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(UnusedAdapter);
        let handlers: Vec<Arc<dyn StrategyHandler>> = Vec::new();
        let engine = Arc::new(StrategyEngine::new(
            store.clone(),
            adapter,
            Arc::new(NullSink),
            handlers,
            OrderManagerConfig::default(),
            true,
        ));
        let health_monitor = Arc::new(HealthMonitor::new(store.clone()));
        let scheduler = Scheduler::new(
            store,
            engine,
            health_monitor,
            Arc::new(NullSink),
            Duration::from_secs(60),
            ShutdownSignal::new(),
        );
        (dir, scheduler)
    }

    #[test]
    fn denial_notification_cooldown_suppresses_immediate_repeats() {
        // Spec §4.6 / scenario 6: a second denial within 20 minutes of the
        // first produces no additional notification.
        let (_dir, scheduler) = scheduler();
        assert!(scheduler.should_notify_denial("s1"));
        assert!(!scheduler.should_notify_denial("s1"));
    }

    #[test]
    fn denial_notification_cooldown_is_per_strategy() {
        let (_dir, scheduler) = scheduler();
        assert!(scheduler.should_notify_denial("s1"));
        assert!(scheduler.should_notify_denial("s2"));
    }

    #[tokio::test]
    async fn shutdown_signal_wakes_sleeper_immediately() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            waiter.sleep_or_shutdown(Duration::from_secs(3600)).await;
            start.elapsed()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();
        let elapsed = handle.await.unwrap();
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn requested_reflects_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.requested());
        signal.trigger();
        assert!(signal.requested());
    }
}
