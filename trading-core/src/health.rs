//! The Health Monitor: periodic structural validation of each strategy's
//! state and recent trades, with auto-disable on critical findings (spec
//! §4.9).
//!
//! Grounded on `resilience/health.rs`'s `FeedHealth`/`HealthStatus`
//! enum-and-poll pattern for the status shape, and on
//! `original_source/core/debug_monitor.py` for the concrete thresholds (3
//! errors / critical issue / state corruption triggers auto-disable; 5
//! minute check cadence), which the spec carries over verbatim.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::state::{State, StateVariant};
use crate::domain::strategy::{Strategy, StrategyType};
use crate::persistence::StrategyStore;

fn check_interval() -> ChronoDuration {
    ChronoDuration::minutes(5)
}

fn stale_threshold() -> ChronoDuration {
    ChronoDuration::hours(1)
}

const AVG_COST_TOLERANCE: Decimal = dec!(0.05);
const QUANTITY_TOLERANCE: Decimal = dec!(0.000001);
const CONSECUTIVE_BUY_WARN_PCT: Decimal = dec!(5.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone)]
pub struct HealthFinding {
    pub severity: Severity,
    pub message: String,
}

impl HealthFinding {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub strategy_id: String,
    pub findings: Vec<HealthFinding>,
}

impl HealthReport {
    /// Auto-disable rules (spec §4.9): any critical finding, ≥3 errors, or
    /// a critical "consecutive wrong trade" finding. The error-count rule
    /// is applied by the caller (it reads `State::consecutive_errors`,
    /// which this module doesn't own); this flags everything the report
    /// itself can see.
    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Critical)
    }
}

/// Throttled per-strategy structural checker. At most one check per
/// strategy per `CHECK_INTERVAL` (spec §4.9: "at most every 5 minutes").
pub struct HealthMonitor {
    store: std::sync::Arc<StrategyStore>,
    last_checked: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl HealthMonitor {
    pub fn new(store: std::sync::Arc<StrategyStore>) -> Self {
        Self {
            store,
            last_checked: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the structural check for one strategy, or returns `None` if it
    /// was checked less than `CHECK_INTERVAL` ago.
    pub fn check(&self, strategy: &Strategy, state: &State) -> Option<HealthReport> {
        let now = Utc::now();
        {
            let mut last = self.last_checked.lock().expect("health monitor mutex poisoned");
            if let Some(prev) = last.get(&strategy.id) {
                if now - *prev < check_interval() {
                    return None;
                }
            }
            last.insert(strategy.id.clone(), now);
        }

        let mut findings = Vec::new();
        self.check_lot_coherence(state, &mut findings);
        self.check_cycle_coherence(state, &mut findings);
        self.check_stale(state, now, &mut findings);
        self.check_parameter_drift(strategy, &mut findings);
        self.check_consecutive_buys(strategy, now, &mut findings);

        Some(HealthReport {
            strategy_id: strategy.id.clone(),
            findings,
        })
    }

    /// Recomputes `Σ qty` / weighted `avg_cost` from the lot list and
    /// compares to the stored fields (spec §4.9, invariants 1-2).
    fn check_lot_coherence(&self, state: &State, findings: &mut Vec<HealthFinding>) {
        match &state.variant {
            StateVariant::DcaOtt(dca) => {
                let recomputed_qty: Decimal = dca.dca_positions.iter().map(|l| l.quantity).sum();
                if (recomputed_qty - dca.position.position_quantity).abs() > QUANTITY_TOLERANCE {
                    findings.push(HealthFinding::new(
                        Severity::Error,
                        format!(
                            "dca lot quantity sum {recomputed_qty} diverges from position_quantity {}",
                            dca.position.position_quantity
                        ),
                    ));
                }
                if let Some(avg_cost) = recompute_avg_cost(
                    dca.dca_positions.iter().map(|l| (l.buy_price, l.quantity)),
                ) {
                    if let Some(stored) = dca.position.position_avg_cost {
                        if (avg_cost - stored).abs() > AVG_COST_TOLERANCE {
                            findings.push(HealthFinding::new(
                                Severity::Error,
                                format!("dca recomputed avg_cost {avg_cost} diverges from stored {stored}"),
                            ));
                        }
                    }
                }
            }
            StateVariant::BolGrid(bg) => {
                let recomputed_qty: Decimal = bg.positions.iter().map(|l| l.quantity).sum();
                if (recomputed_qty - bg.total_quantity).abs() > QUANTITY_TOLERANCE {
                    findings.push(HealthFinding::new(
                        Severity::Error,
                        format!(
                            "bol-grid lot quantity sum {recomputed_qty} diverges from total_quantity {}",
                            bg.total_quantity
                        ),
                    ));
                }
                if let Some(avg_cost) =
                    recompute_avg_cost(bg.positions.iter().map(|l| (l.buy_price, l.quantity)))
                {
                    if let Some(stored) = bg.average_cost {
                        if (avg_cost - stored).abs() > AVG_COST_TOLERANCE {
                            findings.push(HealthFinding::new(
                                Severity::Error,
                                format!("bol-grid recomputed avg_cost {avg_cost} diverges from stored {stored}"),
                            ));
                        }
                    }
                }
            }
            StateVariant::GridOtt(_) => {}
        }
    }

    /// `cycle_number > 0` requires non-empty positions; the reverse is a
    /// warning only (spec §4.9).
    fn check_cycle_coherence(&self, state: &State, findings: &mut Vec<HealthFinding>) {
        match &state.variant {
            StateVariant::DcaOtt(dca) if dca.cycle_number > 0 && dca.dca_positions.is_empty() => {
                findings.push(HealthFinding::new(
                    Severity::Warning,
                    format!("cycle_number {} has no open dca positions", dca.cycle_number),
                ));
            }
            StateVariant::BolGrid(bg) if bg.cycle_number > 0 && bg.positions.is_empty() => {
                findings.push(HealthFinding::new(
                    Severity::Warning,
                    format!("cycle_number {} has no open bol-grid positions", bg.cycle_number),
                ));
            }
            _ => {}
        }
    }

    fn check_stale(&self, state: &State, now: DateTime<Utc>, findings: &mut Vec<HealthFinding>) {
        if now - state.last_update > stale_threshold() {
            findings.push(HealthFinding::new(
                Severity::Warning,
                format!("state not updated since {}", state.last_update.to_rfc3339()),
            ));
        }
    }

    fn check_parameter_drift(&self, strategy: &Strategy, findings: &mut Vec<HealthFinding>) {
        if let Some(ott) = &strategy.ott {
            if let Err(reason) = ott.validate() {
                findings.push(HealthFinding::new(Severity::Warning, format!("ott parameter drift: {reason}")));
            }
        }
        if let crate::domain::strategy::StrategyParameters::BolGrid {
            bollinger_period,
            bollinger_std,
            ..
        } = &strategy.parameters
        {
            if !(20..=500).contains(bollinger_period) {
                findings.push(HealthFinding::new(
                    Severity::Warning,
                    format!("bollinger_period {bollinger_period} outside [20,500]"),
                ));
            }
            if *bollinger_std < dec!(1.0) || *bollinger_std > dec!(3.0) {
                findings.push(HealthFinding::new(
                    Severity::Warning,
                    format!("bollinger_std {bollinger_std} outside [1.0,3.0]"),
                ));
            }
        }
    }

    /// Scans the last 24h of trades for DCA strategies: consecutive buys
    /// with an increasing price are a warning at ≤5% rise and critical
    /// above (spec §4.9).
    fn check_consecutive_buys(&self, strategy: &Strategy, now: DateTime<Utc>, findings: &mut Vec<HealthFinding>) {
        if strategy.strategy_type() != StrategyType::DcaOtt {
            return;
        }
        let Ok(trades) = self.store.read_trades(&strategy.id) else {
            return;
        };
        let since = now - ChronoDuration::hours(24);
        let mut buys: Vec<_> = trades
            .into_iter()
            .filter(|t| t.timestamp >= since && t.side == crate::domain::order::OrderSide::Buy)
            .collect();
        buys.sort_by_key(|t| t.timestamp);

        for window in buys.windows(2) {
            let (prev, curr) = (&window[0], &window[1]);
            if curr.price <= prev.price || prev.price.is_zero() {
                continue;
            }
            let rise_pct = (curr.price - prev.price) / prev.price * Decimal::from(100);
            if rise_pct > CONSECUTIVE_BUY_WARN_PCT {
                findings.push(HealthFinding::new(
                    Severity::Critical,
                    format!("consecutive dca buy rose {rise_pct:.2}% (> 5%), expected a lower low"),
                ));
            } else {
                findings.push(HealthFinding::new(
                    Severity::Warning,
                    format!("consecutive dca buy rose {rise_pct:.2}%, expected a lower low"),
                ));
            }
        }
    }
}

fn recompute_avg_cost(lots: impl Iterator<Item = (Decimal, Decimal)>) -> Option<Decimal> {
    let (notional, qty) = lots.fold((Decimal::ZERO, Decimal::ZERO), |(n, q), (price, qty)| {
        (n + price * qty, q + qty)
    });
    if qty.is_zero() {
        None
    } else {
        Some(notional / qty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::{DcaLot, DcaState, PositionBook};
    use crate::domain::strategy::{StrategyParameters, Symbol, Timeframe};
    use std::sync::Arc;

    fn strategy(params: StrategyParameters) -> Strategy {
        Strategy {
            id: "s1".to_string(),
            name: "test".to_string(),
            symbol: Symbol::BtcUsdt,
            timeframe: Timeframe::M5,
            parameters: params,
            ott: None,
            price_min: None,
            price_max: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            extra: Default::default(),
        }
    }

    fn dca_strategy() -> Strategy {
        strategy(StrategyParameters::DcaOtt {
            base_usdt: dec!(100),
            dca_multiplier: dec!(1.5),
            min_drop_pct: dec!(2.0),
            profit_threshold_pct: dec!(1.0),
        })
    }

    fn monitor() -> (tempfile::TempDir, HealthMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StrategyStore::new(dir.path()));
        (dir, HealthMonitor::new(store))
    }

    #[test]
    fn flags_lot_sum_divergence() {
        let (_dir, monitor) = monitor();
        let strategy = dca_strategy();
        let mut state = State::new(
            "s1",
            Symbol::BtcUsdt,
            StateVariant::DcaOtt(DcaState {
                position: PositionBook {
                    position_quantity: dec!(99), // should be 1
                    ..PositionBook::flat(dec!(1000))
                },
                dca_positions: vec![DcaLot {
                    buy_price: dec!(100),
                    quantity: dec!(1),
                    timestamp: Utc::now(),
                    order_id: "o1".to_string(),
                }],
                cycle_number: 1,
                cycle_trade_count: 1,
            }),
        );
        state.last_update = Utc::now();
        let report = monitor.check(&strategy, &state).unwrap();
        assert!(report.findings.iter().any(|f| f.severity == Severity::Error));
    }

    #[test]
    fn throttles_to_one_check_per_interval() {
        let (_dir, monitor) = monitor();
        let strategy = dca_strategy();
        let state = State::new(
            "s1",
            Symbol::BtcUsdt,
            StateVariant::DcaOtt(DcaState {
                position: PositionBook::flat(dec!(1000)),
                dca_positions: Vec::new(),
                cycle_number: 0,
                cycle_trade_count: 0,
            }),
        );
        assert!(monitor.check(&strategy, &state).is_some());
        assert!(monitor.check(&strategy, &state).is_none());
    }

    #[test]
    fn flags_stale_state() {
        let (_dir, monitor) = monitor();
        let strategy = dca_strategy();
        let mut state = State::new(
            "s1",
            Symbol::BtcUsdt,
            StateVariant::DcaOtt(DcaState {
                position: PositionBook::flat(dec!(1000)),
                dca_positions: Vec::new(),
                cycle_number: 0,
                cycle_trade_count: 0,
            }),
        );
        state.last_update = Utc::now() - ChronoDuration::hours(2);
        let report = monitor.check(&strategy, &state).unwrap();
        assert!(report.findings.iter().any(|f| f.message.contains("not updated")));
    }
}
