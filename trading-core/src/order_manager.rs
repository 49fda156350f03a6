//! The crash-safe Order Manager (spec §4.5): the only component that talks
//! to the exchange for order placement and status, owning a durable
//! `pending_orders` WAL reloaded from disk at the start of every
//! reconciliation pass.
//!
//! Grounded on `engine/position_reconciliation.rs`'s `PositionReconciler`
//! for the reconcile-pass shape (batch query, drift accounting) and on
//! `core/order_fsm.rs` for the state vocabulary, reimplemented against
//! disk-backed `PendingOrder` records rather than the teacher's in-memory
//! typestate objects.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::order::{
    ExchangeOrderStatus, OrderSide, OrderType, PendingOrder, PendingOrderStatus,
};
use crate::domain::strategy::Symbol;
use crate::domain::trade::Trade;
use crate::errors::PersistenceError;
use crate::exchange::{ExchangeAdapter, ExchangeError};
use crate::notify::NotificationSink;
use crate::persistence::StrategyStore;

/// Orders older than this with no exchange record at all are assumed lost
/// and actively cancelled (the "ghost position" guard, spec §4.5 step 4).
fn ghost_order_threshold() -> ChronoDuration {
    ChronoDuration::minutes(5)
}

#[derive(Debug, Clone, Copy)]
pub struct OrderManagerConfig {
    /// Age at which a still-open order is cancelled (spec §4.5 step 5).
    /// Defaults to 4 minutes, within the spec's stated 3-5 minute range,
    /// per `original_source/core/order_manager.py`.
    pub timeout: ChronoDuration,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            timeout: ChronoDuration::seconds(240),
        }
    }
}

/// One fill discovered during reconciliation, ready to be handed to the
/// strategy handler's `process_fill` and the P&L calculator.
#[derive(Debug, Clone)]
pub struct DiscoveredFill {
    pub pending: PendingOrder,
    pub average_price: Decimal,
    pub filled_qty: Decimal,
}

/// Outcome of one `reconcile_orders` pass. A record behind a `fills` entry
/// is *not* yet removed from the WAL — the caller must call `drop_order`
/// after persisting the resulting `Trade`/`State`. `dropped` lists records
/// already removed during this pass (nothing left to recover for them:
/// zero-fill cancels, expirations, rejections, and ghost orders).
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub fills: Vec<DiscoveredFill>,
    pub dropped: Vec<String>,
    pub still_open: usize,
}

pub struct OrderManager {
    store: Arc<StrategyStore>,
    adapter: Arc<dyn ExchangeAdapter>,
    notifier: Arc<dyn NotificationSink>,
    config: OrderManagerConfig,
}

impl OrderManager {
    pub fn new(
        store: Arc<StrategyStore>,
        adapter: Arc<dyn ExchangeAdapter>,
        notifier: Arc<dyn NotificationSink>,
        config: OrderManagerConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            notifier,
            config,
        }
    }

    fn load(&self, strategy_id: &str) -> Result<HashMap<String, PendingOrder>, PersistenceError> {
        self.store.load_pending_orders(strategy_id)
    }

    fn save(
        &self,
        strategy_id: &str,
        orders: &HashMap<String, PendingOrder>,
    ) -> Result<(), PersistenceError> {
        self.store.save_pending_orders(strategy_id, orders)
    }

    /// Create: WAL the intent, submit to the exchange, update the WAL record
    /// with the outcome, fire a best-effort notification (spec §4.5
    /// "Create"). `z` is Grid+OTT's grid multiplier at signal time, carried
    /// through so the fill reducer sees it on the resulting `Trade`; every
    /// other strategy passes `None`.
    pub async fn create_order(
        &self,
        strategy_id: &str,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        cycle_info: Option<String>,
        z: Option<i64>,
    ) -> Result<PendingOrder, PersistenceError> {
        let order_type = if price.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        let mut record = PendingOrder::new_pending_submit(
            strategy_id,
            side,
            quantity,
            price,
            order_type,
            cycle_info,
            z,
        );

        let mut orders = self.load(strategy_id)?;
        orders.insert(record.internal_id.clone(), record.clone());
        self.save(strategy_id, &orders)?;

        let submit_result = match (order_type, price) {
            (OrderType::Limit, Some(p)) => {
                self.adapter.create_limit_order(symbol, side, quantity, p).await
            }
            _ => self.adapter.create_market_order(symbol, side, quantity).await,
        };

        match submit_result {
            Ok(ack) => {
                record.order_id = Some(ack.order_id);
                record.status = PendingOrderStatus::Submitted;
                record.updated_at = chrono::Utc::now();
                info!(
                    strategy_id,
                    internal_id = %record.internal_id,
                    order_id = ?record.order_id,
                    "order submitted"
                );
            }
            Err(err) => {
                record.status = PendingOrderStatus::SubmitFailed;
                record.updated_at = chrono::Utc::now();
                warn!(strategy_id, error = %err, "order submission failed");
                self.notifier
                    .notify(&format!(
                        "[{strategy_id}] order submit failed: {err}"
                    ))
                    .await;
            }
        }

        orders.insert(record.internal_id.clone(), record.clone());
        self.save(strategy_id, &orders)?;
        Ok(record)
    }

    /// Reconcile (spec §4.5 "Reconcile"): reload the WAL, batch-query the
    /// exchange for every outstanding record, and drive each through its
    /// terminal transition. A `Filled` record, or a `Canceled` one with a
    /// nonzero `filled_qty` (a timed-out partial fill, spec §4.5 step 5),
    /// surfaces as a `DiscoveredFill` but its WAL record is left in place —
    /// callers pass the fill to the strategy handler and P&L calculator,
    /// persist the resulting `Trade` and `State`, and only then call
    /// `drop_order` to finalize the WAL removal (crash-recovery idempotence:
    /// the WAL entry survives until both are durable, so a crash before
    /// `drop_order` just means the same fill is rediscovered next pass).
    /// Orders with nothing to recover (`Expired`/`Rejected`, a
    /// zero-fill `Canceled`, or a ghost order) are dropped immediately.
    pub async fn reconcile_orders(
        &self,
        strategy_id: &str,
        symbol: Symbol,
    ) -> Result<ReconcileOutcome, PersistenceError> {
        let mut orders = self.load(strategy_id)?;
        let mut outcome = ReconcileOutcome::default();

        let outstanding: Vec<PendingOrder> = orders
            .values()
            .filter(|o| {
                matches!(
                    o.status,
                    PendingOrderStatus::Submitted | PendingOrderStatus::PendingCancel
                )
            })
            .cloned()
            .collect();

        if outstanding.is_empty() {
            return Ok(outcome);
        }

        let order_ids: Vec<String> = outstanding
            .iter()
            .filter_map(|o| o.order_id.clone())
            .collect();

        let reports = match self
            .adapter
            .check_order_status_detailed(symbol, &order_ids)
            .await
        {
            Ok(reports) => reports,
            Err(err) => {
                warn!(strategy_id, error = %err, "exchange error during reconcile, retrying next tick");
                return Ok(outcome);
            }
        };
        let by_id: HashMap<&str, &crate::exchange::OrderStatusReport> =
            reports.iter().map(|r| (r.order_id.as_str(), r)).collect();

        for pending in outstanding {
            let Some(order_id) = pending.order_id.as_deref() else {
                continue;
            };
            match by_id.get(order_id) {
                Some(report) => match report.status {
                    ExchangeOrderStatus::Filled => {
                        outcome.fills.push(DiscoveredFill {
                            pending: pending.clone(),
                            average_price: report.average_price,
                            filled_qty: report.filled_qty,
                        });
                    }
                    ExchangeOrderStatus::Canceled if report.filled_qty > Decimal::ZERO => {
                        info!(
                            strategy_id,
                            internal_id = %pending.internal_id,
                            filled_qty = %report.filled_qty,
                            "cancel resolved to a partial fill, recording it as a trade"
                        );
                        outcome.fills.push(DiscoveredFill {
                            pending: pending.clone(),
                            average_price: report.average_price,
                            filled_qty: report.filled_qty,
                        });
                    }
                    ExchangeOrderStatus::Canceled
                    | ExchangeOrderStatus::Expired
                    | ExchangeOrderStatus::Rejected => {
                        orders.remove(&pending.internal_id);
                        outcome.dropped.push(pending.internal_id.clone());
                    }
                    ExchangeOrderStatus::Open | ExchangeOrderStatus::PartiallyFilled => {
                        outcome.still_open += 1;
                        self.maybe_timeout(&mut orders, &pending, symbol).await;
                    }
                },
                None => {
                    // Missing from the exchange response.
                    if pending.age() > ghost_order_threshold() {
                        warn!(
                            strategy_id,
                            internal_id = %pending.internal_id,
                            "ghost order guard: order missing from exchange and older than threshold, cancelling"
                        );
                        let _ = self.adapter.cancel_order(symbol, order_id).await;
                        orders.remove(&pending.internal_id);
                        outcome.dropped.push(pending.internal_id.clone());
                    } else {
                        outcome.still_open += 1;
                    }
                }
            }
        }

        self.save(strategy_id, &orders)?;
        Ok(outcome)
    }

    /// Finalizes the WAL removal for a single discovered fill (spec §4.5).
    /// Callers must only invoke this after the fill's `Trade` row and the
    /// updated `State` are both durably persisted — see `reconcile_orders`.
    pub fn drop_order(&self, strategy_id: &str, internal_id: &str) -> Result<(), PersistenceError> {
        let mut orders = self.load(strategy_id)?;
        orders.remove(internal_id);
        self.save(strategy_id, &orders)
    }

    async fn maybe_timeout(
        &self,
        orders: &mut HashMap<String, PendingOrder>,
        pending: &PendingOrder,
        symbol: Symbol,
    ) {
        if pending.status == PendingOrderStatus::PendingCancel {
            return;
        }
        let age = chrono::Utc::now() - pending.created_at;
        if age <= self.config.timeout {
            return;
        }
        let Some(order_id) = pending.order_id.as_deref() else {
            return;
        };
        match self.adapter.cancel_order(symbol, order_id).await {
            Ok(()) => {
                if let Some(record) = orders.get_mut(&pending.internal_id) {
                    record.status = PendingOrderStatus::PendingCancel;
                    record.updated_at = chrono::Utc::now();
                }
                info!(internal_id = %pending.internal_id, "order timed out, cancel requested");
            }
            Err(err) => {
                warn!(internal_id = %pending.internal_id, error = %err, "timeout cancel failed, retrying next tick");
            }
        }
    }

    /// Builds the Trade row for a discovered fill (spec §4.5): uses the
    /// exchange's reported average price (not the limit price) and the
    /// stored `cycle_info`.
    pub fn trade_from_fill(fill: &DiscoveredFill) -> Trade {
        let mut trade = Trade::new(
            fill.pending.strategy_id.clone(),
            fill.pending.side,
            fill.average_price,
            fill.filled_qty,
            fill
                .pending
                .order_id
                .clone()
                .unwrap_or_else(|| fill.pending.internal_id.clone()),
        );
        trade.limit_price = fill.pending.price;
        trade.cycle_info = fill.pending.cycle_info.clone();
        trade.z = fill.pending.z;
        trade
    }

    /// Cancels every outstanding order for a strategy (used by
    /// `cleanup_strategy` on deactivation, spec §5).
    pub async fn cancel_all(&self, strategy_id: &str, symbol: Symbol) -> Result<(), PersistenceError> {
        let orders = self.load(strategy_id)?;
        for pending in orders.values() {
            if let Some(order_id) = &pending.order_id {
                if matches!(
                    pending.status,
                    PendingOrderStatus::Submitted | PendingOrderStatus::PendingCancel
                ) {
                    let _ = self.adapter.cancel_order(symbol, order_id).await;
                }
            }
        }
        self.save(strategy_id, &HashMap::new())?;
        Ok(())
    }

    pub fn has_outstanding(&self, strategy_id: &str) -> Result<bool, PersistenceError> {
        Ok(!self.load(strategy_id)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketInfo;
    use crate::domain::strategy::Timeframe;
    use crate::exchange::{OhlcvBar, OrderAck, OrderStatusReport, PositionsSnapshot};
    use crate::notify::NullSink;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap as StdHashMap;

    struct FakeAdapter {
        statuses: Mutex<StdHashMap<String, OrderStatusReport>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl FakeAdapter {
        fn new() -> Self {
            Self {
                statuses: Mutex::new(StdHashMap::new()),
                cancelled: Mutex::new(Vec::new()),
            }
        }

        fn set_filled(&self, order_id: &str, avg_price: Decimal, qty: Decimal) {
            self.statuses.lock().insert(
                order_id.to_string(),
                OrderStatusReport {
                    order_id: order_id.to_string(),
                    status: ExchangeOrderStatus::Filled,
                    filled_qty: qty,
                    remaining_qty: Decimal::ZERO,
                    average_price: avg_price,
                },
            );
        }
    }

    #[async_trait]
    impl ExchangeAdapter for FakeAdapter {
        async fn fetch_markets(&self) -> Result<StdHashMap<Symbol, MarketInfo>, ExchangeError> {
            Ok(StdHashMap::new())
        }
        async fn get_current_price(&self, _symbol: Symbol) -> Result<Option<Decimal>, ExchangeError> {
            Ok(None)
        }
        async fn fetch_ohlcv(
            &self,
            _symbol: Symbol,
            _timeframe: Timeframe,
            _limit: usize,
        ) -> Result<Vec<OhlcvBar>, ExchangeError> {
            Ok(Vec::new())
        }
        async fn create_limit_order(
            &self,
            _symbol: Symbol,
            _side: OrderSide,
            _quantity: Decimal,
            _price: Decimal,
        ) -> Result<OrderAck, ExchangeError> {
            Ok(OrderAck {
                order_id: "exch-1".to_string(),
                status: ExchangeOrderStatus::Open,
            })
        }
        async fn create_market_order(
            &self,
            _symbol: Symbol,
            _side: OrderSide,
            _quantity: Decimal,
        ) -> Result<OrderAck, ExchangeError> {
            Ok(OrderAck {
                order_id: "exch-1".to_string(),
                status: ExchangeOrderStatus::Open,
            })
        }
        async fn cancel_order(&self, _symbol: Symbol, order_id: &str) -> Result<(), ExchangeError> {
            self.cancelled.lock().push(order_id.to_string());
            Ok(())
        }
        async fn check_order_status_detailed(
            &self,
            _symbol: Symbol,
            order_ids: &[String],
        ) -> Result<Vec<OrderStatusReport>, ExchangeError> {
            let statuses = self.statuses.lock();
            Ok(order_ids
                .iter()
                .filter_map(|id| statuses.get(id).cloned())
                .collect())
        }
        async fn get_all_positions(&self) -> Result<PositionsSnapshot, ExchangeError> {
            Ok(PositionsSnapshot::default())
        }
    }

    fn manager(adapter: Arc<FakeAdapter>, dir: &tempfile::TempDir) -> OrderManager {
        OrderManager::new(
            Arc::new(StrategyStore::new(dir.path())),
            adapter,
            Arc::new(NullSink),
            OrderManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn create_then_reconcile_discovers_fill() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        let om = manager(adapter.clone(), &dir);

        let record = om
            .create_order(
                "s1",
                Symbol::BtcUsdt,
                OrderSide::Buy,
                dec!(0.01),
                Some(dec!(30000)),
                Some("G1".to_string()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(record.status, PendingOrderStatus::Submitted);
        adapter.set_filled("exch-1", dec!(30000), dec!(0.01));

        let outcome = om.reconcile_orders("s1", Symbol::BtcUsdt).await.unwrap();
        assert_eq!(outcome.fills.len(), 1);
        // The WAL record survives reconcile itself (spec §4.5 crash-safety):
        // only an explicit `drop_order`, issued after the caller persists
        // the resulting Trade and State, removes it.
        assert_eq!(om.load("s1").unwrap().len(), 1);
        om.drop_order("s1", &record.internal_id).unwrap();
        assert!(om.load("s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_twice_with_no_changes_is_idempotent() {
        // P8: reconcile is idempotent when the exchange reports nothing new.
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        let om = manager(adapter.clone(), &dir);
        om.create_order(
            "s1",
            Symbol::BtcUsdt,
            OrderSide::Buy,
            dec!(0.01),
            Some(dec!(30000)),
            None,
            None,
        )
        .await
        .unwrap();

        let first = om.reconcile_orders("s1", Symbol::BtcUsdt).await.unwrap();
        let second = om.reconcile_orders("s1", Symbol::BtcUsdt).await.unwrap();
        assert_eq!(first.fills.len(), 0);
        assert_eq!(second.fills.len(), 0);
        assert_eq!(om.load("s1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn canceled_order_with_partial_fill_still_produces_a_fill() {
        // Spec §4.5 step 5: a timeout cancel that resolves to a partial fill
        // must not silently discard the filled quantity.
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        let om = manager(adapter.clone(), &dir);
        let record = om
            .create_order(
                "s1",
                Symbol::BtcUsdt,
                OrderSide::Buy,
                dec!(0.01),
                Some(dec!(30000)),
                None,
                None,
            )
            .await
            .unwrap();
        adapter.statuses.lock().insert(
            "exch-1".to_string(),
            OrderStatusReport {
                order_id: "exch-1".to_string(),
                status: ExchangeOrderStatus::Canceled,
                filled_qty: dec!(0.004),
                remaining_qty: dec!(0.006),
                average_price: dec!(29950),
            },
        );

        let outcome = om.reconcile_orders("s1", Symbol::BtcUsdt).await.unwrap();
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].filled_qty, dec!(0.004));
        assert_eq!(om.load("s1").unwrap().len(), 1);
        om.drop_order("s1", &record.internal_id).unwrap();
        assert!(om.load("s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn canceled_order_with_no_fill_is_dropped_with_no_trade() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(FakeAdapter::new());
        let om = manager(adapter.clone(), &dir);
        om.create_order(
            "s1",
            Symbol::BtcUsdt,
            OrderSide::Buy,
            dec!(0.01),
            Some(dec!(30000)),
            None,
            None,
        )
        .await
        .unwrap();
        adapter.statuses.lock().insert(
            "exch-1".to_string(),
            OrderStatusReport {
                order_id: "exch-1".to_string(),
                status: ExchangeOrderStatus::Canceled,
                filled_qty: Decimal::ZERO,
                remaining_qty: dec!(0.01),
                average_price: Decimal::ZERO,
            },
        );

        let outcome = om.reconcile_orders("s1", Symbol::BtcUsdt).await.unwrap();
        assert!(outcome.fills.is_empty());
        assert!(om.load("s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn trade_from_fill_uses_average_price_not_limit_price() {
        let pending = PendingOrder::new_pending_submit(
            "s1",
            OrderSide::Buy,
            dec!(0.01),
            Some(dec!(30000)),
            OrderType::Limit,
            Some("G1".to_string()),
            Some(3),
        );
        let fill = DiscoveredFill {
            pending,
            average_price: dec!(29990),
            filled_qty: dec!(0.01),
        };
        let trade = OrderManager::trade_from_fill(&fill);
        assert_eq!(trade.price, dec!(29990));
        assert_eq!(trade.limit_price, Some(dec!(30000)));
        assert_eq!(trade.cycle_info, Some("G1".to_string()));
        assert_eq!(trade.z, Some(3));
    }
}
