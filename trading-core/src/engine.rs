//! The Strategy Engine: the per-strategy tick procedure (spec §4.6).
//!
//! Grounded on `engine/tick.rs`'s `MarketMaker::on_tick` for the overall
//! shape (reconcile, observe, decide, act, persist) and on
//! `engine/market_cache.rs` for the TTL-cached market-metadata lookup this
//! module's `MarketCache` adapts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::market::MarketInfo;
use crate::domain::state::State;
use crate::domain::strategy::{Strategy, StrategyType, Symbol};
use crate::errors::{DomainError, PersistenceError};
use crate::exchange::{ExchangeAdapter, ExchangeError, OhlcvBar};
use crate::handler::{SignalContext, StrategyHandler};
use crate::indicators::ott;
use crate::notify::NotificationSink;
use crate::order_manager::{OrderManager, OrderManagerConfig};
use crate::persistence::StrategyStore;
use crate::risk::{RiskGate, RiskGateError};

/// Consecutive tick-processing failures after which a strategy is
/// auto-deactivated (spec §4.6 step 11).
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

fn market_cache_ttl() -> ChronoDuration {
    ChronoDuration::hours(1)
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no handler registered for strategy type {0:?}")]
    NoHandler(StrategyType),
}

/// Outcome of one `process_strategy` call, read by the scheduler to decide
/// whether `strategies.json` needs rewriting.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub fills_processed: usize,
    pub signal_generated: bool,
    pub order_submitted: bool,
    pub risk_denied: bool,
    pub should_deactivate: bool,
    /// WAL `internal_id`s of fills whose `Trade` row has been appended this
    /// tick but whose `PendingOrder` record hasn't been dropped yet (spec
    /// §4.5 crash-safety). `process_strategy` drops each one only after
    /// `State` is durably saved.
    pub processed_internal_ids: Vec<String>,
}

/// Hourly-TTL cache over `ExchangeAdapter::fetch_markets` (spec §4.7): every
/// symbol is refreshed together on a miss, since the adapter call returns
/// the whole market list in one request.
pub struct MarketCache {
    entries: Mutex<HashMap<Symbol, (MarketInfo, DateTime<Utc>)>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(
        &self,
        symbol: Symbol,
        adapter: &dyn ExchangeAdapter,
    ) -> Result<MarketInfo, ExchangeError> {
        if let Some(info) = self.fresh(symbol) {
            return Ok(info);
        }
        let fetched = adapter.fetch_markets().await?;
        let now = Utc::now();
        {
            let mut entries = self.entries.lock();
            for (sym, info) in &fetched {
                entries.insert(*sym, (*info, now));
            }
        }
        fetched.get(&symbol).copied().ok_or_else(|| {
            ExchangeError::BadResponse(format!("no market metadata for {symbol}"))
        })
    }

    fn fresh(&self, symbol: Symbol) -> Option<MarketInfo> {
        let entries = self.entries.lock();
        let (info, fetched_at) = entries.get(&symbol)?;
        if Utc::now() - *fetched_at < market_cache_ttl() {
            Some(*info)
        } else {
            None
        }
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StrategyEngine {
    store: Arc<StrategyStore>,
    adapter: Arc<dyn ExchangeAdapter>,
    order_manager: OrderManager,
    risk_gate: RiskGate,
    notifier: Arc<dyn NotificationSink>,
    handlers: HashMap<StrategyType, Arc<dyn StrategyHandler>>,
    market_cache: MarketCache,
    read_only: bool,
}

impl StrategyEngine {
    pub fn new(
        store: Arc<StrategyStore>,
        adapter: Arc<dyn ExchangeAdapter>,
        notifier: Arc<dyn NotificationSink>,
        handlers: Vec<Arc<dyn StrategyHandler>>,
        order_manager_config: OrderManagerConfig,
        read_only: bool,
    ) -> Self {
        let order_manager = OrderManager::new(
            store.clone(),
            adapter.clone(),
            notifier.clone(),
            order_manager_config,
        );
        let risk_gate = RiskGate::new(store.clone(), adapter.clone());
        let handlers = handlers
            .into_iter()
            .map(|h| (h.strategy_type(), h))
            .collect();
        Self {
            store,
            adapter,
            order_manager,
            risk_gate,
            notifier,
            handlers,
            market_cache: MarketCache::new(),
            read_only,
        }
    }

    /// Flips `active = false` on the persisted strategy list and cancels
    /// any outstanding orders (spec §4.6 step 11 / §5 / §4.9's auto-disable
    /// rule). Public so the scheduler can invoke it on a critical health
    /// finding, not just on repeated tick failures.
    pub async fn deactivate_strategy(&self, strategy_id: &str) -> Result<(), EngineError> {
        let mut strategies = self.store.load_strategies()?;
        let mut symbol = None;
        for strategy in strategies.iter_mut() {
            if strategy.id == strategy_id {
                strategy.active = false;
                strategy.updated_at = Utc::now();
                symbol = Some(strategy.symbol);
            }
        }
        self.store.save_strategies(&strategies)?;
        if let Some(symbol) = symbol {
            self.order_manager.cancel_all(strategy_id, symbol).await?;
        }
        Ok(())
    }

    fn handler_for(&self, strategy: &Strategy) -> Result<&Arc<dyn StrategyHandler>, EngineError> {
        self.handlers
            .get(&strategy.strategy_type())
            .ok_or(EngineError::NoHandler(strategy.strategy_type()))
    }

    /// Runs one full tick for one strategy (spec §4.6). Inactive strategies
    /// are skipped by the caller before this is invoked.
    pub async fn process_strategy(&self, strategy: &Strategy) -> Result<TickOutcome, EngineError> {
        let handler = self.handler_for(strategy)?.clone();
        let mut state = match self.store.load_state(&strategy.id)? {
            Some(state) => state,
            None => handler.initialize_state(strategy),
        };

        let mut outcome = TickOutcome::default();

        let tick_result = self.run_tick(strategy, &handler, &mut state, &mut outcome).await;
        match &tick_result {
            Ok(()) => {
                state.consecutive_errors = 0;
            }
            Err(err) => {
                state.consecutive_errors += 1;
                warn!(
                    strategy_id = %strategy.id,
                    error = %err,
                    consecutive_errors = state.consecutive_errors,
                    "strategy tick failed"
                );
                if state.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!(strategy_id = %strategy.id, "auto-deactivating after repeated tick failures");
                    outcome.should_deactivate = true;
                    self.notifier
                        .notify(&format!(
                            "[{}] auto-deactivated after {} consecutive errors: {err}",
                            strategy.id, state.consecutive_errors
                        ))
                        .await;
                    if let Err(deactivate_err) = self.deactivate_strategy(&strategy.id).await {
                        warn!(strategy_id = %strategy.id, error = %deactivate_err, "failed to persist auto-deactivation");
                    }
                }
            }
        }

        state.last_update = Utc::now();
        self.store.save_state(&state)?;

        // Only now that this tick's State is durable do we finalize the WAL
        // for each fill processed above (spec §4.5 crash-safety): a crash
        // before this point leaves the PendingOrder record on disk, so the
        // next reconciliation pass rediscovers the same fill rather than
        // losing it.
        for internal_id in &outcome.processed_internal_ids {
            if let Err(err) = self.order_manager.drop_order(&strategy.id, internal_id) {
                warn!(
                    strategy_id = %strategy.id,
                    internal_id,
                    error = %err,
                    "failed to drop completed order from WAL"
                );
            }
        }

        tick_result?;
        Ok(outcome)
    }

    async fn run_tick(
        &self,
        strategy: &Strategy,
        handler: &Arc<dyn StrategyHandler>,
        state: &mut State,
        outcome: &mut TickOutcome,
    ) -> Result<(), EngineError> {
        let reconcile = self
            .order_manager
            .reconcile_orders(strategy.id.as_str(), strategy.symbol)
            .await?;

        for fill in &reconcile.fills {
            let mut trade = OrderManager::trade_from_fill(fill);
            let realized = handler.process_fill(strategy, state, &mut trade)?;
            info!(
                strategy_id = %strategy.id,
                order_id = %trade.order_id,
                realized = %realized,
                "fill processed"
            );
            self.store.append_trade(&trade)?;
            outcome.fills_processed += 1;
            outcome
                .processed_internal_ids
                .push(fill.pending.internal_id.clone());
        }

        // Back-pressure (spec §4.6/§5): never layer a new signal on top of
        // an order still in flight for this strategy.
        if self.order_manager.has_outstanding(&strategy.id)? {
            return Ok(());
        }

        let market = self.market_cache.get(strategy.symbol, self.adapter.as_ref()).await?;
        let bars = self
            .adapter
            .fetch_ohlcv(strategy.symbol, strategy.timeframe, 210)
            .await?;
        // The last element may still be an open bar; the second-to-last is
        // the most recent fully closed one (spec §4.1).
        let Some(closed_bar) = bars.len().checked_sub(2).and_then(|i| bars.get(i)) else {
            return Ok(());
        };
        let closed_ts =
            DateTime::<Utc>::from_timestamp_millis(closed_bar.ts_ms).unwrap_or_else(Utc::now);

        // Idempotence (invariant 6 / property P9): never reprocess a bar
        // already seen.
        if state.last_bar_timestamp.is_some_and(|seen| seen >= closed_ts) {
            return Ok(());
        }

        let closes: Vec<Decimal> = bars[..bars.len() - 1]
            .iter()
            .map(|b| b.close)
            .collect();
        let ott_result = match strategy.ott {
            Some(cfg) => Some(ott(&closes, cfg.period, cfg.opt)?),
            None => None,
        };

        let ctx = SignalContext {
            current_price: market.round_price(closed_bar.close),
            ott: ott_result,
            recent_ohlcv: &bars,
            market,
        };
        let signal = handler.calculate_signal(strategy, state, &ctx);

        state.last_bar_timestamp = Some(closed_ts);
        state.last_ott_mode = ott_result.map(|o| o.mode);

        if !signal.should_trade {
            return Ok(());
        }
        outcome.signal_generated = true;

        if self.read_only {
            info!(strategy_id = %strategy.id, reason = %signal.reason, "read-only mode: suppressing order submission");
            return Ok(());
        }

        let Some(side) = signal.side else { return Ok(()) };
        let Some(quantity) = signal.quantity else { return Ok(()) };

        match self
            .risk_gate
            .evaluate(strategy.symbol, side, quantity, signal.target_price)
            .await
        {
            Ok(()) => {}
            Err(RiskGateError::Denied(denial)) => {
                warn!(strategy_id = %strategy.id, %denial, "risk gate denied signal");
                outcome.risk_denied = true;
                return Ok(());
            }
            Err(other) => return Err(other_to_engine_error(other)),
        }

        let pending = self
            .order_manager
            .create_order(
                &strategy.id,
                strategy.symbol,
                side,
                quantity,
                signal.target_price,
                None,
                signal.z,
            )
            .await?;
        state.open_orders.push(pending.internal_id.clone());
        outcome.order_submitted = true;
        Ok(())
    }
}

fn other_to_engine_error(err: RiskGateError) -> EngineError {
    match err {
        RiskGateError::Persistence(e) => EngineError::Persistence(e),
        RiskGateError::Exchange(e) => EngineError::Exchange(e),
        RiskGateError::Denied(_) => unreachable!("handled by caller before this conversion"),
    }
}
