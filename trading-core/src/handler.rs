//! The Strategy Handler capability contract (spec §4.4).
//!
//! Defined in `trading-core` rather than `trading-strategies` for the same
//! reason `ExchangeAdapter` lives here and not in `trading-exchange`: the
//! engine needs to call through the abstraction without creating a
//! dependency cycle (`trading-strategies` depends on `trading-core` for
//! domain types, not the other way around). `trading-strategies` provides
//! the three concrete implementors; `trading-bins` wires them into the
//! engine's handler registry.
//!
//! Grounded on the teacher's legacy `strategy/mod.rs::Strategy` trait
//! (`on_update`/`on_fill` shape) for the capability-trait pattern spec §9
//! calls for explicitly when re-architecting the original's polymorphic
//! handler-via-base-class.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::MarketInfo;
use crate::domain::order::OrderSide;
use crate::domain::state::State;
use crate::domain::strategy::{Strategy, StrategyType};
use crate::domain::trade::Trade;
use crate::errors::DomainError;
use crate::exchange::OhlcvBar;
use crate::indicators::OttResult;

/// A strategy handler's decision for one tick (spec §4.4). Absent
/// `target_price` means a market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub should_trade: bool,
    pub side: Option<OrderSide>,
    pub target_price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub reason: String,
    #[serde(default)]
    pub strategy_specific_data: Option<serde_json::Value>,
    /// Grid+OTT's grid multiplier at signal time (spec §4.4.1), carried
    /// through `PendingOrder`/`Trade` so the fill reducer sees the same `z`
    /// the signal was sized with rather than recomputing it from price.
    #[serde(default)]
    pub z: Option<i64>,
}

impl Signal {
    /// No signal this tick, with a human-readable reason (validation
    /// failures suppress a signal rather than erroring, spec §7).
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            should_trade: false,
            side: None,
            target_price: None,
            quantity: None,
            reason: reason.into(),
            strategy_specific_data: None,
            z: None,
        }
    }

    pub fn trade(
        side: OrderSide,
        target_price: Option<Decimal>,
        quantity: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            should_trade: true,
            side: Some(side),
            target_price,
            quantity: Some(quantity),
            reason: reason.into(),
            strategy_specific_data: None,
            z: None,
        }
    }
}

/// Everything a handler needs to compute a signal that isn't in `Strategy`
/// or `State` themselves (spec §4.4 item 2's parameter list).
pub struct SignalContext<'a> {
    pub current_price: Decimal,
    pub ott: Option<OttResult>,
    pub recent_ohlcv: &'a [OhlcvBar],
    /// Tick/step/minimum metadata for rounding and validating order sizing
    /// (spec §4.4.1–4.4.4); refreshed at most hourly by the engine's
    /// `MarketCache`.
    pub market: MarketInfo,
}

/// The polymorphic strategy capability (spec §4.4, §9's "capability
/// interface" re-architecture of the original's base-class handler). The
/// engine dispatches on `Strategy::strategy_type()` to pick the handler.
pub trait StrategyHandler: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    /// Builds a fresh custom state for a newly created strategy.
    fn initialize_state(&self, strategy: &Strategy) -> State;

    /// Strategy-type-specific parameter/range validation (spec §4.4.4).
    fn validate_strategy_config(&self, strategy: &Strategy) -> Result<(), String>;

    /// Pure decision function: observes the world, returns a `Signal`.
    /// Validation failures (guardrails, OTT range, duplicate orders, min
    /// qty/notional) suppress the signal with a reason rather than erroring
    /// (spec §7) — only `DomainError` is reserved for true invariant
    /// failures in the surrounding P&L fold.
    fn calculate_signal(&self, strategy: &Strategy, state: &State, ctx: &SignalContext<'_>) -> Signal;

    /// Applies a discovered fill to `state`, including the universal P&L
    /// fold and any strategy-specific bookkeeping (grid foundation, DCA
    /// lots, Bollinger lots). May mutate `trade` in place to attach
    /// strategy-specific fields (Grid+OTT's `z`/`gf_before`/`gf_after`,
    /// spec §4.5). Returns the realized P&L delta recognized by this fill.
    fn process_fill(
        &self,
        strategy: &Strategy,
        state: &mut State,
        trade: &mut Trade,
    ) -> Result<Decimal, DomainError>;
}
