//! Shared parameter-range validation (spec §4.4.4). `OttConfig::validate`
//! already covers the OTT range itself; these functions cover the
//! strategy-type-specific ranges each handler's `validate_strategy_config`
//! delegates to, plus the guardrail/duplicate-order checks every handler's
//! `calculate_signal` applies before emitting a signal.
//!
//! Grounded on `trading-core::domain::strategy::OttConfig::validate` for the
//! inclusive-range-check shape.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use trading_core::domain::market::MarketInfo;
use trading_core::domain::state::State;
use trading_core::domain::strategy::Strategy;

pub fn validate_grid_ott(y: Decimal, usdt_grid: Decimal) -> Result<(), String> {
    if y <= Decimal::ZERO {
        return Err(format!("y must be > 0, got {y}"));
    }
    if usdt_grid <= Decimal::ZERO {
        return Err(format!("usdt_grid must be > 0, got {usdt_grid}"));
    }
    Ok(())
}

pub fn validate_dca_ott(
    dca_multiplier: Decimal,
    min_drop_pct: Decimal,
    profit_threshold_pct: Decimal,
) -> Result<(), String> {
    if !(dec!(1.0)..=dec!(5.0)).contains(&dca_multiplier) {
        return Err(format!(
            "dca_multiplier must be in [1.0,5.0], got {dca_multiplier}"
        ));
    }
    if !(dec!(0.5)..=dec!(20.0)).contains(&min_drop_pct) {
        return Err(format!("min_drop_pct must be in [0.5,20.0], got {min_drop_pct}"));
    }
    if !(dec!(0.1)..=dec!(10.0)).contains(&profit_threshold_pct) {
        return Err(format!(
            "profit_threshold_pct must be in [0.1,10.0], got {profit_threshold_pct}"
        ));
    }
    Ok(())
}

pub fn validate_bol_grid(bollinger_period: usize, bollinger_std: Decimal) -> Result<(), String> {
    if !(20..=500).contains(&bollinger_period) {
        return Err(format!(
            "bollinger_period must be in [20,500], got {bollinger_period}"
        ));
    }
    if !(dec!(1.0)..=dec!(3.0)).contains(&bollinger_std) {
        return Err(format!("bollinger_std must be in [1.0,3.0], got {bollinger_std}"));
    }
    Ok(())
}

/// Price guardrail check (spec §4.4.4): a computed `target_price` outside
/// `[price_min, price_max]` suppresses the signal. `None` for either bound
/// means unbounded on that side.
pub fn within_guardrails(strategy: &Strategy, target_price: Decimal) -> bool {
    if let Some(min) = strategy.price_min {
        if target_price < min {
            return false;
        }
    }
    if let Some(max) = strategy.price_max {
        if target_price > max {
            return false;
        }
    }
    true
}

/// Conservative duplicate-order guard (spec §4.4.1: "reject if a duplicate
/// open order already exists ... within 1e-4 price units"). The engine only
/// invokes `calculate_signal` when the Order Manager's `pending_orders` is
/// empty (spec §4.6 step 3's back-pressure), so `state.open_orders` is the
/// cached exchange view and, in the steady state the engine guarantees,
/// empty whenever a signal is actually computed. Any entry present is
/// therefore treated as a duplicate regardless of price, since `State`
/// carries no per-order price to compare against.
pub fn has_open_orders(state: &State) -> bool {
    !state.open_orders.is_empty()
}

pub fn meets_min_order_size(market: &MarketInfo, quantity: Decimal, price: Decimal) -> bool {
    market.meets_minimums(quantity, price)
}
