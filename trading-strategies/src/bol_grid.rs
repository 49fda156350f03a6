//! Bol-Grid (spec §4.4.3): a Bollinger-Band cross-signal ladder. Unlike
//! Grid+OTT and DCA+OTT, this handler does not use the OTT filter at all —
//! it reads `ctx.recent_ohlcv` directly and computes its own bands.
//!
//! No teacher equivalent — implemented directly from spec §4.4.3, in the
//! teacher's `StrategyHandler` idiom.

use rust_decimal::Decimal;
use tracing::debug;

use trading_core::domain::order::OrderSide;
use trading_core::domain::state::{BolGridState, DcaLot, PositionBook, State, StateVariant};
use trading_core::domain::strategy::{Strategy, StrategyParameters};
use trading_core::domain::trade::Trade;
use trading_core::errors::DomainError;
use trading_core::handler::{Signal, SignalContext, StrategyHandler};
use trading_core::indicators::bollinger_bands;
use trading_core::pnl::process_trade_fill;

use crate::validation::{has_open_orders, meets_min_order_size, validate_bol_grid, within_guardrails};

const DEFAULT_INITIAL_BALANCE: Decimal = rust_decimal_macros::dec!(10000);
const HUNDRED: Decimal = rust_decimal_macros::dec!(100);
const DUST: Decimal = rust_decimal_macros::dec!(0.000001);
const ONE_SIXTH: Decimal = rust_decimal_macros::dec!(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossSignal {
    AboveLower,
    BelowMiddle,
    BelowUpper,
}

fn detect_cross(
    prev_price: Decimal,
    curr_price: Decimal,
    prev: trading_core::indicators::BollingerPoint,
    curr: trading_core::indicators::BollingerPoint,
) -> Option<CrossSignal> {
    if prev_price <= prev.lower && curr_price > curr.lower {
        return Some(CrossSignal::AboveLower);
    }
    if prev_price >= prev.middle && curr_price < curr.middle {
        return Some(CrossSignal::BelowMiddle);
    }
    if prev_price >= prev.upper && curr_price < curr.upper {
        return Some(CrossSignal::BelowUpper);
    }
    None
}

pub struct BolGridHandler;

impl BolGridHandler {
    pub fn new() -> Self {
        Self
    }

    fn params(strategy: &Strategy) -> Option<(Decimal, Decimal, Decimal, usize, Decimal)> {
        match strategy.parameters {
            StrategyParameters::BolGrid {
                initial_usdt,
                min_drop_pct,
                min_profit_pct,
                bollinger_period,
                bollinger_std,
            } => Some((
                initial_usdt,
                min_drop_pct,
                min_profit_pct,
                bollinger_period,
                bollinger_std,
            )),
            _ => None,
        }
    }
}

impl Default for BolGridHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyHandler for BolGridHandler {
    fn strategy_type(&self) -> trading_core::domain::strategy::StrategyType {
        trading_core::domain::strategy::StrategyType::BolGrid
    }

    fn initialize_state(&self, strategy: &Strategy) -> State {
        State::new(
            strategy.id.clone(),
            strategy.symbol,
            StateVariant::BolGrid(BolGridState {
                position: PositionBook::flat(DEFAULT_INITIAL_BALANCE),
                positions: Vec::new(),
                average_cost: None,
                total_quantity: Decimal::ZERO,
                cycle_number: 0,
                cycle_step: 0,
                cycle_trades: 0,
                last_buy_price: None,
                last_sell_price: None,
                last_bollinger: None,
            }),
        )
    }

    fn validate_strategy_config(&self, strategy: &Strategy) -> Result<(), String> {
        let (_, _, _, bollinger_period, bollinger_std) =
            Self::params(strategy).ok_or_else(|| "strategy is not a Bol-Grid configuration".to_string())?;
        validate_bol_grid(bollinger_period, bollinger_std)?;
        strategy.validate_guardrails()
    }

    fn calculate_signal(&self, strategy: &Strategy, state: &State, ctx: &SignalContext<'_>) -> Signal {
        let Some((initial_usdt, min_drop_pct, min_profit_pct, bollinger_period, bollinger_std)) =
            Self::params(strategy)
        else {
            return Signal::none("strategy parameters are not Bol-Grid");
        };
        let Some(bol) = state.variant.as_bol_grid() else {
            return Signal::none("state is not a Bol-Grid state");
        };
        if has_open_orders(state) {
            return Signal::none("duplicate open order already exists");
        }

        let closes: Vec<Decimal> = ctx.recent_ohlcv.iter().map(|b| b.close).collect();
        if closes.len() < bollinger_period + 1 {
            return Signal::none("insufficient closes for Bollinger cross detection");
        }
        let bands = match bollinger_bands(&closes, bollinger_period, bollinger_std) {
            Ok(b) => b,
            Err(_) => return Signal::none("insufficient data for Bollinger bands"),
        };
        if bands.len() < 2 {
            return Signal::none("insufficient Bollinger history for a cross");
        }
        let curr = *bands.last().expect("checked len >= 2");
        let prev = bands[bands.len() - 2];
        let curr_price = closes[closes.len() - 1];
        let prev_price = closes[closes.len() - 2];

        let Some(cross) = detect_cross(prev_price, curr_price, prev, curr) else {
            return Signal::none("no Bollinger cross this tick");
        };

        let price = ctx.current_price;

        match cross {
            CrossSignal::AboveLower => {
                self.buy_signal(strategy, bol, price, initial_usdt, min_drop_pct, ctx)
            }
            CrossSignal::BelowMiddle | CrossSignal::BelowUpper => {
                self.sell_signal(strategy, bol, price, initial_usdt, min_profit_pct, ctx)
            }
        }
    }

    fn process_fill(
        &self,
        _strategy: &Strategy,
        state: &mut State,
        trade: &mut Trade,
    ) -> Result<Decimal, DomainError> {
        let realized = process_trade_fill(state.variant.position_mut(), trade)?;

        let Some(bol) = state.variant.as_bol_grid_mut() else {
            return Err(DomainError::InvariantViolation(
                "process_fill called on non-Bol-Grid state".to_string(),
            ));
        };

        match trade.side {
            OrderSide::Buy => {
                let was_empty = bol.positions.is_empty();
                bol.positions.push(DcaLot {
                    buy_price: trade.price,
                    quantity: trade.quantity,
                    timestamp: trade.timestamp,
                    order_id: trade.order_id.clone(),
                });
                bol.total_quantity = bol.positions.iter().map(|l| l.quantity).sum();
                let notional: Decimal = bol.positions.iter().map(|l| l.price_times_qty()).sum();
                bol.average_cost = Some(notional / bol.total_quantity);
                bol.last_buy_price = Some(trade.price);
                if was_empty {
                    bol.cycle_number += 1;
                    bol.cycle_step = 1;
                    bol.cycle_trades = 1;
                } else {
                    bol.cycle_step += 1;
                    bol.cycle_trades += 1;
                }
                trade.cycle_info = Some(format!("D{}-{}", bol.cycle_number, bol.cycle_step));
            }
            OrderSide::Sell => {
                bol.last_sell_price = Some(trade.price);
                if trade.quantity >= bol.total_quantity {
                    // Cycle close: clear every lot, reset the ladder.
                    bol.positions.clear();
                    bol.average_cost = None;
                    bol.total_quantity = Decimal::ZERO;
                    bol.cycle_step = 0;
                    bol.cycle_trades = 0;
                } else {
                    // Partial sell: scale every lot by (1 - sell_ratio),
                    // dropping dust, then recompute totals (spec §4.4.3).
                    let sell_ratio = trade.quantity / bol.total_quantity;
                    let keep_ratio = Decimal::ONE - sell_ratio;
                    for lot in bol.positions.iter_mut() {
                        lot.quantity *= keep_ratio;
                    }
                    bol.positions.retain(|lot| lot.quantity >= DUST);
                    bol.total_quantity = bol.positions.iter().map(|l| l.quantity).sum();
                    if bol.total_quantity.is_zero() {
                        bol.average_cost = None;
                    } else {
                        let notional: Decimal = bol.positions.iter().map(|l| l.price_times_qty()).sum();
                        bol.average_cost = Some(notional / bol.total_quantity);
                    }
                }
            }
        }

        Ok(realized)
    }
}

trait LotNotional {
    fn price_times_qty(&self) -> Decimal;
}

impl LotNotional for DcaLot {
    fn price_times_qty(&self) -> Decimal {
        self.buy_price * self.quantity
    }
}

impl BolGridHandler {
    fn buy_signal(
        &self,
        strategy: &Strategy,
        bol: &BolGridState,
        price: Decimal,
        initial_usdt: Decimal,
        min_drop_pct: Decimal,
        ctx: &SignalContext<'_>,
    ) -> Signal {
        if !bol.positions.is_empty() {
            let last_buy_price = bol.last_buy_price.expect("non-empty positions has a last buy");
            let avg_cost = bol.average_cost.expect("non-empty positions has an avg cost");
            if price >= last_buy_price {
                return Signal::none("price is not a lower low than the last buy");
            }
            let drop_from_avg = (avg_cost - price) / avg_cost * HUNDRED;
            if drop_from_avg < min_drop_pct {
                return Signal::none("drop from average cost below min_drop_pct");
            }
        }
        if !within_guardrails(strategy, price) {
            return Signal::none("price outside guardrails");
        }
        let quantity = ctx.market.floor_quantity(initial_usdt / price);
        if !meets_min_order_size(&ctx.market, quantity, price) {
            return Signal::none("quantity below exchange minimums");
        }
        debug!(strategy_id = %strategy.id, %price, "bol-grid buy signal");
        Signal::trade(OrderSide::Buy, None, quantity, "bol-grid buy on CROSS_ABOVE_LOWER")
    }

    fn sell_signal(
        &self,
        strategy: &Strategy,
        bol: &BolGridState,
        price: Decimal,
        initial_usdt: Decimal,
        min_profit_pct: Decimal,
        ctx: &SignalContext<'_>,
    ) -> Signal {
        if bol.positions.is_empty() {
            return Signal::none("no open lots to exit");
        }
        let avg_cost = bol.average_cost.expect("non-empty positions has an avg cost");
        let profit_pct = (price - avg_cost) / avg_cost * HUNDRED;
        if profit_pct < min_profit_pct {
            return Signal::none("profit below min_profit_pct");
        }
        if !within_guardrails(strategy, price) {
            return Signal::none("price outside guardrails");
        }

        // One-sixth rule: valued at the current price (not avg_cost), a
        // ladder worth less than initial_usdt/6 is closed outright rather
        // than partially sold (spec §4.4.3).
        let threshold = initial_usdt / ONE_SIXTH;
        if bol.total_quantity * price < threshold {
            return Signal::trade(OrderSide::Sell, None, bol.total_quantity, "bol-grid cycle close");
        }

        let half = ctx.market.floor_quantity(bol.total_quantity / Decimal::TWO);
        if half.is_zero() || !meets_min_order_size(&ctx.market, half, price) {
            return Signal::trade(OrderSide::Sell, None, bol.total_quantity, "bol-grid cycle close (half below minimums)");
        }
        Signal::trade(OrderSide::Sell, None, half, "bol-grid partial sell")
    }
}
