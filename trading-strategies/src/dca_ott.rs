//! DCA+OTT (spec §4.4.2): a LIFO dollar-cost-averaging ladder gated by the
//! OTT trend filter, with geometric sizing on each additional buy.
//!
//! No teacher equivalent — implemented directly from spec §4.4.2, in the
//! teacher's `StrategyHandler` idiom.

use chrono::Utc;
use rust_decimal::{Decimal, MathematicalOps};
use tracing::debug;

use trading_core::domain::order::OrderSide;
use trading_core::domain::state::{DcaLot, DcaState, OttMode, PositionBook, State, StateVariant};
use trading_core::domain::strategy::{Strategy, StrategyParameters};
use trading_core::domain::trade::Trade;
use trading_core::errors::DomainError;
use trading_core::handler::{Signal, SignalContext, StrategyHandler};
use trading_core::pnl::process_trade_fill;

use crate::validation::{has_open_orders, meets_min_order_size, validate_dca_ott, within_guardrails};

const DEFAULT_INITIAL_BALANCE: Decimal = rust_decimal_macros::dec!(10000);
const HUNDRED: Decimal = rust_decimal_macros::dec!(100);

pub struct DcaOttHandler;

impl DcaOttHandler {
    pub fn new() -> Self {
        Self
    }

    fn params(
        strategy: &Strategy,
    ) -> Option<(Decimal, Decimal, Decimal, Decimal)> {
        match strategy.parameters {
            StrategyParameters::DcaOtt {
                base_usdt,
                dca_multiplier,
                min_drop_pct,
                profit_threshold_pct,
            } => Some((base_usdt, dca_multiplier, min_drop_pct, profit_threshold_pct)),
            _ => None,
        }
    }
}

impl Default for DcaOttHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn total_quantity(lots: &[DcaLot]) -> Decimal {
    lots.iter().map(|l| l.quantity).sum()
}

fn weighted_avg_cost(lots: &[DcaLot]) -> Option<Decimal> {
    let qty = total_quantity(lots);
    if qty.is_zero() {
        return None;
    }
    let notional: Decimal = lots.iter().map(|l| l.price * l.quantity).sum();
    Some(notional / qty)
}

impl StrategyHandler for DcaOttHandler {
    fn strategy_type(&self) -> trading_core::domain::strategy::StrategyType {
        trading_core::domain::strategy::StrategyType::DcaOtt
    }

    fn initialize_state(&self, strategy: &Strategy) -> State {
        State::new(
            strategy.id.clone(),
            strategy.symbol,
            StateVariant::DcaOtt(DcaState {
                position: PositionBook::flat(DEFAULT_INITIAL_BALANCE),
                dca_positions: Vec::new(),
                cycle_number: 0,
                cycle_trade_count: 0,
            }),
        )
    }

    fn validate_strategy_config(&self, strategy: &Strategy) -> Result<(), String> {
        let (_, dca_multiplier, min_drop_pct, profit_threshold_pct) = Self::params(strategy)
            .ok_or_else(|| "strategy is not a DCA+OTT configuration".to_string())?;
        validate_dca_ott(dca_multiplier, min_drop_pct, profit_threshold_pct)?;
        if let Some(ott) = strategy.ott {
            ott.validate()?;
        } else {
            return Err("DCA+OTT requires an ott configuration".to_string());
        }
        strategy.validate_guardrails()
    }

    fn calculate_signal(&self, strategy: &Strategy, state: &State, ctx: &SignalContext<'_>) -> Signal {
        let Some((base_usdt, dca_multiplier, min_drop_pct, profit_threshold_pct)) = Self::params(strategy)
        else {
            return Signal::none("strategy parameters are not DCA+OTT");
        };
        let Some(dca) = state.variant.as_dca() else {
            return Signal::none("state is not a DCA+OTT state");
        };
        let Some(ott) = ctx.ott else {
            return Signal::none("insufficient data for OTT");
        };
        if has_open_orders(state) {
            return Signal::none("duplicate open order already exists");
        }

        let price = ctx.current_price;

        if ott.mode == OttMode::Al {
            return self.buy_signal(strategy, dca, price, base_usdt, dca_multiplier, min_drop_pct, ctx);
        }
        if ott.mode == OttMode::Sat && !dca.dca_positions.is_empty() {
            return self.sell_signal(strategy, dca, price, profit_threshold_pct, ctx);
        }
        Signal::none("no DCA signal this tick")
    }

    fn process_fill(
        &self,
        _strategy: &Strategy,
        state: &mut State,
        trade: &mut Trade,
    ) -> Result<Decimal, DomainError> {
        let realized = process_trade_fill(state.variant.position_mut(), trade)?;

        let Some(dca) = state.variant.as_dca_mut() else {
            return Err(DomainError::InvariantViolation(
                "process_fill called on non-DCA+OTT state".to_string(),
            ));
        };

        match trade.side {
            OrderSide::Buy => {
                if dca.dca_positions.iter().any(|l| l.order_id == trade.order_id) {
                    return Err(DomainError::DuplicateFill(trade.order_id.clone()));
                }
                let was_empty = dca.dca_positions.is_empty();
                dca.dca_positions.push(DcaLot {
                    buy_price: trade.price,
                    quantity: trade.quantity,
                    timestamp: Utc::now(),
                    order_id: trade.order_id.clone(),
                });
                if was_empty {
                    dca.cycle_number += 1;
                    dca.cycle_trade_count = 1;
                } else {
                    dca.cycle_trade_count += 1;
                }
                trade.cycle_info = Some(format!("D{}-{}", dca.cycle_number, dca.cycle_trade_count));
            }
            OrderSide::Sell => {
                let total = total_quantity(&dca.dca_positions);
                if trade.quantity >= total {
                    // Full exit: clear the ladder, preserve cycle_number.
                    dca.dca_positions.clear();
                    dca.cycle_trade_count = 0;
                } else if let Some(last) = dca.dca_positions.pop() {
                    // Partial exit: LIFO pop of the most recent lot only.
                    debug_assert_eq!(last.quantity, trade.quantity);
                }
            }
        }

        Ok(realized)
    }
}

impl DcaOttHandler {
    #[allow(clippy::too_many_arguments)]
    fn buy_signal(
        &self,
        strategy: &Strategy,
        dca: &DcaState,
        price: Decimal,
        base_usdt: Decimal,
        dca_multiplier: Decimal,
        min_drop_pct: Decimal,
        ctx: &SignalContext<'_>,
    ) -> Signal {
        let notional = if dca.dca_positions.is_empty() {
            base_usdt
        } else {
            let first_buy_price = dca.dca_positions.first().expect("non-empty").buy_price;
            let last_buy_price = dca.dca_positions.last().expect("non-empty").buy_price;
            if price >= first_buy_price {
                return Signal::none("price has not stayed below the cycle's initial entry");
            }
            if price > last_buy_price {
                return Signal::none("price is not a lower low than the last buy");
            }
            let drop_from_last = (last_buy_price - price) / last_buy_price * HUNDRED;
            if drop_from_last < min_drop_pct {
                return Signal::none("drop from last buy below min_drop_pct");
            }
            let n = Decimal::from(dca.dca_positions.len() as u64);
            base_usdt * dca_multiplier.powd(n)
        };

        if !within_guardrails(strategy, price) {
            return Signal::none("price outside guardrails");
        }
        let quantity = ctx.market.floor_quantity(notional / price);
        if !meets_min_order_size(&ctx.market, quantity, price) {
            return Signal::none("quantity below exchange minimums");
        }
        debug!(strategy_id = %strategy.id, %price, %notional, "dca buy signal");
        Signal::trade(OrderSide::Buy, None, quantity, "dca buy")
    }

    fn sell_signal(
        &self,
        strategy: &Strategy,
        dca: &DcaState,
        price: Decimal,
        profit_threshold_pct: Decimal,
        ctx: &SignalContext<'_>,
    ) -> Signal {
        let avg_cost = match weighted_avg_cost(&dca.dca_positions) {
            Some(a) => a,
            None => return Signal::none("no open lots to exit"),
        };
        let total = total_quantity(&dca.dca_positions);
        let full_exit_trigger = avg_cost * (Decimal::ONE + profit_threshold_pct / HUNDRED);

        if price >= full_exit_trigger {
            if !within_guardrails(strategy, price) {
                return Signal::none("price outside guardrails");
            }
            return Signal::trade(OrderSide::Sell, None, total, "dca full exit");
        }

        let last_buy_price = dca.dca_positions.last().expect("non-empty checked above").buy_price;
        let partial_exit_trigger = last_buy_price * (Decimal::ONE + profit_threshold_pct / HUNDRED);
        if price >= partial_exit_trigger {
            let lot_qty = dca.dca_positions.last().expect("non-empty checked above").quantity;
            if !within_guardrails(strategy, price) {
                return Signal::none("price outside guardrails");
            }
            if !meets_min_order_size(&ctx.market, lot_qty, price) {
                return Signal::none("lot quantity below exchange minimums");
            }
            return Signal::trade(OrderSide::Sell, None, lot_qty, "dca partial exit (LIFO)");
        }

        Signal::none("no DCA sell signal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use trading_core::domain::market::MarketInfo;
    use trading_core::domain::strategy::{OttConfig, Symbol, Timeframe};
    use trading_core::indicators::OttResult;

    fn strategy() -> Strategy {
        Strategy {
            id: "d1".into(),
            name: "dca".into(),
            symbol: Symbol::BtcUsdt,
            timeframe: Timeframe::H1,
            parameters: StrategyParameters::DcaOtt {
                base_usdt: dec!(100),
                dca_multiplier: dec!(1.5),
                min_drop_pct: dec!(2.0),
                profit_threshold_pct: dec!(1.0),
            },
            ott: Some(OttConfig {
                period: 20,
                opt: dec!(2.0),
            }),
            price_min: None,
            price_max: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            extra: Default::default(),
        }
    }

    fn market() -> MarketInfo {
        MarketInfo {
            tick_size: dec!(0.1),
            step_size: dec!(0.0001),
            min_qty: dec!(0.0001),
            min_notional: dec!(5),
            current_price: dec!(30000),
        }
    }

    fn al_ctx(price: Decimal) -> SignalContext<'static> {
        SignalContext {
            current_price: price,
            ott: Some(OttResult {
                mode: OttMode::Al,
                baseline: price,
                upper: price,
                lower: price,
                current_price: price,
            }),
            recent_ohlcv: &[],
            market: market(),
        }
    }

    fn sat_ctx(price: Decimal) -> SignalContext<'static> {
        SignalContext {
            current_price: price,
            ott: Some(OttResult {
                mode: OttMode::Sat,
                baseline: price,
                upper: price,
                lower: price,
                current_price: price,
            }),
            recent_ohlcv: &[],
            market: market(),
        }
    }

    #[test]
    fn first_buy_uses_base_notional() {
        let handler = DcaOttHandler::new();
        let strat = strategy();
        let state = handler.initialize_state(&strat);
        let ctx = al_ctx(dec!(100));
        let signal = handler.calculate_signal(&strat, &state, &ctx);
        assert!(signal.should_trade);
        assert_eq!(signal.side, Some(OrderSide::Buy));
        assert_eq!(signal.quantity, Some(dec!(1.0000)));
    }

    #[test]
    fn second_buy_requires_min_drop_from_last() {
        let handler = DcaOttHandler::new();
        let strat = strategy();
        let mut state = handler.initialize_state(&strat);
        let dca = state.variant.as_dca_mut().unwrap();
        dca.dca_positions.push(DcaLot {
            buy_price: dec!(100),
            quantity: dec!(1),
            timestamp: Utc::now(),
            order_id: "o1".into(),
        });
        // drop of 1% < min_drop_pct of 2% -> no signal
        let ctx = al_ctx(dec!(99));
        let signal = handler.calculate_signal(&strat, &state, &ctx);
        assert!(!signal.should_trade);
    }

    #[test]
    fn full_exit_sells_total_quantity() {
        let handler = DcaOttHandler::new();
        let strat = strategy();
        let mut state = handler.initialize_state(&strat);
        let dca = state.variant.as_dca_mut().unwrap();
        dca.dca_positions.push(DcaLot {
            buy_price: dec!(100),
            quantity: dec!(1),
            timestamp: Utc::now(),
            order_id: "o1".into(),
        });
        let ctx = sat_ctx(dec!(102));
        let signal = handler.calculate_signal(&strat, &state, &ctx);
        assert!(signal.should_trade);
        assert_eq!(signal.quantity, Some(dec!(1)));
    }

    #[test]
    fn fill_reducer_tags_cycle_info_on_first_buy() {
        let handler = DcaOttHandler::new();
        let strat = strategy();
        let mut state = handler.initialize_state(&strat);
        let mut trade = Trade::new("d1", OrderSide::Buy, dec!(100), dec!(1), "o1");
        handler.process_fill(&strat, &mut state, &mut trade).unwrap();
        assert_eq!(trade.cycle_info, Some("D1-1".to_string()));
        assert_eq!(state.variant.as_dca().unwrap().dca_positions.len(), 1);
    }
}
