//! Grid+OTT (spec §4.4.1): a grid anchored to a moving "Grid Foundation"
//! (`gf`), sized and directed by the OTT trend filter.
//!
//! No teacher equivalent — the teacher's market-making grid quotes both
//! sides continuously off the mid-price; this grid places at most one
//! directional order per tick off a Grid Foundation that itself walks with
//! fills. Implemented directly from spec §4.4.1, in the teacher's
//! `StrategyHandler` idiom.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use trading_core::domain::order::OrderSide;
use trading_core::domain::state::{GridState, OttMode, PositionBook, State, StateVariant};
use trading_core::domain::strategy::{Strategy, StrategyParameters};
use trading_core::domain::trade::Trade;
use trading_core::errors::DomainError;
use trading_core::handler::{Signal, SignalContext, StrategyHandler};
use trading_core::pnl::process_trade_fill;

use crate::validation::{has_open_orders, meets_min_order_size, validate_grid_ott, within_guardrails};

/// Starting balance handed to a fresh `PositionBook`; the grid itself
/// tracks notional exposure rather than margin, so this is a bookkeeping
/// seed rather than a risk limit (spec §3).
const DEFAULT_INITIAL_BALANCE: Decimal = dec!(10000);

pub struct GridOttHandler;

impl GridOttHandler {
    pub fn new() -> Self {
        Self
    }

    fn params(strategy: &Strategy) -> Option<(Decimal, Decimal)> {
        match strategy.parameters {
            StrategyParameters::GridOtt { y, usdt_grid } => Some((y, usdt_grid)),
            _ => None,
        }
    }
}

impl Default for GridOttHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyHandler for GridOttHandler {
    fn strategy_type(&self) -> trading_core::domain::strategy::StrategyType {
        trading_core::domain::strategy::StrategyType::GridOtt
    }

    fn initialize_state(&self, strategy: &Strategy) -> State {
        State::new(
            strategy.id.clone(),
            strategy.symbol,
            StateVariant::GridOtt(GridState {
                position: PositionBook::flat(DEFAULT_INITIAL_BALANCE),
                gf: None,
            }),
        )
    }

    fn validate_strategy_config(&self, strategy: &Strategy) -> Result<(), String> {
        let (y, usdt_grid) =
            Self::params(strategy).ok_or_else(|| "strategy is not a Grid+OTT configuration".to_string())?;
        validate_grid_ott(y, usdt_grid)?;
        if let Some(ott) = strategy.ott {
            ott.validate()?;
        } else {
            return Err("Grid+OTT requires an ott configuration".to_string());
        }
        strategy.validate_guardrails()
    }

    fn calculate_signal(&self, strategy: &Strategy, state: &State, ctx: &SignalContext<'_>) -> Signal {
        let Some((y, usdt_grid)) = Self::params(strategy) else {
            return Signal::none("strategy parameters are not Grid+OTT");
        };
        let Some(grid) = state.variant.as_grid() else {
            return Signal::none("state is not a Grid+OTT state");
        };
        let Some(ott) = ctx.ott else {
            return Signal::none("insufficient data for OTT");
        };

        // First observed price seeds the Grid Foundation (spec §4.4.1); no
        // signal on the seeding tick itself.
        let Some(gf) = grid.gf else {
            return Signal::none("grid foundation not yet initialized");
        };

        if has_open_orders(state) {
            return Signal::none("duplicate open order already exists");
        }

        let price = ctx.current_price;
        let delta = (price - gf).abs();
        let z = (delta / y).trunc();
        if z < Decimal::ONE {
            return Signal::none("|price - gf| has not cleared one grid spacing");
        }
        let Some(z_units) = z.to_i64() else {
            return Signal::none("grid multiplier z does not fit in i64");
        };

        let (side, raw_target) = if ott.mode == OttMode::Al && price < gf && delta > y {
            (OrderSide::Buy, gf - z * y)
        } else if ott.mode == OttMode::Sat && price > gf && delta > y {
            (OrderSide::Sell, gf + z * y)
        } else {
            return Signal::none("no grid crossing this tick");
        };

        let target = ctx.market.round_price(raw_target);
        if !within_guardrails(strategy, target) {
            return Signal::none("target price outside guardrails");
        }

        let notional = Decimal::from(z_units) * usdt_grid;
        let quantity = ctx.market.floor_quantity(notional / target);
        if !meets_min_order_size(&ctx.market, quantity, target) {
            return Signal::none("quantity below exchange minimums");
        }

        debug!(strategy_id = %strategy.id, %gf, %z_units, %target, ?side, "grid signal");
        let mut signal = Signal::trade(side, Some(target), quantity, format!("grid z={z_units} gf={gf}"));
        signal.z = Some(z_units);
        signal
    }

    fn process_fill(
        &self,
        _strategy: &Strategy,
        state: &mut State,
        trade: &mut Trade,
    ) -> Result<Decimal, DomainError> {
        let realized = process_trade_fill(state.variant.position_mut(), trade)?;

        let Some(grid) = state.variant.as_grid_mut() else {
            return Err(DomainError::InvariantViolation(
                "process_fill called on non-Grid+OTT state".to_string(),
            ));
        };

        // First fill ever seeds the foundation at the fill price; subsequent
        // fills walk it by the grid spacing in the fill's direction (spec
        // §4.4.1's fill reducer).
        let gf_before = grid.gf.unwrap_or(trade.price);
        let z = trade.z.unwrap_or(1);
        let spacing = (trade.price - gf_before).abs() / Decimal::ONE.max(Decimal::from(z));
        let gf_after = match trade.side {
            OrderSide::Buy => gf_before - spacing,
            OrderSide::Sell => gf_before + spacing,
        };
        grid.gf = Some(gf_after);

        trade.gf_before = Some(gf_before);
        trade.gf_after = Some(gf_after);

        Ok(realized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use trading_core::domain::market::MarketInfo;
    use trading_core::domain::order::OrderSide;
    use trading_core::domain::strategy::{OttConfig, Symbol, Timeframe};
    use trading_core::indicators::OttResult;

    fn strategy() -> Strategy {
        Strategy {
            id: "g1".into(),
            name: "grid".into(),
            symbol: Symbol::BtcUsdt,
            timeframe: Timeframe::H1,
            parameters: StrategyParameters::GridOtt {
                y: dec!(100),
                usdt_grid: dec!(50),
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
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
            current_price: dec!(30000),
        }
    }

    #[test]
    fn no_signal_until_grid_foundation_initialized() {
        let handler = GridOttHandler::new();
        let strat = strategy();
        let state = handler.initialize_state(&strat);
        let ctx = SignalContext {
            current_price: dec!(30000),
            ott: Some(OttResult {
                mode: OttMode::Al,
                baseline: dec!(29900),
                upper: dec!(30500),
                lower: dec!(29300),
                current_price: dec!(30000),
            }),
            recent_ohlcv: &[],
            market: market(),
        };
        let signal = handler.calculate_signal(&strat, &state, &ctx);
        assert!(!signal.should_trade);
    }

    #[test]
    fn buy_signal_emitted_when_al_below_gf_past_spacing() {
        let handler = GridOttHandler::new();
        let strat = strategy();
        let mut state = handler.initialize_state(&strat);
        state.variant.as_grid_mut().unwrap().gf = Some(dec!(30000));
        let ctx = SignalContext {
            current_price: dec!(29850),
            ott: Some(OttResult {
                mode: OttMode::Al,
                baseline: dec!(29900),
                upper: dec!(30400),
                lower: dec!(29300),
                current_price: dec!(29850),
            }),
            recent_ohlcv: &[],
            market: market(),
        };
        let signal = handler.calculate_signal(&strat, &state, &ctx);
        assert!(signal.should_trade);
        assert_eq!(signal.side, Some(OrderSide::Buy));
        assert_eq!(signal.target_price, Some(dec!(29900.0)));
    }

    #[test]
    fn fill_reducer_walks_gf_against_buy_direction() {
        let handler = GridOttHandler::new();
        let strat = strategy();
        let mut state = handler.initialize_state(&strat);
        state.variant.as_grid_mut().unwrap().gf = Some(dec!(30000));
        let mut trade = Trade::new("g1", OrderSide::Buy, dec!(29900), dec!(0.01), "o1");
        trade.z = Some(1);
        handler.process_fill(&strat, &mut state, &mut trade).unwrap();
        assert_eq!(state.variant.as_grid().unwrap().gf, Some(dec!(29900)));
        assert_eq!(trade.gf_before, Some(dec!(30000)));
        assert_eq!(trade.gf_after, Some(dec!(29900)));
    }

    #[test]
    fn duplicate_open_order_suppresses_signal() {
        let handler = GridOttHandler::new();
        let strat = strategy();
        let mut state = handler.initialize_state(&strat);
        state.variant.as_grid_mut().unwrap().gf = Some(dec!(30000));
        state.open_orders.push("existing".into());
        let ctx = SignalContext {
            current_price: dec!(29800),
            ott: Some(OttResult {
                mode: OttMode::Al,
                baseline: dec!(29850),
                upper: dec!(30400),
                lower: dec!(29300),
                current_price: dec!(29800),
            }),
            recent_ohlcv: &[],
            market: market(),
        };
        let signal = handler.calculate_signal(&strat, &state, &ctx);
        assert!(!signal.should_trade);
    }
}
