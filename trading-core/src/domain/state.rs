//! Per-strategy mutable state.
//!
//! The original source kept a free-form per-strategy dictionary
//! (`custom_data`) whose shape depended on `strategy_type`. Per spec §9 this
//! is re-architected as a tagged variant (`StateVariant`) discriminated by
//! `strategy_type`, with the universal position/P&L fields factored onto a
//! shared `PositionBook`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::strategy::{StrategyType, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OttMode {
    Al,
    Sat,
}

/// The universal position/P&L fields every strategy type carries (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionBook {
    pub initial_balance: Decimal,
    pub cash_balance: Decimal,
    pub realized_pnl: Decimal,
    /// Signed: > 0 long, < 0 short, 0 flat.
    pub position_quantity: Decimal,
    pub position_avg_cost: Option<Decimal>,
    pub position_side: Option<PositionSide>,
}

impl PositionBook {
    pub fn flat(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            cash_balance: initial_balance,
            realized_pnl: Decimal::ZERO,
            position_quantity: Decimal::ZERO,
            position_avg_cost: None,
            position_side: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position_quantity.is_zero()
    }
}

/// A single open DCA lot (spec §3, `dca_positions[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaLot {
    pub buy_price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridState {
    pub position: PositionBook,
    /// Grid Foundation price; `None` until the first observed price
    /// initializes it.
    pub gf: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaState {
    pub position: PositionBook,
    pub dca_positions: Vec<DcaLot>,
    pub cycle_number: u64,
    pub cycle_trade_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BollingerSnapshot {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BolGridState {
    pub position: PositionBook,
    pub positions: Vec<DcaLot>,
    pub average_cost: Option<Decimal>,
    pub total_quantity: Decimal,
    pub cycle_number: u64,
    pub cycle_step: u64,
    pub cycle_trades: u64,
    pub last_buy_price: Option<Decimal>,
    pub last_sell_price: Option<Decimal>,
    pub last_bollinger: Option<BollingerSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateVariant {
    GridOtt(GridState),
    DcaOtt(DcaState),
    BolGrid(BolGridState),
}

impl StateVariant {
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StateVariant::GridOtt(_) => StrategyType::GridOtt,
            StateVariant::DcaOtt(_) => StrategyType::DcaOtt,
            StateVariant::BolGrid(_) => StrategyType::BolGrid,
        }
    }

    pub fn position(&self) -> &PositionBook {
        match self {
            StateVariant::GridOtt(s) => &s.position,
            StateVariant::DcaOtt(s) => &s.position,
            StateVariant::BolGrid(s) => &s.position,
        }
    }

    pub fn position_mut(&mut self) -> &mut PositionBook {
        match self {
            StateVariant::GridOtt(s) => &mut s.position,
            StateVariant::DcaOtt(s) => &mut s.position,
            StateVariant::BolGrid(s) => &mut s.position,
        }
    }

    pub fn as_grid(&self) -> Option<&GridState> {
        match self {
            StateVariant::GridOtt(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_grid_mut(&mut self) -> Option<&mut GridState> {
        match self {
            StateVariant::GridOtt(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dca(&self) -> Option<&DcaState> {
        match self {
            StateVariant::DcaOtt(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dca_mut(&mut self) -> Option<&mut DcaState> {
        match self {
            StateVariant::DcaOtt(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bol_grid(&self) -> Option<&BolGridState> {
        match self {
            StateVariant::BolGrid(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bol_grid_mut(&mut self) -> Option<&mut BolGridState> {
        match self {
            StateVariant::BolGrid(s) => Some(s),
            _ => None,
        }
    }
}

/// One mutable state record per strategy (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub strategy_id: String,
    pub symbol: Symbol,
    /// Timestamp of the last closed bar already processed; the engine's
    /// idempotence key on the bar boundary. Must never decrease (invariant
    /// 6 / property P9).
    pub last_bar_timestamp: Option<DateTime<Utc>>,
    pub last_ott_mode: Option<OttMode>,
    /// Cached exchange view of open orders; the Order Manager's on-disk WAL
    /// is the authoritative source.
    pub open_orders: Vec<String>,
    pub variant: StateVariant,
    pub last_update: DateTime<Utc>,
    /// Consecutive tick-processing errors; resets to 0 on success, and at 5
    /// the engine auto-deactivates the strategy (spec §4.6 step 11).
    pub consecutive_errors: u32,
}

impl State {
    pub fn new(strategy_id: impl Into<String>, symbol: Symbol, variant: StateVariant) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol,
            last_bar_timestamp: None,
            last_ott_mode: None,
            open_orders: Vec::new(),
            variant,
            last_update: Utc::now(),
            consecutive_errors: 0,
        }
    }

    pub fn strategy_type(&self) -> StrategyType {
        self.variant.strategy_type()
    }

    pub fn position(&self) -> &PositionBook {
        self.variant.position()
    }
}
