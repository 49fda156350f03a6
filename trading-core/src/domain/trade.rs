use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderSide;

/// An append-only record of one fill (spec §3). Write-once; never mutated
/// or deleted (invariant 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub strategy_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub order_id: String,
    pub commission: Option<Decimal>,
    /// The originating order's limit price, if any (distinct from `price`,
    /// which is the average fill price reported by the exchange).
    pub limit_price: Option<Decimal>,
    /// Freeform cycle tag, e.g. `D3-2` for DCA, or `C2-1` for Bol-Grid.
    pub cycle_info: Option<String>,
    /// Grid-specific fields; populated only for Grid+OTT fills.
    pub z: Option<i64>,
    pub gf_before: Option<Decimal>,
    pub gf_after: Option<Decimal>,
}

impl Trade {
    pub fn new(
        strategy_id: impl Into<String>,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        order_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            strategy_id: strategy_id.into(),
            side,
            price,
            quantity,
            notional: price * quantity,
            order_id: order_id.into(),
            commission: None,
            limit_price: None,
            cycle_info: None,
            z: None,
            gf_before: None,
            gf_after: None,
        }
    }
}

/// CSV header for `trades.csv` (spec §6), used by `persistence::store`.
pub const TRADES_CSV_HEADER: &[&str] = &[
    "timestamp",
    "strategy_id",
    "side",
    "price",
    "quantity",
    "z",
    "notional",
    "gf_before",
    "gf_after",
    "commission",
    "order_id",
    "limit_price",
    "cycle_info",
];
