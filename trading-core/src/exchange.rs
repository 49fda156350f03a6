//! The Exchange Adapter capability contract (spec §4.1).
//!
//! This trait is defined in `trading-core` (not `trading-exchange`) so that
//! `order_manager`, `engine`, and `risk` — all in this crate — can depend on
//! the *abstraction* without depending on the concrete `reqwest`-based
//! implementation. `trading-exchange` depends on `trading-core` and provides
//! `BinanceAdapter: ExchangeAdapter`; `trading-bins` wires the concrete type
//! in. This is the conventional "core defines the port, adapter crate
//! provides it" shape and avoids a dependency cycle between the two crates.
//!
//! Grounded on `aibysid-HyperLiquidMM/backend/mm-engine-rs/src/exchange.rs`'s
//! `#[async_trait] trait ExchangeClient` for the one-trait, one-implementor,
//! typed-`Result`-everywhere shape.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::market::MarketInfo;
use crate::domain::order::{ExchangeOrderStatus, OrderSide, OrderType};
use crate::domain::strategy::{Symbol, Timeframe};

#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    #[error("transient exchange error: {0}")]
    Transient(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("order not found")]
    OrderNotFound,
    #[error("authentication failure: {0}")]
    Auth(String),
    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

impl ExchangeError {
    /// Transient errors are logged and retried on the next tick with no
    /// state mutation (spec §7); everything else is surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_) | ExchangeError::RateLimited(_))
    }
}

/// One OHLCV bar: `[ts_ms, open, high, low, close, volume]` per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcvBar {
    pub ts_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub status: ExchangeOrderStatus,
}

#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub order_id: String,
    pub status: ExchangeOrderStatus,
    pub filled_qty: Decimal,
    pub remaining_qty: Decimal,
    pub average_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct PositionEntry {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub notional_usd: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct PositionsSnapshot {
    pub positions: Vec<PositionEntry>,
    pub net_position_usd: Decimal,
    pub total_long_usd: Decimal,
    pub total_short_usd: Decimal,
}

/// The narrow, rate-limited capability set the core consumes (spec §4.1).
/// A single adapter instance is shared process-wide; its rate limiter
/// enforces the minimum inter-request interval for every call below.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Fetches and filters to linear USDT perpetual symbols. Callers cache
    /// this with a ~1h TTL (spec §4.7); the adapter itself does not cache.
    async fn fetch_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, ExchangeError>;

    async fn get_current_price(&self, symbol: Symbol) -> Result<Option<Decimal>, ExchangeError>;

    /// Most recent bar may still be open; callers use the second-to-last
    /// bar as "last closed" (spec §4.1).
    async fn fetch_ohlcv(
        &self,
        symbol: Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, ExchangeError>;

    async fn create_limit_order(
        &self,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderAck, ExchangeError>;

    async fn create_market_order(
        &self,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError>;

    /// Idempotent: an order-not-found response counts as success (spec
    /// §4.1, §7).
    async fn cancel_order(&self, symbol: Symbol, order_id: &str) -> Result<(), ExchangeError>;

    async fn check_order_status_detailed(
        &self,
        symbol: Symbol,
        order_ids: &[String],
    ) -> Result<Vec<OrderStatusReport>, ExchangeError>;

    /// Authoritative source for the risk gate (spec §4.8).
    async fn get_all_positions(&self) -> Result<PositionsSnapshot, ExchangeError>;
}

/// `order_type` passed to the adapter's generic order helper used by the
/// Order Manager; kept as a thin enum so `order_manager` doesn't need to
/// match on `create_limit_order` vs `create_market_order` at every call
/// site.
#[derive(Debug, Clone, Copy)]
pub enum OrderIntent {
    Limit { price: Decimal },
    Market,
}

impl OrderIntent {
    pub fn order_type(&self) -> OrderType {
        match self {
            OrderIntent::Limit { .. } => OrderType::Limit,
            OrderIntent::Market => OrderType::Market,
        }
    }
}
