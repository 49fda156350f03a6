//! Core trading engine for a multi-strategy perpetual-futures bot.
//!
//! The engine runs a fleet of user-configured strategies through a single
//! cooperative scheduler loop: each strategy observes market data, emits
//! buy/sell intents, manages outstanding orders against an exchange,
//! reconciles fills, and maintains persistent per-strategy state (positions,
//! cycles, realized/unrealized P&L). Strategies are visited one at a time
//! per pass, never concurrently.
//!
//! ## Core modules
//! - `domain`: `Strategy`, `State` (tagged over strategy type), `Trade`,
//!   `PendingOrder`, `MarketInfo`.
//! - `errors`: typed error enums shared across the crate.
//! - `indicators`: pure EMA/SMA/OTT/Bollinger-Bands functions.
//! - `pnl`: the weighted-average-cost P&L fold.
//! - `persistence`: atomic file I/O and the on-disk store layout.
//! - `order_manager`: the crash-safe WAL and exchange reconciliation.
//! - `risk`: the aggregate net-position gate.
//! - `health`: per-strategy structural validation and auto-disable.
//! - `engine`: the per-strategy tick procedure.
//! - `scheduler`: the cooperative driver loop.
//! - `notify`: fire-and-forget notification sinks.
//! - `config`: environment-driven engine configuration.
//! - `logging`: `tracing` initialization.

pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod health;
pub mod indicators;
pub mod logging;
pub mod notify;
pub mod order_manager;
pub mod persistence;
pub mod pnl;
pub mod risk;
pub mod scheduler;

pub use errors::{DomainError, PersistenceError, RiskError, ValidationError};

/// Prelude for convenient imports by downstream crates (`trading-strategies`,
/// `trading-bins`).
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::domain::market::MarketInfo;
    pub use crate::domain::order::{OrderSide, OrderType, PendingOrder, PendingOrderStatus};
    pub use crate::domain::state::{BolGridState, DcaLot, DcaState, GridState, State};
    pub use crate::domain::strategy::{Strategy, StrategyType, Symbol, Timeframe};
    pub use crate::domain::trade::Trade;
    pub use crate::engine::{EngineError, MarketCache, StrategyEngine, TickOutcome};
    pub use crate::errors::{DomainError, PersistenceError, RiskError, ValidationError};
    pub use crate::exchange::{ExchangeAdapter, ExchangeError, OhlcvBar, OrderAck, OrderStatusReport};
    pub use crate::handler::{Signal, SignalContext, StrategyHandler};
    pub use crate::health::{HealthMonitor, HealthReport, Severity};
    pub use crate::indicators::{bollinger_bands, ema, ott, sma, OttResult};
    pub use crate::notify::NotificationSink;
    pub use crate::order_manager::OrderManager;
    pub use crate::persistence::StrategyStore;
    pub use crate::risk::RiskGate;
    pub use crate::scheduler::{Scheduler, ShutdownSignal};
}
