//! Binance USDⓈ-M Futures adapter implementing `trading_core::exchange::ExchangeAdapter`.
//!
//! This crate is the "adapter" half of the core/adapter split described in
//! `trading_core::exchange`: the trait lives in `trading-core` so the
//! engine, order manager, and risk gate can depend on the abstraction
//! without pulling in `reqwest`; this crate provides the one concrete
//! implementation `trading-bins` wires in at startup.

pub mod binance;
pub mod rate_limiter;

pub use binance::BinanceAdapter;
pub use rate_limiter::IntervalLimiter;
