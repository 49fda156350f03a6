//! Concrete `StrategyHandler` implementations (spec §4.4): Grid+OTT,
//! DCA+OTT, and Bol-Grid. The capability trait and its supporting types
//! (`Signal`, `SignalContext`) live in `trading_core::handler`; this crate
//! provides the three handlers `trading-bins` registers with the engine.

pub mod bol_grid;
pub mod dca_ott;
pub mod grid_ott;
pub mod validation;

pub use bol_grid::BolGridHandler;
pub use dca_ott::DcaOttHandler;
pub use grid_ott::GridOttHandler;
