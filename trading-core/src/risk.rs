//! The Risk Gate: aggregate net-position bounds enforced immediately before
//! order submission (spec §4.8).
//!
//! Grounded on `risk/pre_trade.rs`'s `PreTradeValidator::validate(price,
//! size, mid_price) -> PreTradeResult` for the validator shape (one struct,
//! one `evaluate`-style entry point, a typed rejection enum); the specific
//! bound check — projected USD net position vs `{max_position_usd,
//! min_position_usd}` — is spec-specific and has no teacher counterpart,
//! which bounds position by base-asset quantity rather than USD notional.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::domain::order::OrderSide;
use crate::domain::strategy::Symbol;
use crate::errors::{PersistenceError, RiskError};
use crate::exchange::{ExchangeAdapter, ExchangeError};
use crate::persistence::StrategyStore;

#[derive(Debug, Error)]
pub enum RiskGateError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Denied(#[from] RiskError),
}

impl RiskGateError {
    pub fn as_denial(&self) -> Option<&RiskError> {
        match self {
            RiskGateError::Denied(err) => Some(err),
            _ => None,
        }
    }
}

/// Loads `position_limits.json` and the exchange's current aggregate
/// position on every call — no caching, since the bound it enforces must
/// reflect the latest exchange truth (spec §4.8).
pub struct RiskGate {
    store: Arc<StrategyStore>,
    adapter: Arc<dyn ExchangeAdapter>,
}

impl RiskGate {
    pub fn new(store: Arc<StrategyStore>, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self { store, adapter }
    }

    /// Evaluates a proposed trade against the aggregate net-position bound.
    /// Market orders (`target_price = None`) whose price cannot be
    /// resolved from the exchange are allowed through, fail-open, with a
    /// warning (spec §4.8).
    pub async fn evaluate(
        &self,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        target_price: Option<Decimal>,
    ) -> Result<(), RiskGateError> {
        let limits = self.store.load_position_limits()?;
        let snapshot = self.adapter.get_all_positions().await?;

        let price = match target_price {
            Some(p) => Some(p),
            None => self.adapter.get_current_price(symbol).await?,
        };
        let Some(price) = price else {
            warn!(%symbol, "risk gate: market order price unresolved, failing open");
            return Ok(());
        };

        let notional = quantity * price;
        let projected = match side {
            OrderSide::Buy => snapshot.net_position_usd + notional,
            OrderSide::Sell => snapshot.net_position_usd - notional,
        };

        let denied = match side {
            OrderSide::Buy => projected > limits.max_position_usd,
            OrderSide::Sell => projected < limits.min_position_usd,
        };

        if denied {
            return Err(RiskGateError::Denied(RiskError::PositionBoundExceeded {
                current: snapshot.net_position_usd.to_string(),
                projected: projected.to_string(),
                min: limits.min_position_usd.to_string(),
                max: limits.max_position_usd.to_string(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketInfo;
    use crate::domain::strategy::Timeframe;
    use crate::exchange::{OhlcvBar, OrderAck, OrderStatusReport, PositionsSnapshot};
    use crate::persistence::PositionLimits;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct FakeAdapter {
        net_usd: Decimal,
        price: Option<Decimal>,
    }

    #[async_trait]
    impl ExchangeAdapter for FakeAdapter {
        async fn fetch_markets(&self) -> Result<HashMap<Symbol, MarketInfo>, ExchangeError> {
            Ok(HashMap::new())
        }
        async fn get_current_price(&self, _symbol: Symbol) -> Result<Option<Decimal>, ExchangeError> {
            Ok(self.price)
        }
        async fn fetch_ohlcv(
            &self,
            _symbol: Symbol,
            _timeframe: Timeframe,
            _limit: usize,
        ) -> Result<Vec<OhlcvBar>, ExchangeError> {
            Ok(Vec::new())
        }
        async fn create_limit_order(
            &self,
            _symbol: Symbol,
            _side: OrderSide,
            _quantity: Decimal,
            _price: Decimal,
        ) -> Result<OrderAck, ExchangeError> {
            unreachable!("not exercised by risk gate tests")
        }
        async fn create_market_order(
            &self,
            _symbol: Symbol,
            _side: OrderSide,
            _quantity: Decimal,
        ) -> Result<OrderAck, ExchangeError> {
            unreachable!("not exercised by risk gate tests")
        }
        async fn cancel_order(&self, _symbol: Symbol, _order_id: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn check_order_status_detailed(
            &self,
            _symbol: Symbol,
            _order_ids: &[String],
        ) -> Result<Vec<OrderStatusReport>, ExchangeError> {
            Ok(Vec::new())
        }
        async fn get_all_positions(&self) -> Result<PositionsSnapshot, ExchangeError> {
            Ok(PositionsSnapshot {
                positions: Vec::new(),
                net_position_usd: self.net_usd,
                total_long_usd: self.net_usd.max(Decimal::ZERO),
                total_short_usd: (-self.net_usd).max(Decimal::ZERO),
            })
        }
    }

    fn gate(net_usd: Decimal, price: Option<Decimal>) -> (tempfile::TempDir, RiskGate) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StrategyStore::new(dir.path()));
        store
            .save_position_limits(&PositionLimits {
                max_position_usd: dec!(2000),
                min_position_usd: dec!(-1200),
                updated_at: chrono::Utc::now(),
            })
            .unwrap();
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(FakeAdapter { net_usd, price });
        (dir, RiskGate::new(store, adapter))
    }

    #[tokio::test]
    async fn allows_buy_within_bound() {
        let (_dir, gate) = gate(dec!(1000), None);
        let result = gate
            .evaluate(Symbol::BtcUsdt, OrderSide::Buy, dec!(0.01), Some(dec!(20000)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn denies_buy_that_exceeds_max_bound() {
        // Scenario 6: current net +1900, proposed buy notional 200 -> 2100 > 2000.
        let (_dir, gate) = gate(dec!(1900), None);
        let result = gate
            .evaluate(Symbol::BtcUsdt, OrderSide::Buy, dec!(0.01), Some(dec!(20000)))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().as_denial().is_some());
    }

    #[tokio::test]
    async fn denies_sell_that_breaches_min_bound() {
        let (_dir, gate) = gate(dec!(-1100), None);
        let result = gate
            .evaluate(Symbol::BtcUsdt, OrderSide::Sell, dec!(0.01), Some(dec!(20000)))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn market_order_with_unresolved_price_fails_open() {
        let (_dir, gate) = gate(dec!(1900), None);
        let result = gate
            .evaluate(Symbol::BtcUsdt, OrderSide::Buy, dec!(100), None)
            .await;
        assert!(result.is_ok());
    }
}
