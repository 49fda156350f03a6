use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Per-symbol exchange metadata, refreshed at most hourly (spec §4.1/§4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketInfo {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
    pub current_price: Decimal,
}

impl MarketInfo {
    /// Round a price to the nearest `tick_size`, half-away-from-zero — the
    /// original bot's `utils.py` uses `ROUND_HALF_UP`, which for positive
    /// prices is equivalent to `MidpointAwayFromZero` (spec §3 SUPPLEMENT).
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size.is_zero() {
            return price;
        }
        let ticks = (price / self.tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        ticks * self.tick_size
    }

    /// Floor a quantity to the nearest `step_size`.
    pub fn floor_quantity(&self, quantity: Decimal) -> Decimal {
        if self.step_size.is_zero() {
            return quantity;
        }
        let steps = (quantity / self.step_size).trunc();
        steps * self.step_size
    }

    pub fn meets_minimums(&self, quantity: Decimal, price: Decimal) -> bool {
        quantity >= self.min_qty && (quantity * price) >= self.min_notional
    }

    /// Decimal scale implied by `step_size`, used by callers that need an
    /// integer precision (e.g. formatting an order quantity for the wire).
    pub fn quantity_precision(&self) -> u32 {
        self.step_size.scale().max(0).to_u32().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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
    fn rounds_price_to_tick() {
        let m = market();
        assert_eq!(m.round_price(dec!(29980.04)), dec!(29980.0));
        assert_eq!(m.round_price(dec!(29980.06)), dec!(29980.1));
    }

    #[test]
    fn floors_quantity_to_step() {
        let m = market();
        assert_eq!(m.floor_quantity(dec!(0.0019)), dec!(0.001));
        assert_eq!(m.floor_quantity(dec!(0.0029)), dec!(0.002));
    }

    #[test]
    fn rejects_below_minimums() {
        let m = market();
        assert!(!m.meets_minimums(dec!(0.0001), dec!(30000)));
        assert!(m.meets_minimums(dec!(0.001), dec!(30000)));
    }
}
