//! Property-based checks of the P&L fold's invariants (spec §4.3, §9) over
//! random fill sequences, complementing `pnl.rs`'s example-based unit
//! tests with `proptest`-generated cases.

use proptest::prelude::*;
use rust_decimal::Decimal;

use trading_core::domain::order::OrderSide;
use trading_core::domain::state::PositionBook;
use trading_core::domain::trade::Trade;
use trading_core::pnl::process_trade_fill;

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=200_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000).prop_map(|units| Decimal::new(units, 4))
}

fn side_strategy() -> impl Strategy<Value = OrderSide> {
    prop_oneof![Just(OrderSide::Buy), Just(OrderSide::Sell)]
}

proptest! {
    /// P1: cash_balance always equals initial_balance + realized_pnl, no
    /// matter how many fills are folded in.
    #[test]
    fn p1_cash_equals_initial_plus_realized(
        fills in prop::collection::vec((side_strategy(), price_strategy(), quantity_strategy()), 1..30)
    ) {
        let mut book = PositionBook::flat(Decimal::new(100_000_00, 2));
        for (i, (side, price, quantity)) in fills.into_iter().enumerate() {
            let trade = Trade::new("p1", side, price, quantity, format!("o{i}"));
            let _ = process_trade_fill(&mut book, &trade);
        }
        prop_assert_eq!(book.cash_balance, book.initial_balance + book.realized_pnl);
    }

    /// P10: a partial close never changes `position_avg_cost` — only a
    /// same-direction increase or a full close/reversal may.
    #[test]
    fn p10_partial_close_preserves_avg_cost(
        open_qty in quantity_strategy(),
        open_price in price_strategy(),
        close_qty_fraction in 1u32..99u32,
        close_price in price_strategy(),
    ) {
        let mut book = PositionBook::flat(Decimal::new(100_000_00, 2));
        let open = Trade::new("p10", OrderSide::Buy, open_price, open_qty, "open");
        process_trade_fill(&mut book, &open).unwrap();
        let avg_before = book.position_avg_cost;

        // Close strictly less than the open quantity, so this is always a
        // partial close, never a full close or reversal.
        let close_qty = open_qty * Decimal::new(close_qty_fraction as i64, 2);
        if close_qty.is_zero() || close_qty >= open_qty {
            return Ok(());
        }
        let close = Trade::new("p10", OrderSide::Sell, close_price, close_qty, "close");
        process_trade_fill(&mut book, &close).unwrap();

        prop_assert_eq!(book.position_avg_cost, avg_before);
    }

    /// Unrealized P&L is exactly zero once a position folds back to flat,
    /// regardless of the price it's marked at afterward.
    #[test]
    fn flat_position_has_zero_unrealized_at_any_mark(
        qty in quantity_strategy(),
        open_price in price_strategy(),
        close_price in price_strategy(),
        mark_price in price_strategy(),
    ) {
        let mut book = PositionBook::flat(Decimal::new(100_000_00, 2));
        let open = Trade::new("flat", OrderSide::Buy, open_price, qty, "open");
        process_trade_fill(&mut book, &open).unwrap();
        let close = Trade::new("flat", OrderSide::Sell, close_price, qty, "close");
        process_trade_fill(&mut book, &close).unwrap();

        prop_assert!(book.is_flat());
        prop_assert_eq!(trading_core::pnl::unrealized_pnl(&book, mark_price), Decimal::ZERO);
    }
}
