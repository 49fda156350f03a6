//! The P&L accounting fold (spec §4.3). A pure, state-mutating operation
//! over `PositionBook` driven by one `Trade` at a time. No teacher
//! equivalent exists in decimal form (the teacher tracks position in u64
//! fixed-point inside its typestate order machine); reimplemented here
//! against `rust_decimal::Decimal` following the transition table exactly.

use rust_decimal::Decimal;

use crate::domain::order::OrderSide;
use crate::domain::state::{PositionBook, PositionSide};
use crate::domain::trade::Trade;
use crate::errors::DomainError;

const MAX_MAGNITUDE: &str = "1000000000000000"; // 10^15, spec §9 overflow guard

fn guard_magnitude(value: Decimal, context: &str) -> Result<(), DomainError> {
    let limit: Decimal = MAX_MAGNITUDE.parse().expect("valid decimal literal");
    if value.abs() > limit {
        return Err(DomainError::Overflow {
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Applies one fill to a position book per the transition table in spec
/// §4.3. Returns the realized P&L delta recognized by this fill (zero for
/// opening/increasing fills).
pub fn process_trade_fill(book: &mut PositionBook, trade: &Trade) -> Result<Decimal, DomainError> {
    guard_magnitude(trade.price, "trade.price")?;
    guard_magnitude(trade.quantity, "trade.quantity")?;
    if trade.price <= Decimal::ZERO {
        return Err(DomainError::InvariantViolation(
            "trade price must be positive".to_string(),
        ));
    }

    let trade_signed_qty = match trade.side {
        OrderSide::Buy => trade.quantity,
        OrderSide::Sell => -trade.quantity,
    };

    if book.is_flat() {
        // Open a fresh position. Cash is unaffected by opening a position;
        // this model tracks notional exposure, not margin posted.
        book.position_quantity = trade_signed_qty;
        book.position_avg_cost = Some(trade.price);
        book.position_side = Some(if trade.side == OrderSide::Buy {
            PositionSide::Long
        } else {
            PositionSide::Short
        });
        return Ok(Decimal::ZERO);
    }

    let side = book.position_side.expect("non-flat book has a side");
    let same_direction = matches!(
        (side, trade.side),
        (PositionSide::Long, OrderSide::Buy) | (PositionSide::Short, OrderSide::Sell)
    );

    let old_qty_abs = book.position_quantity.abs();
    let old_avg = book
        .position_avg_cost
        .ok_or_else(|| DomainError::InvariantViolation("non-flat book missing avg_cost".into()))?;

    if same_direction {
        // Increase: weighted-average cost update, cash unchanged.
        let new_qty_abs = old_qty_abs + trade.quantity;
        if new_qty_abs.is_zero() {
            return Err(DomainError::DivideByZero {
                context: "increase avg_cost".to_string(),
            });
        }
        let new_avg = (old_qty_abs * old_avg + trade.quantity * trade.price) / new_qty_abs;
        book.position_avg_cost = Some(new_avg);
        book.position_quantity += trade_signed_qty;
        guard_magnitude(book.position_quantity, "position_quantity")?;
        return Ok(Decimal::ZERO);
    }

    // Decrease (opposite direction), possibly through flat and into reversal.
    let closed_qty = old_qty_abs.min(trade.quantity);
    let realized = match side {
        PositionSide::Long => (trade.price - old_avg) * closed_qty,
        PositionSide::Short => (old_avg - trade.price) * closed_qty,
    };
    guard_magnitude(realized, "realized_pnl delta")?;
    book.realized_pnl += realized;
    book.cash_balance += realized;

    let residual_qty = trade.quantity - closed_qty;
    let remaining_old_qty = old_qty_abs - closed_qty;

    if remaining_old_qty.is_zero() && residual_qty.is_zero() {
        // Fully closed, flat.
        book.position_quantity = Decimal::ZERO;
        book.position_avg_cost = None;
        book.position_side = None;
    } else if remaining_old_qty.is_zero() && residual_qty > Decimal::ZERO {
        // Trade size exceeded the position: reverse into a fresh position
        // at the trade price, in the trade's direction.
        book.position_quantity = match trade.side {
            OrderSide::Buy => residual_qty,
            OrderSide::Sell => -residual_qty,
        };
        book.position_avg_cost = Some(trade.price);
        book.position_side = Some(if trade.side == OrderSide::Buy {
            PositionSide::Long
        } else {
            PositionSide::Short
        });
    } else {
        // Partial close: avg_cost unchanged (invariant 2 / P10).
        book.position_quantity = match side {
            PositionSide::Long => remaining_old_qty,
            PositionSide::Short => -remaining_old_qty,
        };
    }

    Ok(realized)
}

/// Unrealized P&L at `price` (spec §4.3). Zero when flat.
pub fn unrealized_pnl(book: &PositionBook, price: Decimal) -> Decimal {
    match (book.position_side, book.position_avg_cost) {
        (Some(PositionSide::Long), Some(avg)) => (price - avg) * book.position_quantity.abs(),
        (Some(PositionSide::Short), Some(avg)) => (avg - price) * book.position_quantity.abs(),
        _ => Decimal::ZERO,
    }
}

/// `cash_balance + unrealized` at `price`.
pub fn total_balance(book: &PositionBook, price: Decimal) -> Decimal {
    book.cash_balance + unrealized_pnl(book, price)
}
