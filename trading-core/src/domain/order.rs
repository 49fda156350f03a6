use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buy, -1 for sell; used for signed quantity/gf arithmetic.
    pub fn sign(self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order Manager WAL entry lifecycle (spec §4.5).
///
/// `PENDING_SUBMIT -> SUBMITTED -> (FILLED | CANCELED/EXPIRED/REJECTED |
/// PENDING_CANCEL -> CANCELED)`; `SUBMIT_FAILED` is a terminal error state
/// left for the next reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingOrderStatus {
    PendingSubmit,
    Submitted,
    PendingCancel,
    SubmitFailed,
}

/// An exchange order status as reported by `check_order_status_detailed`
/// (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

/// A durable WAL record for one in-flight order (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub internal_id: String,
    pub strategy_id: String,
    /// Populated once the exchange acknowledges submission.
    pub order_id: Option<String>,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    pub status: PendingOrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cycle_info: Option<String>,
    /// Grid+OTT's grid multiplier at signal time, carried through to the
    /// resulting `Trade` (spec §4.4.1); `None` for every other strategy.
    pub z: Option<i64>,
}

impl PendingOrder {
    pub fn new_pending_submit(
        strategy_id: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
        cycle_info: Option<String>,
        z: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            internal_id: uuid::Uuid::new_v4().to_string(),
            strategy_id: strategy_id.into(),
            order_id: None,
            side,
            quantity,
            price,
            order_type,
            status: PendingOrderStatus::PendingSubmit,
            created_at: now,
            updated_at: now,
            cycle_info,
            z,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}
