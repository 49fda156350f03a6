//! Typed error taxonomy (spec §7). `thiserror` throughout, matching the
//! corpus convention; the teacher declares `thiserror` as a dependency but
//! hand-rolls `Display`/`Error` instead of deriving it — this rewrite uses
//! the derive macro properly.

use thiserror::Error;

/// Pure-computation errors: overflow, division-by-zero, invariant
/// violations in the P&L fold and indicator math.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DomainError {
    #[error("arithmetic overflow computing {context}")]
    Overflow { context: String },

    #[error("division by zero computing {context}")]
    DivideByZero { context: String },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("insufficient closes: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("duplicate fill for order_id {0}, discarded")]
    DuplicateFill(String),
}

/// Persistence-layer failures (spec §6/§7).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error for {path}: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("csv error for {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("atomic rename failed after {attempts} attempts for {path}: {source}")]
    RenameRetriesExhausted {
        path: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("strategies file unreadable at startup: {0}")]
    FatalStartup(String),
}

/// Strategy-config / order-sizing validation failures (spec §4.4.4, §7).
/// Not treated as errors by the engine: they suppress a signal with a
/// human-readable reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} out of range: {reason}")]
    OutOfRange { field: String, reason: String },

    #[error("quantity {quantity} below min_qty {min_qty}")]
    BelowMinQty { quantity: String, min_qty: String },

    #[error("notional {notional} below min_notional {min_notional}")]
    BelowMinNotional { notional: String, min_notional: String },

    #[error("target price {target} outside guardrails [{min:?}, {max:?}]")]
    OutsideGuardrails {
        target: String,
        min: Option<String>,
        max: Option<String>,
    },

    #[error("duplicate open order already exists near {target}")]
    DuplicateOpenOrder { target: String },

    #[error("unsupported symbol: {0}")]
    UnsupportedSymbol(String),
}

/// Risk-gate denial (spec §4.8). Surfaced, not fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RiskError {
    #[error(
        "risk gate denied: projected net {projected} exceeds bound [{min}, {max}] (current {current})"
    )]
    PositionBoundExceeded {
        current: String,
        projected: String,
        min: String,
        max: String,
    },
}

/// Exchange-adapter-facing error kinds referenced by `trading-core` where it
/// needs to classify an adapter failure without depending on
/// `trading-exchange` (which depends on `trading-core`, not vice versa).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterErrorKind {
    #[error("transient exchange error: {0}")]
    Transient(String),
    #[error("order not found")]
    OrderNotFound,
    #[error("rejected by exchange: {0}")]
    Rejected(String),
}
