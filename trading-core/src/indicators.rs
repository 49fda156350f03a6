//! Pure, side-effect-free indicator functions (spec §4.2). No teacher
//! equivalent exists (the teacher trades on order-book imbalance, not
//! candle-derived indicators) — these are implemented directly from the
//! specification's recurrence definitions.

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

use crate::domain::state::OttMode;
use crate::errors::DomainError;

/// Simple moving average of the last `period` values of `series`.
pub fn sma(series: &[Decimal], period: usize) -> Result<Decimal, DomainError> {
    if period == 0 || series.len() < period {
        return Err(DomainError::InsufficientData {
            needed: period.max(1),
            available: series.len(),
        });
    }
    let window = &series[series.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Ok(sum / Decimal::from(period as u64))
}

/// Exponential moving average over the whole series, seeded by the SMA of
/// the first `period` values, returned as the sequence of EMA values
/// starting at index `period - 1` (spec §4.2).
pub fn ema(series: &[Decimal], period: usize) -> Result<Vec<Decimal>, DomainError> {
    if period == 0 || series.len() < period {
        return Err(DomainError::InsufficientData {
            needed: period.max(1),
            available: series.len(),
        });
    }
    let alpha = Decimal::from(2) / Decimal::from((period + 1) as u64);
    let seed = sma(&series[..period], period)?;
    let mut out = Vec::with_capacity(series.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for price in &series[period..] {
        let next = (*price - prev) * alpha + prev;
        out.push(next);
        prev = next;
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OttResult {
    pub mode: OttMode,
    pub baseline: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
    pub current_price: Decimal,
}

/// EMA-based trend classifier (spec §4.2).
///
/// `baseline = EMA(closes, period).last`; `upper/lower = baseline * (1 +-
/// opt/100)`; `mode = AL` when the current price is above the baseline,
/// else `SAT`. Requires `closes.len() >= period`.
pub fn ott(closes: &[Decimal], period: usize, opt: Decimal) -> Result<OttResult, DomainError> {
    if closes.len() < period {
        return Err(DomainError::InsufficientData {
            needed: period,
            available: closes.len(),
        });
    }
    let ema_values = ema(closes, period)?;
    let baseline = *ema_values.last().expect("ema returns at least one value");
    let current_price = *closes.last().expect("checked non-empty above");
    let hundred = Decimal::from(100);
    let upper = baseline * (Decimal::ONE + opt / hundred);
    let lower = baseline * (Decimal::ONE - opt / hundred);
    let mode = if current_price > baseline {
        OttMode::Al
    } else {
        OttMode::Sat
    };
    Ok(OttResult {
        mode,
        baseline,
        upper,
        lower,
        current_price,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BollingerPoint {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

/// Sample standard deviation of a window (population variance with Bessel's
/// correction would require n > 1; the original bot uses plain population
/// stddev, which this mirrors for a window of exactly `period` prices).
fn stddev(window: &[Decimal], mean: Decimal) -> Result<Decimal, DomainError> {
    let n = Decimal::from(window.len() as u64);
    if n.is_zero() {
        return Err(DomainError::DivideByZero {
            context: "bollinger stddev".to_string(),
        });
    }
    let sum_sq: Decimal = window.iter().map(|p| (*p - mean) * (*p - mean)).sum();
    let variance = sum_sq / n;
    Ok(variance
        .sqrt()
        .ok_or_else(|| DomainError::InvariantViolation("negative variance in stddev".into()))?)
}

/// Bollinger Bands over the whole series (spec §4.2). Returns one point per
/// index `i >= period - 1`.
pub fn bollinger_bands(
    prices: &[Decimal],
    period: usize,
    k: Decimal,
) -> Result<Vec<BollingerPoint>, DomainError> {
    if period == 0 || prices.len() < period {
        return Err(DomainError::InsufficientData {
            needed: period.max(1),
            available: prices.len(),
        });
    }
    let mut out = Vec::with_capacity(prices.len() - period + 1);
    for end in period..=prices.len() {
        let window = &prices[end - period..end];
        let middle = sma(window, period)?;
        let sd = stddev(window, middle)?;
        out.push(BollingerPoint {
            upper: middle + k * sd,
            middle,
            lower: middle - k * sd,
        });
    }
    Ok(out)
}
