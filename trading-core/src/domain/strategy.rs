use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Supported linear USDT perpetual pairs. The exchange adapter converts to
/// whatever notation the exchange expects at the boundary; internally we
/// always use this enumerated set (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    BtcUsdt,
    EthUsdt,
    SolUsdt,
    BnbUsdt,
    XrpUsdt,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::BtcUsdt => "BTCUSDT",
            Symbol::EthUsdt => "ETHUSDT",
            Symbol::SolUsdt => "SOLUSDT",
            Symbol::BnbUsdt => "BNBUSDT",
            Symbol::XrpUsdt => "XRPUSDT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BTCUSDT" => Some(Symbol::BtcUsdt),
            "ETHUSDT" => Some(Symbol::EthUsdt),
            "SOLUSDT" => Some(Symbol::SolUsdt),
            "BNBUSDT" => Some(Symbol::BnbUsdt),
            "XRPUSDT" => Some(Symbol::XrpUsdt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Binance-style interval string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    GridOtt,
    DcaOtt,
    BolGrid,
}

/// OTT indicator configuration shared by Grid+OTT and DCA+OTT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OttConfig {
    /// EMA length. Must satisfy `1 <= period <= 200`.
    pub period: usize,
    /// Band width in percent. Must satisfy `0.1 <= opt <= 10.0`.
    pub opt: Decimal,
}

impl OttConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=200).contains(&self.period) {
            return Err(format!("ott.period must be in [1,200], got {}", self.period));
        }
        if self.opt < Decimal::new(1, 1) || self.opt > Decimal::from(10) {
            return Err(format!("ott.opt must be in [0.1,10.0], got {}", self.opt));
        }
        Ok(())
    }
}

/// Strategy-type-specific parameters. Every variant's fields are validated
/// by `trading-strategies::validation` against spec §4.4's stated ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyParameters {
    GridOtt {
        /// Grid spacing in price units, > 0.
        y: Decimal,
        /// Notional per grid level, > 0.
        usdt_grid: Decimal,
    },
    DcaOtt {
        base_usdt: Decimal,
        dca_multiplier: Decimal,
        min_drop_pct: Decimal,
        profit_threshold_pct: Decimal,
    },
    BolGrid {
        initial_usdt: Decimal,
        min_drop_pct: Decimal,
        min_profit_pct: Decimal,
        bollinger_period: usize,
        bollinger_std: Decimal,
    },
}

impl StrategyParameters {
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyParameters::GridOtt { .. } => StrategyType::GridOtt,
            StrategyParameters::DcaOtt { .. } => StrategyType::DcaOtt,
            StrategyParameters::BolGrid { .. } => StrategyType::BolGrid,
        }
    }
}

/// Strategy configuration. Immutable per tick except for `active` and the
/// error counter the engine maintains alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub parameters: StrategyParameters,
    /// `None` for Bol-Grid, which does not use OTT.
    pub ott: Option<OttConfig>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Freeform passthrough options not otherwise modeled (kept for forward
    /// compatibility with configuration the core doesn't interpret).
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Strategy {
    pub fn strategy_type(&self) -> StrategyType {
        self.parameters.strategy_type()
    }

    /// Price guardrail validation: `price_min < price_max` when both set.
    pub fn validate_guardrails(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.price_min, self.price_max) {
            if min >= max {
                return Err(format!(
                    "price_min ({min}) must be < price_max ({max})"
                ));
            }
        }
        Ok(())
    }
}
