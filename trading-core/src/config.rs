//! Environment-driven engine configuration (spec §6).
//!
//! Spec §1 places "config loading" out of core scope as an external-service
//! concern (the enclosing HTTP service owns a richer config surface); this
//! is the flat, `clap`-parsed subset the core binary itself needs, grounded
//! on `cooprefr-bettersys`'s `clap::Parser` binaries (`#[arg(long, env =
//! "...")]`) rather than the teacher's TOML `config::types::Config`, which
//! models a fundamentally different (single-strategy, single-market-maker)
//! shape than this multi-strategy engine's flat env-var contract.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "trading-engine", about = "Multi-strategy perpetual-futures trading engine")]
pub struct EngineConfig {
    /// Required for order actions; the engine runs read-only (market data
    /// and reconciliation only, no new orders) when unset (spec §6).
    #[arg(long, env = "BINANCE_API_KEY")]
    pub binance_api_key: Option<String>,

    #[arg(long, env = "BINANCE_API_SECRET")]
    pub binance_api_secret: Option<String>,

    /// Routes to the sandbox endpoint when true (spec §6).
    #[arg(long, env = "USE_TESTNET", default_value_t = false)]
    pub use_testnet: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Root of the persisted layout (spec §6): `strategies.json`,
    /// `{strategy_id}/`, `position_limits.json`.
    #[arg(long, env = "STATE_DIR", default_value = "./data")]
    pub state_dir: PathBuf,

    /// Scheduler pass cadence; spec §5 fixes this at ~60s regardless of any
    /// strategy's timeframe.
    #[arg(long, env = "SCHEDULER_INTERVAL_SECS", default_value_t = 60)]
    pub scheduler_interval_secs: u64,

    /// Order Manager cancel-on-timeout age (spec §4.5, 3-5 minute range).
    #[arg(long, env = "ORDER_TIMEOUT_SECS", default_value_t = 240)]
    pub order_timeout_secs: u64,
}

impl EngineConfig {
    /// True when order-placement credentials are absent: the engine still
    /// reconciles and observes, but never calls `create_order` (spec §6).
    pub fn read_only_mode(&self) -> bool {
        self.binance_api_key.is_none() || self.binance_api_secret.is_none()
    }

    pub fn has_telegram(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}
