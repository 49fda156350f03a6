//! The `trading-engine` binary: wires `EngineConfig`, `BinanceAdapter`,
//! persistence, the three strategy handlers, and the `Scheduler` together,
//! then runs until `SIGINT`/`SIGTERM` (spec §5/§6).
//!
//! Grounded on the teacher's `bog-bins` binaries (`simple_spread_live.rs`
//! et al.) for the wiring/`main()` shape — load config, build the adapter,
//! build the engine, install `ctrlc`, run the scheduler to completion — and
//! replacing their single hardcoded strategy with the multi-strategy
//! `StrategyStore`-backed registry spec §5 describes.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use trading_core::config::EngineConfig;
use trading_core::engine::StrategyEngine;
use trading_core::health::HealthMonitor;
use trading_core::logging::init_logger;
use trading_core::notify::{NotificationSink, NullSink, TelegramSink};
use trading_core::order_manager::OrderManagerConfig;
use trading_core::persistence::StrategyStore;
use trading_core::scheduler::{Scheduler, ShutdownSignal};
use trading_exchange::BinanceAdapter;
use trading_strategies::{BolGridHandler, DcaOttHandler, GridOttHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::parse();
    init_logger(&config.log_level, config.log_json);

    if config.read_only_mode() {
        warn!("BINANCE_API_KEY/BINANCE_API_SECRET not set, starting in read-only mode (no order submission)");
    }

    let store = Arc::new(StrategyStore::new(config.state_dir.clone()));
    let adapter: Arc<dyn trading_core::exchange::ExchangeAdapter> = Arc::new(BinanceAdapter::new(
        config.binance_api_key.clone().unwrap_or_default(),
        config.binance_api_secret.clone().unwrap_or_default(),
        config.use_testnet,
    ));

    let notifier: Arc<dyn NotificationSink> = if config.has_telegram() {
        Arc::new(TelegramSink::new(
            config.telegram_bot_token.clone().expect("checked by has_telegram"),
            config.telegram_chat_id.clone().expect("checked by has_telegram"),
        ))
    } else {
        Arc::new(NullSink)
    };

    let handlers: Vec<Arc<dyn trading_core::handler::StrategyHandler>> = vec![
        Arc::new(GridOttHandler::new()),
        Arc::new(DcaOttHandler::new()),
        Arc::new(BolGridHandler::new()),
    ];

    let order_manager_config = OrderManagerConfig {
        timeout: chrono::Duration::seconds(config.order_timeout_secs as i64),
    };

    let engine = Arc::new(StrategyEngine::new(
        store.clone(),
        adapter,
        notifier.clone(),
        handlers,
        order_manager_config,
        config.read_only_mode(),
    ));

    let health_monitor = Arc::new(HealthMonitor::new(store.clone()));

    let shutdown = ShutdownSignal::new();
    shutdown.install()?;

    let scheduler = Scheduler::new(
        store,
        engine,
        health_monitor,
        notifier,
        Duration::from_secs(config.scheduler_interval_secs),
        shutdown,
    );

    info!(
        interval_secs = config.scheduler_interval_secs,
        read_only = config.read_only_mode(),
        testnet = config.use_testnet,
        "trading engine starting"
    );
    scheduler.run().await?;
    Ok(())
}
