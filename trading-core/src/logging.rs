//! `tracing` initialization, copied near-verbatim in spirit from the
//! teacher's `utils/logger.rs`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global `tracing` subscriber. `RUST_LOG` overrides
/// `log_level` when set, matching the teacher's precedence.
pub fn init_logger(log_level: &str, json_logs: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}
