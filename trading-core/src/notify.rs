//! Fire-and-forget notification sinks (spec §9: Telegram transport is a
//! fire-and-forget sink, out of core scope as a *transport*; the core still
//! needs the trait and a default implementation since the Order Manager,
//! Risk Gate, and Health Monitor all call into one).
//!
//! Grounded on `execution/journal.rs`'s crossbeam-channel-plus-writer-thread
//! pattern (applied here to outbound HTTP instead of a local file) and on
//! `original_source/core/telegram.py`'s swallow-all-errors semantics.

use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Best-effort delivery. Never returns an error: failures are logged
    /// and swallowed, matching the original bot's `telegram.py` and the
    /// teacher's `AsyncJournal::record`.
    async fn notify(&self, message: &str);
}

/// Default sink when no Telegram credentials are configured.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, message: &str) {
        tracing::debug!(%message, "notification (no sink configured)");
    }
}

/// Best-effort Telegram sender. `reqwest`-backed to match the rest of the
/// pack's HTTP dependency choice (`aibysid-HyperLiquidMM`, `cooprefr-
/// bettersys`).
pub struct TelegramSink {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn notify(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .client
            .post(&url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", message)])
            .send()
            .await;
        if let Err(err) = result {
            warn!(error = %err, "telegram notification failed, discarding");
        }
    }
}
