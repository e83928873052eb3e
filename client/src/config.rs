//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// Hook receiving failures from spawned pipeline work. Nothing that
/// reaches this hook is allowed to abort the scheduler.
pub type UnexpectedErrorHook = Arc<dyn Fn(&anyhow::Error, &str) + Send + Sync>;

#[derive(Clone)]
pub struct ClientConfig {
    /// Emit ciphertext-stub messages to subscribers instead of holding
    /// them back until a retry succeeds.
    pub treat_ciphertext_messages_as_real: bool,
    /// Optional pause after sending a retry receipt, to give the peer
    /// time to respond before the next stanza is processed.
    pub retry_request_delay: Option<Duration>,
    /// Honor history-sync notifications; when false they are dropped.
    pub download_history: bool,
    /// Initial value of the active-receipts flag: when false, delivery
    /// receipts for inbound messages go out as `inactive`.
    pub send_active_receipts: bool,
    /// Quiet period after the last history message before the app-state
    /// resync fires.
    pub history_debounce: Duration,
    /// Event-bus buffer per subscriber.
    pub event_buffer: usize,
    /// Externally-owned retry counter store, for persistence across
    /// restarts. A fresh in-memory map is used when absent.
    pub retry_counters: Option<Arc<DashMap<String, u32>>>,
    /// Sink for failures inside spawned tasks.
    pub on_unexpected_error: Option<UnexpectedErrorHook>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            treat_ciphertext_messages_as_real: false,
            retry_request_delay: None,
            download_history: true,
            send_active_receipts: false,
            history_debounce: Duration::from_secs(6),
            event_buffer: 512,
            retry_counters: None,
            on_unexpected_error: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field(
                "treat_ciphertext_messages_as_real",
                &self.treat_ciphertext_messages_as_real,
            )
            .field("retry_request_delay", &self.retry_request_delay)
            .field("download_history", &self.download_history)
            .field("send_active_receipts", &self.send_active_receipts)
            .field("history_debounce", &self.history_debounce)
            .field("event_buffer", &self.event_buffer)
            .field(
                "retry_counters",
                &self.retry_counters.as_ref().map(|map| map.len()),
            )
            .field(
                "on_unexpected_error",
                &self.on_unexpected_error.as_ref().map(|_| "<hook>"),
            )
            .finish()
    }
}
