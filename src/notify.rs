//! Outbound SMS channel
//!
//! Fire-and-forget: the return value is logged, never enforced. A failed
//! send degrades the response note but does not abort the owning operation.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a text; `true` means the channel accepted it.
    async fn send_text(&self, phone: &str, message: &str) -> bool;
}

/// Default channel: logs the message instead of sending it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, phone: &str, message: &str) -> bool {
        info!(phone = %phone, message = %message, "sms (log channel)");
        true
    }
}
