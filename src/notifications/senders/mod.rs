use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub mod telegram;

pub use telegram::TelegramSender;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("invalid sender configuration: {0}")]
    InvalidConfiguration(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// A transport capable of delivering a text message to one recipient.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_message(&self, recipient_id: i64, text: &str) -> Result<(), SenderError>;
}

/// Logs messages instead of sending them; the default when no Telegram
/// token is configured.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send_message(&self, recipient_id: i64, text: &str) -> Result<(), SenderError> {
        info!(recipient_id, text, "notification (log-only sender)");
        Ok(())
    }
}
