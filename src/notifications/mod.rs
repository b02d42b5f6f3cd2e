//! Delivery of status messages to users.
//!
//! The monitoring service talks only to [`NotificationSink`], a non-blocking
//! enqueue. [`QueuedNotifier`] drains the queue on a background task and
//! hands each message to a [`senders::NotificationSender`], so a slow
//! transport can never stall a monitoring tick.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub mod senders;

use senders::NotificationSender;

/// Boundary to the messaging transport. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, recipient_id: i64, text: String);
}

struct OutboundMessage {
    recipient_id: i64,
    text: String,
}

pub struct QueuedNotifier {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl QueuedNotifier {
    /// Spawns the delivery worker and returns the sink handle. Delivery
    /// failures are logged and dropped, never retried here.
    pub fn start(sender: Arc<dyn NotificationSender>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match sender.send_message(msg.recipient_id, &msg.text).await {
                    Ok(()) => {
                        debug!(recipient_id = msg.recipient_id, "notification delivered");
                    }
                    Err(e) => {
                        warn!(
                            recipient_id = msg.recipient_id,
                            error = %e,
                            "notification delivery failed, dropping message"
                        );
                    }
                }
            }
            debug!("notification queue closed, delivery worker exiting");
        });

        Arc::new(Self { tx })
    }
}

impl NotificationSink for QueuedNotifier {
    fn deliver(&self, recipient_id: i64, text: String) {
        if self
            .tx
            .send(OutboundMessage { recipient_id, text })
            .is_err()
        {
            warn!(recipient_id, "notification worker is gone, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use senders::SenderError;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSender {
        sent: Arc<Mutex<Vec<(i64, String)>>>,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send_message(&self, recipient_id: i64, text: &str) -> Result<(), SenderError> {
            self.sent.lock().unwrap().push((recipient_id, text.to_string()));
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait]
    impl NotificationSender for FailingSender {
        async fn send_message(&self, _recipient_id: i64, _text: &str) -> Result<(), SenderError> {
            Err(SenderError::SendFailed("transport down".to_string()))
        }
    }

    #[tokio::test]
    async fn queued_messages_reach_the_sender() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = QueuedNotifier::start(Arc::new(RecordingSender {
            sent: Arc::clone(&sent),
        }));

        notifier.deliver(42, "host down".to_string());
        notifier.deliver(43, "host up".to_string());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (42, "host down".to_string()));
    }

    #[tokio::test]
    async fn delivery_failure_does_not_panic_or_block() {
        let notifier = QueuedNotifier::start(Arc::new(FailingSender));
        notifier.deliver(7, "dropped on the floor".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Still accepting messages afterwards.
        notifier.deliver(7, "still alive".to_string());
    }
}
