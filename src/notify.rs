use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::ports::{NotifyError, Notifier};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn check_recipient(to: &str) -> Result<(), NotifyError> {
    match to.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(NotifyError::InvalidRecipient(to.to_string())),
    }
}

/// Writes every message to the log instead of delivering it.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        check_recipient(to)?;
        tracing::info!(%to, %subject, "notification: {body}");
        Ok(())
    }
}

/// Broadcast outbox: a mail relay subscribes and does the actual delivery.
/// Sending with no relay subscribed fails, so the caller retries later.
pub struct Outbox {
    tx: broadcast::Sender<OutboundMessage>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.tx.subscribe()
    }

    pub fn relay_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        check_recipient(to)?;
        let msg = OutboundMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        self.tx
            .send(msg)
            .map(|_| ())
            .map_err(|_| NotifyError::Transport("no mail relay subscribed".into()))
    }
}

/// Drain an outbox subscription into the log, one JSON line per message,
/// until cancelled or the outbox is dropped.
pub async fn run_log_relay(mut rx: broadcast::Receiver<OutboundMessage>, cancel: CancellationToken) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv() => received,
        };
        match received {
            Ok(msg) => match serde_json::to_string(&msg) {
                Ok(line) => tracing::info!(target: "roombook::mail", "{line}"),
                Err(e) => tracing::warn!("dropping unencodable message to {}: {e}", msg.to),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("mail relay lagged, {n} messages lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbox_delivers_to_subscriber() {
        let outbox = Outbox::new();
        let mut rx = outbox.subscribe();
        outbox
            .send("asha@example.com", "Meeting Reminder", "Room 7 at 10:00")
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.to, "asha@example.com");
        assert_eq!(msg.subject, "Meeting Reminder");

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["body"], "Room 7 at 10:00");
    }

    #[tokio::test]
    async fn outbox_without_relay_fails() {
        let outbox = Outbox::new();
        assert_eq!(outbox.relay_count(), 0);
        let result = outbox.send("asha@example.com", "s", "b").await;
        assert!(matches!(result, Err(NotifyError::Transport(_))));
    }

    #[tokio::test]
    async fn bad_recipients_rejected() {
        for to in ["", "asha", "@example.com", "asha@"] {
            let result = TracingNotifier.send(to, "s", "b").await;
            assert!(matches!(result, Err(NotifyError::InvalidRecipient(_))), "{to:?}");
        }
        assert!(TracingNotifier.send("asha@example.com", "s", "b").await.is_ok());
    }

    #[tokio::test]
    async fn relay_counts_as_subscriber_and_stops_on_cancel() {
        let outbox = Outbox::new();
        let cancel = CancellationToken::new();
        let relay = tokio::spawn(run_log_relay(outbox.subscribe(), cancel.clone()));
        assert_eq!(outbox.relay_count(), 1);
        assert!(outbox.send("asha@example.com", "s", "b").await.is_ok());

        cancel.cancel();
        relay.await.unwrap();
        assert_eq!(outbox.relay_count(), 0);
    }
}
