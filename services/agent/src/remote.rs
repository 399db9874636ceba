//! Outbound message delivery.
//!
//! Sends are fire-and-forget: the agent's event loop never waits on the
//! network, and a failed send is logged and dropped. The status-update retry
//! timer and master re-detection provide recovery, so there is nothing
//! useful to do with a send error here.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::protocol::{Envelope, Message};

/// Delivers protocol messages to a peer's base URL.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, endpoint: &str, message: Message);
}

/// Production sender: POSTs envelopes to `{endpoint}/api/v1/message`.
pub struct HttpSender {
    client: reqwest::Client,
    /// Advertised in every envelope so peers can reply.
    from: String,
}

impl HttpSender {
    pub fn new(from: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("building HTTP client");

        Self { client, from }
    }
}

#[async_trait]
impl MessageSender for HttpSender {
    async fn send(&self, endpoint: &str, message: Message) {
        let url = format!("{}/api/v1/message", endpoint.trim_end_matches('/'));
        let envelope = Envelope {
            from: self.from.clone(),
            message,
        };
        let client = self.client.clone();

        // Detach so a slow or dead peer cannot stall the caller.
        tokio::spawn(async move {
            match client.post(&url).json(&envelope).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, "Message delivered");
                }
                Ok(response) => {
                    warn!(url = %url, status = %response.status(), "Message rejected");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Message send failed");
                }
            }
        });
    }
}

/// Test sender that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(endpoint, message)` pair sent so far, in order.
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().expect("sent lock").clone()
    }

    /// Messages sent to one endpoint, in order.
    pub fn sent_to(&self, endpoint: &str) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == endpoint)
            .map(|(_, message)| message)
            .collect()
    }

    /// Drains the record, returning what was captured.
    pub fn take(&self) -> Vec<(String, Message)> {
        std::mem::take(&mut *self.sent.lock().expect("sent lock"))
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, endpoint: &str, message: Message) {
        self.sent
            .lock()
            .expect("sent lock")
            .push((endpoint.to_string(), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sender_preserves_order() {
        let sender = RecordingSender::new();
        sender.send("http://master:5050", Message::Ping).await;
        sender.send("http://executor:7070", Message::Pong).await;
        sender.send("http://master:5050", Message::Pong).await;

        assert_eq!(sender.sent().len(), 3);
        assert_eq!(
            sender.sent_to("http://master:5050"),
            vec![Message::Ping, Message::Pong]
        );
    }
}
