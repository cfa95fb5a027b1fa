//! NATS message consumer for incoming scoring requests

use crate::types::scoring::ScoringRequest;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for receiving scoring requests from NATS
pub struct ScoringRequestConsumer {
    client: Client,
    subject: String,
}

impl ScoringRequestConsumer {
    /// Create a new request consumer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the request subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to scoring request subject");
        Ok(subscriber)
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode a request payload. A missing `request_id` gets a fresh one.
pub fn decode_request(payload: &[u8]) -> serde_json::Result<ScoringRequest> {
    serde_json::from_slice(payload)
}
