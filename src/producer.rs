//! NATS message producer for scoring reports

use crate::types::scoring::ScoringReport;
use anyhow::Result;
use async_nats::Client;
use tracing::debug;

/// Producer for publishing scoring reports to NATS
#[derive(Clone)]
pub struct ReportProducer {
    client: Client,
    subject: String,
}

impl ReportProducer {
    /// Create a new report producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish a report on the report subject
    pub async fn publish(&self, report: &ScoringReport) -> Result<()> {
        self.publish_to(self.subject.clone(), report).await
    }

    /// Publish a report to an explicit subject, e.g. a request's reply inbox
    pub async fn publish_to(&self, subject: String, report: &ScoringReport) -> Result<()> {
        let payload = serde_json::to_vec(report)?;

        self.client.publish(subject.clone(), payload.into()).await?;

        debug!(
            subject = %subject,
            request_id = %report.request_id,
            status = %report.status,
            "Published scoring report"
        );

        Ok(())
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}
