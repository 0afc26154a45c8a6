//! Downstream ingestion API client.
//!
//! The API accepts one JSON profile record per request. Delivery is reported
//! as a plain success flag: a failed forward is not an error for the run,
//! the profile just goes back to `not_collected`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::ProfileRecord;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Forward one record. True only when the API accepted it.
    async fn submit(&self, record: &ProfileRecord) -> bool;
}

pub struct HttpIngestor {
    client: reqwest::Client,
    url: String,
    token: SecretString,
}

impl HttpIngestor {
    pub fn new(url: impl Into<String>, token: SecretString, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl Ingestor for HttpIngestor {
    async fn submit(&self, record: &ProfileRecord) -> bool {
        let result = self
            .client
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .json(record)
            .send()
            .await;

        let accepted = match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(username = %record.username, status = %resp.status(), "record accepted");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(username = %record.username, %status, body = %body, "ingestion API rejected record");
                false
            }
            Err(e) => {
                warn!(username = %record.username, error = %e, "ingestion API unreachable");
                false
            }
        };

        metrics::forwards().add(
            1,
            &[KeyValue::new("result", if accepted { "ok" } else { "failed" })],
        );
        accepted
    }
}
