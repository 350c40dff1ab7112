use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Operator alerts. Delivery failures never affect the caller.
#[async_trait]
pub trait Alerts: Send + Sync {
    async fn unit_failed(&self, component: &str, unit: &str, error: &str);
}

#[derive(Clone)]
pub struct Notifier {
    slack_webhook_url: Option<String>,
    http: Client,
}

#[derive(Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

impl Notifier {
    pub fn new(slack_webhook_url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { slack_webhook_url, http }
    }

    pub async fn alert(&self, text: &str) -> Result<()> {
        let Some(url) = self.slack_webhook_url.as_deref() else {
            // In dev/test we allow missing slack config.
            return Ok(());
        };

        let resp = self
            .http
            .post(url)
            .json(&SlackPayload { text })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!("slack webhook failed: {}", resp.status()));
        }

        Ok(())
    }
}

#[async_trait]
impl Alerts for Notifier {
    async fn unit_failed(&self, component: &str, unit: &str, error: &str) {
        let text = format!(":warning: {component}: {unit} failed: {error}");
        if let Err(e) = self.alert(&text).await {
            warn!(error = %e, component, "notifier.alert_failed");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_webhook_is_a_no_op() {
        let n = Notifier::new(None);
        assert!(n.alert("hello").await.is_ok());
        n.unit_failed("scheduler", "strategy 1", "boom").await;
    }
}
