//! Best-effort forwarding of analytics events to an external webhook

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ForwardingConfig;
use crate::error::{Error, Result};
use crate::probes::status_error;

pub const ENVELOPE_SOURCE: &str = "consensus-tiers";
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Signal,
    Outcome,
}

#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub source: &'static str,
    pub version: u32,
    pub data: &'a T,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    pub fn new(kind: EventKind, data: &'a T) -> Self {
        Self {
            kind,
            source: ENVELOPE_SOURCE,
            version: ENVELOPE_VERSION,
            data,
        }
    }
}

pub struct WebhookForwarder {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl WebhookForwarder {
    /// `None` when no webhook URL is configured
    pub fn from_config(config: &ForwardingConfig, timeout: Duration) -> Result<Option<Self>> {
        let Some(url) = config.webhook_url.clone().filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("consensus-tiers/0.1")
            .build()
            .map_err(|e| Error::Config(format!("Failed to create forwarding client: {}", e)))?;

        Ok(Some(Self {
            client,
            url,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        }))
    }

    pub async fn forward<T: Serialize>(&self, kind: EventKind, data: &T) -> Result<()> {
        let mut request = self.client.post(&self.url).json(&Envelope::new(kind, data));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        debug!(kind = ?kind, "Forwarded analytics event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let data = json!({"ca": "E", "roi_pct": 50.0});
        let value = serde_json::to_value(Envelope::new(EventKind::Outcome, &data)).unwrap();
        assert_eq!(value["type"], "outcome");
        assert_eq!(value["source"], ENVELOPE_SOURCE);
        assert_eq!(value["version"], 1);
        assert_eq!(value["data"]["roi_pct"], 50.0);
    }

    #[test]
    fn test_disabled_without_url() {
        let config = ForwardingConfig::default();
        assert!(WebhookForwarder::from_config(&config, Duration::from_secs(5))
            .unwrap()
            .is_none());

        let config = ForwardingConfig {
            webhook_url: Some("  ".into()),
            api_key: None,
        };
        assert!(WebhookForwarder::from_config(&config, Duration::from_secs(5))
            .unwrap()
            .is_none());
    }
}
