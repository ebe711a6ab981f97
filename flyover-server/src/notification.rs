//! Push delivery of alerts through ntfy.
//!
//! The message is the POST body; the filter name goes in the `Title` header.

use async_trait::async_trait;

use flyover_core::types::{FlyoverError, Result};

/// Delivery channel for rendered alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, topic: &str, title: &str, message: &str) -> Result<()>;
}

/// Publishes alerts to `{base_url}/{topic}`.
#[derive(Clone)]
pub struct NtfyDispatcher {
    base_url: String,
    client: reqwest::Client,
}

impl NtfyDispatcher {
    pub fn new(base_url: &str) -> Self {
        NtfyDispatcher {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/{}", self.base_url, topic.trim_matches('/'))
    }
}

#[async_trait]
impl AlertSink for NtfyDispatcher {
    async fn deliver(&self, topic: &str, title: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(self.topic_url(topic))
            .header("Title", title)
            .body(message.to_string())
            .send()
            .await
            .map_err(|e| FlyoverError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlyoverError::Delivery(format!(
                "topic {topic} returned {status}"
            )));
        }
        Ok(())
    }
}
