use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

use super::{post_json_with_retry, Notifier, PipelineEvent};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl SlackNotifier {
    /// `None` when `SLACK_WEBHOOK_URL` is unset or empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("SLACK_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(Self::new)
    }

    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, n: u8) -> Self {
        self.max_retries = n;
        self
    }
}

fn slack_text(ev: &PipelineEvent) -> String {
    format!("*{}*\n{}\n@ {}", ev.title(), ev.message, ev.ts.to_rfc3339())
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, ev: &PipelineEvent) -> Result<()> {
        let body = serde_json::json!({ "text": slack_text(ev) });
        post_json_with_retry(
            &self.client,
            &self.webhook_url,
            &body,
            self.timeout,
            self.max_retries,
            "Slack",
        )
        .await
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}
