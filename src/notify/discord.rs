use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{post_json_with_retry, EventKind, Notifier, PipelineEvent};

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    /// `None` when `DISCORD_WEBHOOK_URL` is unset or empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(Self::new)
    }

    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, ev: &PipelineEvent) -> Result<()> {
        let payload = DiscordWebhookPayload::from_event(ev);
        post_json_with_retry(
            &self.client,
            &self.webhook,
            &payload,
            self.timeout,
            self.max_retries,
            "Discord",
        )
        .await
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn from_event(ev: &PipelineEvent) -> Self {
        // red for agent/collector trouble, amber for mission churn
        let color = match ev.kind {
            EventKind::AgentEliminated | EventKind::CollectorFailed => 0xE0_3E_3E,
            EventKind::MissionAbandoned | EventKind::MissionUnassignable => 0xF0_A0_20,
        };
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: ev.title(),
                description: ev.message.clone(),
                color,
                timestamp: ev.ts.to_rfc3339(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn payload_is_a_single_embed() {
        let ev = PipelineEvent::new(EventKind::AgentEliminated, "bob", "score 31.0 < 40", Utc::now());
        let v = serde_json::to_value(DiscordWebhookPayload::from_event(&ev)).unwrap();
        assert_eq!(v["embeds"][0]["title"], "Agent eliminated: bob");
        assert_eq!(v["embeds"][0]["color"], 0xE03E3E);
        assert!(v["content"].is_null());
    }
}
