// src/notify/mod.rs
//! Operator notifications for events that need a human: missions nobody can
//! take, timed-out claims, eliminated agents, failing collectors.

pub mod antiflutter;
pub mod discord;
pub mod slack;

use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::NotifyConfig;
use crate::notify::antiflutter::AntiFlutter;
use crate::notify::discord::DiscordNotifier;
use crate::notify::slack::SlackNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MissionUnassignable,
    MissionAbandoned,
    AgentEliminated,
    CollectorFailed,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissionUnassignable => "Mission unassignable",
            Self::MissionAbandoned => "Mission abandoned",
            Self::AgentEliminated => "Agent eliminated",
            Self::CollectorFailed => "Collector failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub kind: EventKind,
    /// What the event is about (`idea:7`, an agent name, a source). Cooldown is per subject.
    pub subject: String,
    pub message: String,
    pub ts: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(
        kind: EventKind,
        subject: impl Into<String>,
        message: impl Into<String>,
        ts: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
            ts,
        }
    }

    pub fn title(&self) -> String {
        format!("{}: {}", self.kind.label(), self.subject)
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ev: &PipelineEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// POST a JSON body, retrying with `500ms << (attempt-1)` backoff.
pub(crate) async fn post_json_with_retry<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
    timeout: Duration,
    max_retries: u8,
    label: &str,
) -> Result<()> {
    let max_retries = max_retries.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let res = client.post(url).timeout(timeout).json(body).send().await;
        let err = match res {
            Ok(rsp) => match rsp.error_for_status_ref() {
                Ok(_) => return Ok(()),
                Err(e) => anyhow!("{label} webhook HTTP error: {e}"),
            },
            Err(e) => anyhow!("{label} webhook request failed: {e}"),
        };
        if attempt >= max_retries {
            return Err(err);
        }
        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
    }
}

/// Fans an event out to every configured channel behind a per-subject cooldown.
pub struct NotifierMux {
    sinks: Vec<Box<dyn Notifier>>,
    gate: Mutex<AntiFlutter>,
}

impl NotifierMux {
    pub fn new(sinks: Vec<Box<dyn Notifier>>, cooldown_secs: i64) -> Self {
        Self {
            sinks,
            gate: Mutex::new(AntiFlutter::new(cooldown_secs)),
        }
    }

    /// Slack and Discord from `SLACK_WEBHOOK_URL` / `DISCORD_WEBHOOK_URL`; unset ones are skipped.
    pub fn from_env(cfg: &NotifyConfig) -> Self {
        let mut sinks: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(s) = SlackNotifier::from_env() {
            sinks.push(Box::new(
                s.with_timeout(cfg.timeout_secs).with_retries(cfg.retries),
            ));
        }
        if let Some(d) = DiscordNotifier::from_env() {
            sinks.push(Box::new(
                d.with_timeout(cfg.timeout_secs).with_retries(cfg.retries),
            ));
        }
        tracing::info!(
            target: "pipeline",
            channels = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "notifiers configured"
        );
        Self::new(sinks, cfg.cooldown_secs)
    }

    pub fn disabled() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn is_enabled(&self) -> bool {
        !self.sinks.is_empty()
    }

    /// Returns how many channels accepted the event.
    pub async fn notify(&self, ev: &PipelineEvent) -> usize {
        if self.sinks.is_empty() {
            return 0;
        }
        if !self.gate.lock().should_alert(ev.kind, &ev.subject, ev.ts) {
            tracing::debug!(target: "pipeline", kind = ?ev.kind, subject = %ev.subject, "notification in cooldown");
            return 0;
        }
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.send(ev).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(target: "pipeline", channel = sink.name(), error = %e, "notification failed"),
            }
        }
        if delivered > 0 {
            self.gate.lock().record_alert(ev.kind, &ev.subject, ev.ts);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Notifier for Counting {
        async fn send(&self, _ev: &PipelineEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn cooldown_is_per_subject() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mux = NotifierMux::new(vec![Box::new(Counting(hits.clone()))], 3600);
        let t0 = Utc::now();
        let a = PipelineEvent::new(EventKind::MissionUnassignable, "idea:1", "no agent", t0);
        let b = PipelineEvent::new(EventKind::MissionUnassignable, "idea:2", "no agent", t0);
        assert_eq!(mux.notify(&a).await, 1);
        assert_eq!(mux.notify(&a).await, 0);
        assert_eq!(mux.notify(&b).await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_mux_is_a_noop() {
        let mux = NotifierMux::disabled();
        let ev = PipelineEvent::new(EventKind::CollectorFailed, "tldr", "down", Utc::now());
        assert_eq!(mux.notify(&ev).await, 0);
        assert!(!mux.is_enabled());
    }
}
