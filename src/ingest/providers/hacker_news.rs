// src/ingest/providers/hacker_news.rs
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio::task::JoinSet;

use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::providers::get_text;
use crate::ingest::types::{
    CollectOutcome, SnapshotItem, SourceCollector, SourceName, TimeWindow, HACKER_NEWS,
};

#[derive(Debug, Deserialize)]
struct HnItem {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

impl HnItem {
    fn into_snapshot_item(self) -> Option<SnapshotItem> {
        if self.dead || self.deleted {
            return None;
        }
        let title = normalize_text(self.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            return None;
        }
        let mut item = SnapshotItem::new(
            title,
            normalize_text(self.text.as_deref().unwrap_or_default()),
        );
        item.url = self
            .url
            .or_else(|| Some(format!("https://news.ycombinator.com/item?id={}", self.id)));
        item.score = self.score.unwrap_or(0);
        item.published_at = self.time.and_then(|t| DateTime::from_timestamp(t, 0));
        Some(item)
    }
}

/// Hacker News top stories: `topstories.json`, then one `item/<id>.json` per story.
pub struct HackerNewsCollector {
    mode: Mode,
    limit: usize,
}

enum Mode {
    /// Top-story id list plus item bodies keyed by id. Ids without a body fail.
    Fixture {
        top: String,
        items: BTreeMap<u64, String>,
    },
    Http {
        base: String,
        client: reqwest::Client,
    },
}

impl HackerNewsCollector {
    pub fn from_fixture<I, S>(top: &str, items: I) -> Self
    where
        I: IntoIterator<Item = (u64, S)>,
        S: Into<String>,
    {
        Self {
            mode: Mode::Fixture {
                top: top.to_string(),
                items: items.into_iter().map(|(k, v)| (k, v.into())).collect(),
            },
            limit: 30,
        }
    }

    pub fn from_url(base: &str, limit: usize, client: reqwest::Client) -> Self {
        Self {
            mode: Mode::Http {
                base: base.trim_end_matches('/').to_string(),
                client,
            },
            limit,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn parse_ids(body: &str) -> Result<Vec<u64>, FetchError> {
        serde_json::from_str(body).map_err(|e| FetchError::parse(HACKER_NEWS, e))
    }

    fn parse_item(body: &str) -> Result<Option<SnapshotItem>, FetchError> {
        // HN answers `null` for ids it no longer has.
        let item: Option<HnItem> =
            serde_json::from_str(body).map_err(|e| FetchError::parse(HACKER_NEWS, e))?;
        Ok(item.and_then(HnItem::into_snapshot_item))
    }

    async fn fetch_items(&self, ids: &[u64]) -> Vec<(u64, Result<String, FetchError>)> {
        match &self.mode {
            Mode::Fixture { items, .. } => ids
                .iter()
                .map(|id| {
                    let body = items
                        .get(id)
                        .cloned()
                        .ok_or_else(|| FetchError::network(HACKER_NEWS, format!("item {id} unavailable")));
                    (*id, body)
                })
                .collect(),
            Mode::Http { base, client } => {
                let mut set = JoinSet::new();
                for (idx, id) in ids.iter().copied().enumerate() {
                    let client = client.clone();
                    let url = format!("{base}/item/{id}.json");
                    set.spawn(async move {
                        (idx, id, get_text(&client, &url, HACKER_NEWS, None).await)
                    });
                }
                let mut out = Vec::with_capacity(ids.len());
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok(r) => out.push(r),
                        Err(e) => tracing::warn!(target: "ingest", error = %e, "hn item task died"),
                    }
                }
                out.sort_by_key(|(idx, _, _)| *idx);
                out.into_iter().map(|(_, id, r)| (id, r)).collect()
            }
        }
    }
}

#[async_trait]
impl SourceCollector for HackerNewsCollector {
    async fn collect(&self, _window: &TimeWindow) -> Result<CollectOutcome, FetchError> {
        let top = match &self.mode {
            Mode::Fixture { top, .. } => top.clone(),
            Mode::Http { base, client } => {
                get_text(client, &format!("{base}/topstories.json"), HACKER_NEWS, None).await?
            }
        };
        let mut ids = Self::parse_ids(&top)?;
        ids.truncate(self.limit);

        let mut out = CollectOutcome::default();
        let mut first_err = None;
        for (id, body) in self.fetch_items(&ids).await {
            match body.and_then(|b| Self::parse_item(&b)) {
                Ok(Some(item)) => out.items.push(item),
                Ok(None) => {}
                Err(e) => {
                    out.failures.push(format!("item {id}: {e}"));
                    first_err.get_or_insert(e);
                }
            }
        }

        // Nothing came back at all: report the run as failed, not partial.
        if out.items.is_empty() && !ids.is_empty() {
            if let Some(e) = first_err {
                return Err(e);
            }
        }
        Ok(out)
    }

    fn source(&self) -> SourceName {
        SourceName::from(HACKER_NEWS)
    }
}
