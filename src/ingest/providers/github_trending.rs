// src/ingest/providers/github_trending.rs
//! "Trending" approximated with the search API: repositories created in the
//! last `lookback_days`, sorted by stars.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::providers::get_text;
use crate::ingest::types::{
    CollectOutcome, SnapshotItem, SourceCollector, SourceName, TimeWindow, GITHUB_TRENDING,
};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Repo>,
}

#[derive(Debug, Deserialize)]
struct Repo {
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

impl Repo {
    fn into_snapshot_item(self) -> SnapshotItem {
        let mut desc = normalize_text(self.description.as_deref().unwrap_or_default());
        let extras: Vec<String> = self
            .language
            .into_iter()
            .chain(self.topics)
            .filter(|s| !s.is_empty())
            .collect();
        if !extras.is_empty() {
            if !desc.is_empty() {
                desc.push(' ');
            }
            desc.push_str(&extras.join(" "));
        }
        let mut item = SnapshotItem::new(self.full_name, desc);
        item.url = self.html_url;
        item.score = self.stargazers_count;
        // Creation date is a query bound, not a publication time; keep the item.
        item.published_at = None;
        item
    }
}

pub struct GithubTrendingCollector {
    mode: Mode,
    limit: usize,
    lookback_days: i64,
    token: Option<String>,
}

enum Mode {
    Fixture(String),
    Http { base: String, client: reqwest::Client },
}

impl GithubTrendingCollector {
    pub fn from_fixture(json: &str) -> Self {
        Self {
            mode: Mode::Fixture(json.to_string()),
            limit: 30,
            lookback_days: 7,
            token: None,
        }
    }

    pub fn from_url(base: &str, client: reqwest::Client) -> Self {
        Self {
            mode: Mode::Http {
                base: base.trim_end_matches('/').to_string(),
                client,
            },
            limit: 30,
            lookback_days: 7,
            token: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, 100);
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days.max(1);
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn search_path(&self) -> String {
        let since = (Utc::now() - Duration::days(self.lookback_days)).format("%Y-%m-%d");
        format!(
            "/search/repositories?q=created:%3E{since}&sort=stars&order=desc&per_page={}",
            self.limit
        )
    }

    fn parse_items_from_str(s: &str, limit: usize) -> Result<Vec<SnapshotItem>, FetchError> {
        let resp: SearchResponse =
            serde_json::from_str(s).map_err(|e| FetchError::parse(GITHUB_TRENDING, e))?;
        Ok(resp
            .items
            .into_iter()
            .take(limit)
            .map(Repo::into_snapshot_item)
            .collect())
    }
}

#[async_trait]
impl SourceCollector for GithubTrendingCollector {
    async fn collect(&self, _window: &TimeWindow) -> Result<CollectOutcome, FetchError> {
        let body = match &self.mode {
            Mode::Fixture(s) => s.clone(),
            Mode::Http { base, client } => {
                let url = format!("{base}{}", self.search_path());
                get_text(client, &url, GITHUB_TRENDING, self.token.as_deref()).await?
            }
        };
        Ok(CollectOutcome::complete(Self::parse_items_from_str(
            &body, self.limit,
        )?))
    }

    fn source(&self) -> SourceName {
        SourceName::from(GITHUB_TRENDING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_items_carry_stars_and_topics() {
        let json = r#"{"total_count":2,"items":[
            {"full_name":"acme/agentkit","description":"LLM agents toolkit","html_url":"https://github.com/acme/agentkit","stargazers_count":900,"language":"Rust","topics":["ai","agents"]},
            {"full_name":"x/y","description":null,"stargazers_count":5}
        ]}"#;
        let c = GithubTrendingCollector::from_fixture(json).with_limit(1);
        let out = c.collect(&TimeWindow::trailing(Utc::now(), 24)).await.unwrap();
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].score, 900);
        assert_eq!(out.items[0].description, "LLM agents toolkit Rust ai agents");
    }

    #[test]
    fn auth_statuses_are_not_retryable() {
        let e = FetchError::from_status(GITHUB_TRENDING, 403);
        assert!(matches!(e, FetchError::Auth { .. }));
        assert!(!e.is_retryable());
        assert!(FetchError::from_status(GITHUB_TRENDING, 502).is_retryable());
    }
}
