// src/ingest/types.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub const HACKER_NEWS: &str = "hacker_news";
pub const TLDR: &str = "tldr";
pub const GITHUB_TRENDING: &str = "github_trending";

/// Feed identifier, e.g. `hacker_news`, `tldr`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(pub String);

impl SourceName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Feed-native score (HN points, GitHub stars); 0 when the feed has none.
    #[serde(default)]
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl SnapshotItem {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            url: None,
            score: 0,
            published_at: None,
        }
    }

    /// Text fed into tokenization and topic classification.
    pub fn text(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.description)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `hours` ending at `end`.
    pub fn trailing(end: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: end - Duration::hours(hours.max(0)),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Unknown publication times are kept.
    pub fn admits(&self, item: &SnapshotItem) -> bool {
        item.published_at.is_none_or(|ts| self.contains(ts))
    }
}

/// One collector run's capture of one source. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSnapshot {
    pub timestamp: DateTime<Utc>,
    pub source: SourceName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    pub items: Vec<SnapshotItem>,
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub trends: Vec<String>,
    /// Set when the run only partially succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl LearningSnapshot {
    pub fn new(source: SourceName, timestamp: DateTime<Utc>, items: Vec<SnapshotItem>) -> Self {
        Self {
            timestamp,
            source,
            window: None,
            items,
            topics: BTreeMap::new(),
            trends: Vec::new(),
            failure: None,
        }
    }

    /// Identity used to treat aggregation input as a set.
    pub fn key(&self) -> (SourceName, DateTime<Utc>) {
        (self.source.clone(), self.timestamp)
    }

    pub fn is_partial(&self) -> bool {
        self.failure.is_some()
    }
}

/// What a collector brought back. Non-empty `failures` marks a partial run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectOutcome {
    pub items: Vec<SnapshotItem>,
    pub failures: Vec<String>,
}

impl CollectOutcome {
    pub fn complete(items: Vec<SnapshotItem>) -> Self {
        Self {
            items,
            failures: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
pub trait SourceCollector: Send + Sync {
    async fn collect(&self, window: &TimeWindow) -> Result<CollectOutcome, FetchError>;
    fn source(&self) -> SourceName;
}
