//! # Trend Aggregator
//! Merges a set of snapshots into scored `Trend` records.
//!
//! Pure and deterministic: same snapshot set in, same trends out, no matter
//! the order the snapshots arrive in. Ranking is mention count desc, then
//! source diversity desc, then name asc.

pub mod scoring;
pub mod tokenize;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::config::AggregatorConfig;
use crate::error::AggregateError;
use crate::ingest::topics::TopicClassifier;
use crate::ingest::types::{LearningSnapshot, SnapshotItem, SourceName};

pub use scoring::{BandedScorer, LinearScorer, TrendScorer};
pub use tokenize::Tokenizer;

pub const GENERAL_CATEGORY: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub name: String,
    /// Most frequent category among mentioning items.
    pub category: String,
    /// Every category seen on a mentioning item.
    pub categories: BTreeSet<String>,
    pub mention_count: u64,
    pub sources: BTreeSet<SourceName>,
    pub source_count: usize,
    /// In [-1, 1]; positive when the newer half of the input mentions it more.
    pub momentum_score: f64,
    pub overall_score: f64,
    pub run_at: DateTime<Utc>,
}

/// Raw per-term counts before scoring and filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionTally {
    pub count: u64,
    pub sources: BTreeSet<SourceName>,
    pub category_hits: BTreeMap<String, u64>,
    pub recent: u64,
    pub earlier: u64,
}

/// Persisted output of one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRun {
    pub run_at: DateTime<Utc>,
    pub snapshot_count: usize,
    pub trends: Vec<Trend>,
}

#[derive(Clone)]
pub struct Aggregator {
    tokenizer: Tokenizer,
    topics: TopicClassifier,
    scorer: Arc<dyn TrendScorer>,
    min_mentions: u64,
    max_trends: Option<usize>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("min_mentions", &self.min_mentions)
            .field("max_trends", &self.max_trends)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    pub fn new(tokenizer: Tokenizer, topics: TopicClassifier, scorer: Arc<dyn TrendScorer>) -> Self {
        Self {
            tokenizer,
            topics,
            scorer,
            min_mentions: 1,
            max_trends: None,
        }
    }

    pub fn from_config(cfg: &AggregatorConfig, topics: TopicClassifier) -> Self {
        let tokenizer = Tokenizer::new(cfg.min_token_len, &cfg.stopwords, &cfg.aliases, &cfg.phrases);
        Self::new(tokenizer, topics, Arc::new(cfg.scoring))
            .with_min_mentions(cfg.min_mentions)
            .with_max_trends(cfg.max_trends)
    }

    pub fn with_min_mentions(mut self, n: u64) -> Self {
        self.min_mentions = n.max(1);
        self
    }

    pub fn with_max_trends(mut self, n: Option<usize>) -> Self {
        self.max_trends = n;
        self
    }

    pub fn topics(&self) -> &TopicClassifier {
        &self.topics
    }

    /// Count every term occurrence across the (deduplicated) snapshot set.
    pub fn count_mentions(&self, snapshots: &[LearningSnapshot]) -> BTreeMap<String, MentionTally> {
        let set = dedup_snapshots(snapshots);
        let midpoint = midpoint(&set);

        let mut tallies: BTreeMap<String, MentionTally> = BTreeMap::new();
        for snap in &set {
            let half = midpoint.map(|m| snap.timestamp > m);
            for item in &snap.items {
                let text = item.text();
                let terms = self.tokenizer.terms(&text);
                if terms.is_empty() {
                    continue;
                }
                let cats = self.topics.categories_for(&text);
                let mut seen_in_item: BTreeSet<&str> = BTreeSet::new();
                for term in &terms {
                    let t = tallies.entry(term.clone()).or_default();
                    t.count += 1;
                    match half {
                        Some(true) => t.recent += 1,
                        Some(false) => t.earlier += 1,
                        None => {}
                    }
                    t.sources.insert(snap.source.clone());
                    if seen_in_item.insert(term.as_str()) {
                        for c in &cats {
                            *t.category_hits.entry(c.clone()).or_default() += 1;
                        }
                    }
                }
            }
        }
        tallies
    }

    /// Score and rank trends. Zero snapshots is an error, not an empty list.
    pub fn aggregate(
        &self,
        snapshots: &[LearningSnapshot],
        run_at: DateTime<Utc>,
    ) -> Result<Vec<Trend>, AggregateError> {
        if snapshots.is_empty() {
            return Err(AggregateError::EmptyInput);
        }

        let tallies = self.count_mentions(snapshots);
        let mut trends: Vec<Trend> = tallies
            .into_iter()
            .filter(|(_, t)| t.count >= self.min_mentions)
            .map(|(name, t)| self.to_trend(name, t, run_at))
            .collect();

        rank(&mut trends);
        if let Some(n) = self.max_trends {
            trends.truncate(n);
        }

        counter!("aggregate_runs_total").increment(1);
        counter!("trends_scored_total").increment(trends.len() as u64);
        tracing::info!(
            target: "aggregate",
            snapshots = snapshots.len(),
            trends = trends.len(),
            top = trends.first().map(|t| t.name.as_str()).unwrap_or("-"),
            "aggregation run"
        );
        Ok(trends)
    }

    /// Top `k` terms of a single snapshot's items, for the snapshot file's `trends` field.
    pub fn top_terms(&self, items: &[SnapshotItem], k: usize) -> Vec<String> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for it in items {
            for term in self.tokenizer.terms(&it.text()) {
                *counts.entry(term).or_default() += 1;
            }
        }
        let mut v: Vec<(String, u64)> = counts
            .into_iter()
            .filter(|(_, c)| *c >= self.min_mentions)
            .collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        v.into_iter().take(k).map(|(t, _)| t).collect()
    }

    fn to_trend(&self, name: String, t: MentionTally, run_at: DateTime<Utc>) -> Trend {
        let source_count = t.sources.len();
        let category = t
            .category_hits
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| GENERAL_CATEGORY.to_string());
        let categories: BTreeSet<String> = if t.category_hits.is_empty() {
            BTreeSet::from([GENERAL_CATEGORY.to_string()])
        } else {
            t.category_hits.keys().cloned().collect()
        };
        let momentum_score = if t.recent + t.earlier == 0 {
            0.0
        } else {
            (t.recent as f64 - t.earlier as f64) / (t.recent + t.earlier) as f64
        };

        Trend {
            overall_score: self.scorer.overall_score(t.count, source_count),
            name,
            category,
            categories,
            mention_count: t.count,
            sources: t.sources,
            source_count,
            momentum_score,
            run_at,
        }
    }
}

/// Deterministic order: mention_count desc, source_count desc, name asc.
pub fn rank(trends: &mut [Trend]) {
    trends.sort_by(|a, b| {
        b.mention_count
            .cmp(&a.mention_count)
            .then_with(|| b.source_count.cmp(&a.source_count))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Treat input as a set keyed by `(source, timestamp)`, sorted by that key.
/// Among duplicates the one with more items wins, then the greater content,
/// so the survivor never depends on arrival order.
fn dedup_snapshots(snapshots: &[LearningSnapshot]) -> Vec<&LearningSnapshot> {
    let mut by_key: BTreeMap<(SourceName, DateTime<Utc>), (&LearningSnapshot, (usize, String))> =
        BTreeMap::new();
    for s in snapshots {
        let rank = content_rank(s);
        by_key
            .entry(s.key())
            .and_modify(|cur| {
                if rank > cur.1 {
                    *cur = (s, rank.clone());
                }
            })
            .or_insert((s, rank));
    }
    by_key.into_values().map(|(s, _)| s).collect()
}

fn content_rank(s: &LearningSnapshot) -> (usize, String) {
    (s.items.len(), serde_json::to_string(s).unwrap_or_default())
}

/// None when all snapshots share a timestamp (no momentum signal).
fn midpoint(set: &[&LearningSnapshot]) -> Option<DateTime<Utc>> {
    let min = set.iter().map(|s| s.timestamp).min()?;
    let max = set.iter().map(|s| s.timestamp).max()?;
    if min == max {
        return None;
    }
    Some(min + (max - min) / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, 0, 0).unwrap()
    }

    fn snap(source: &str, h: u32, titles: &[&str]) -> LearningSnapshot {
        let items = titles.iter().map(|t| SnapshotItem::new(*t, "")).collect();
        LearningSnapshot::new(source.into(), ts(h), items)
    }

    fn agg() -> Aggregator {
        Aggregator::new(
            Tokenizer::default(),
            TopicClassifier::default_seed(),
            Arc::new(BandedScorer::default()),
        )
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(agg().aggregate(&[], ts(0)), Err(AggregateError::EmptyInput));
    }

    #[test]
    fn ties_break_on_sources_then_name() {
        let snaps = vec![
            snap("hn", 1, &["zebra", "zebra", "apple", "mango"]),
            snap("tldr", 1, &["apple", "mango"]),
        ];
        let trends = agg().aggregate(&snaps, ts(2)).unwrap();
        let names: Vec<_> = trends.iter().map(|t| t.name.as_str()).collect();
        // all have 2 mentions; apple/mango have 2 sources
        assert_eq!(names, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn momentum_follows_newer_half() {
        let snaps = vec![snap("hn", 0, &["rust"]), snap("hn", 10, &["rust", "rust", "rust"])];
        let t = &agg().aggregate(&snaps, ts(11)).unwrap()[0];
        assert_eq!(t.name, "rust");
        assert!((t.momentum_score - 0.5).abs() < 1e-9);

        let flat = vec![snap("hn", 3, &["rust"]), snap("tldr", 3, &["rust"])];
        assert_eq!(agg().aggregate(&flat, ts(4)).unwrap()[0].momentum_score, 0.0);
    }

    #[test]
    fn category_is_most_frequent_and_general_fallback() {
        let snaps = vec![snap(
            "hn",
            1,
            &["agents llm", "agents llm", "agents security", "quokka"],
        )];
        let trends = agg().aggregate(&snaps, ts(2)).unwrap();
        let agents = trends.iter().find(|t| t.name == "agents").unwrap();
        assert_eq!(agents.category, "ai");
        assert!(agents.categories.contains("security"));
        let quokka = trends.iter().find(|t| t.name == "quokka").unwrap();
        assert_eq!(quokka.category, GENERAL_CATEGORY);
    }

    #[test]
    fn duplicate_snapshot_counted_once() {
        let s = snap("hn", 1, &["agents"]);
        let trends = agg().aggregate(&[s.clone(), s], ts(2)).unwrap();
        assert_eq!(trends[0].mention_count, 1);
    }

    #[test]
    fn min_mentions_filters() {
        let snaps = vec![snap("hn", 1, &["agents agents", "rust"])];
        let trends = agg().with_min_mentions(2).aggregate(&snaps, ts(2)).unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].name, "agents");
    }
}
