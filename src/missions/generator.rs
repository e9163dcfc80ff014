//! Turns qualifying trends into missions.
//!
//! A trend qualifies when `overall_score >= threshold`. It yields one mission
//! per category that resolves to at least one whitelisted location. Repeated
//! generation for the same `(trend, run_at, category)` is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::aggregate::Trend;
use crate::config::MissionPolicyConfig;
use crate::missions::{Mission, MissionBoard, MissionId, MissionKey, MissionStatus, Priority};

#[derive(Debug, Clone, PartialEq)]
pub struct RelevancePolicy {
    pub threshold: f64,
    pub locations: Vec<String>,
    pub category_locations: BTreeMap<String, Vec<String>>,
}

impl From<&MissionPolicyConfig> for RelevancePolicy {
    fn from(cfg: &MissionPolicyConfig) -> Self {
        Self {
            threshold: cfg.threshold,
            locations: cfg
                .locations
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            category_locations: cfg.category_locations.clone(),
        }
    }
}

impl RelevancePolicy {
    pub fn qualifies(&self, trend: &Trend) -> bool {
        trend.overall_score.is_finite() && trend.overall_score >= self.threshold
    }

    /// Whitelisted locations for `category`; empty means the category does not qualify.
    pub fn locations_for(&self, category: &str) -> Vec<String> {
        match self.category_locations.get(category) {
            Some(preferred) => preferred
                .iter()
                .filter(|l| self.locations.iter().any(|w| w == *l))
                .cloned()
                .collect(),
            None => self.locations.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MissionGenerator {
    policy: RelevancePolicy,
}

impl MissionGenerator {
    pub fn new(policy: RelevancePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RelevancePolicy {
        &self.policy
    }

    /// Create missions for every qualifying trend; returns only newly created ids.
    pub fn generate(
        &self,
        board: &MissionBoard,
        trends: &[Trend],
        now: DateTime<Utc>,
    ) -> Vec<MissionId> {
        let mut created = Vec::new();
        for trend in trends.iter().filter(|t| self.policy.qualifies(t)) {
            for category in &trend.categories {
                let locations = self.policy.locations_for(category);
                if locations.is_empty() {
                    tracing::debug!(
                        target: "missions",
                        trend = %trend.name,
                        %category,
                        "no whitelisted location for category"
                    );
                    continue;
                }
                let key = MissionKey {
                    trend: trend.name.clone(),
                    run_at: trend.run_at,
                    category: category.clone(),
                };
                let id = board.insert_if_absent(key, |id| {
                    build_mission(id, trend, category, locations, now)
                });
                if let Some(id) = id {
                    tracing::info!(
                        target: "missions",
                        %id,
                        trend = %trend.name,
                        %category,
                        score = trend.overall_score,
                        "mission created"
                    );
                    created.push(id);
                }
            }
        }
        counter!("missions_created_total").increment(created.len() as u64);
        created
    }
}

fn build_mission(
    id: MissionId,
    trend: &Trend,
    category: &str,
    locations: Vec<String>,
    now: DateTime<Utc>,
) -> Mission {
    let mut tags: BTreeSet<String> = BTreeSet::new();
    tags.insert(trend.name.clone());
    tags.insert(category.to_string());
    tags.extend(trend.sources.iter().map(|s| s.as_str().to_lowercase()));

    Mission {
        id,
        title: format!("Investigate {} ({})", trend.name, category),
        trend: trend.name.clone(),
        trend_run_at: trend.run_at,
        category: category.to_string(),
        tags,
        locations,
        priority: Priority::from_score(trend.overall_score),
        status: MissionStatus::Open,
        abandoned_by: Vec::new(),
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceName;
    use chrono::TimeZone;

    fn trend(name: &str, score: f64, cats: &[&str]) -> Trend {
        Trend {
            name: name.into(),
            category: cats[0].into(),
            categories: cats.iter().map(|c| c.to_string()).collect(),
            mention_count: 12,
            sources: BTreeSet::from([SourceName::from("hacker_news")]),
            source_count: 1,
            momentum_score: 0.0,
            overall_score: score,
            run_at: Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap(),
        }
    }

    fn policy() -> RelevancePolicy {
        RelevancePolicy {
            threshold: 60.0,
            locations: vec!["docs/investigations".into(), "docs/security".into()],
            category_locations: BTreeMap::from([
                ("security".to_string(), vec!["docs/security".to_string()]),
                ("finance".to_string(), vec!["docs/finance".to_string()]),
            ]),
        }
    }

    #[test]
    fn one_mission_per_whitelisted_category() {
        let board = MissionBoard::new();
        let g = MissionGenerator::new(policy());
        let now = Utc::now();
        let ids = g.generate(
            &board,
            &[trend("agents", 84.0, &["ai", "finance", "security"])],
            now,
        );
        // finance maps only to a non-whitelisted location
        assert_eq!(ids, vec![MissionId(1), MissionId(2)]);
        let sec = board.get(MissionId(2)).unwrap();
        assert_eq!(sec.category, "security");
        assert_eq!(sec.locations, vec!["docs/security".to_string()]);
        assert!(sec.tags.contains("hacker_news"));
        assert_eq!(sec.priority, Priority::High);
    }

    #[test]
    fn below_threshold_is_skipped() {
        let board = MissionBoard::new();
        let ids = MissionGenerator::new(policy()).generate(
            &board,
            &[trend("rust", 59.9, &["rust"])],
            Utc::now(),
        );
        assert!(ids.is_empty());
        assert!(board.is_empty());
    }
}
