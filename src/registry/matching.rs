//! Agent-to-mission match scoring.

use std::collections::BTreeSet;

use crate::config::RegistryConfig;
use crate::missions::Mission;
use crate::registry::AgentProfile;

/// Pluggable match policy. `None` means the agent is not a candidate.
pub trait MatchScorer: Send + Sync {
    fn score(&self, agent: &AgentProfile, mission: &Mission) -> Option<f64>;
}

/// Specialization/tag overlap blended with current performance.
///
/// `overlap` is the mean, over mission tags, of the best similarity against the
/// agent's specialization tags: 1.0 for an exact match, the Jaro-Winkler
/// similarity when it reaches `fuzzy_threshold` (`agent` vs `agents`), else 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagOverlapScorer {
    pub overlap_weight: f64,
    pub performance_weight: f64,
    pub fuzzy_threshold: f64,
    pub require_overlap: bool,
}

impl Default for TagOverlapScorer {
    fn default() -> Self {
        Self {
            overlap_weight: 0.7,
            performance_weight: 0.3,
            fuzzy_threshold: 0.9,
            require_overlap: false,
        }
    }
}

impl From<&RegistryConfig> for TagOverlapScorer {
    fn from(cfg: &RegistryConfig) -> Self {
        Self {
            overlap_weight: cfg.overlap_weight,
            performance_weight: cfg.performance_weight,
            fuzzy_threshold: cfg.fuzzy_threshold,
            require_overlap: cfg.require_overlap,
        }
    }
}

impl TagOverlapScorer {
    pub fn overlap(&self, agent_tags: &BTreeSet<String>, mission_tags: &BTreeSet<String>) -> f64 {
        if mission_tags.is_empty() || agent_tags.is_empty() {
            return 0.0;
        }
        let total: f64 = mission_tags
            .iter()
            .map(|m| {
                let m = m.to_lowercase();
                agent_tags
                    .iter()
                    .map(|a| {
                        if *a == m {
                            1.0
                        } else {
                            let sim = strsim::jaro_winkler(a, &m);
                            if sim >= self.fuzzy_threshold {
                                sim
                            } else {
                                0.0
                            }
                        }
                    })
                    .fold(0.0, f64::max)
            })
            .sum();
        total / mission_tags.len() as f64
    }
}

impl MatchScorer for TagOverlapScorer {
    fn score(&self, agent: &AgentProfile, mission: &Mission) -> Option<f64> {
        let overlap = self.overlap(&agent.specialization_tags(), &mission.tags);
        if self.require_overlap && overlap <= 0.0 {
            return None;
        }
        let perf = (agent.performance_score / 100.0).clamp(0.0, 1.0);
        Some(self.overlap_weight * overlap + self.performance_weight * perf)
    }
}
