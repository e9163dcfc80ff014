//! Agent performance scoring and elimination gating.
//!
//! `WeightedRollingAverage` looks at the last `window` results. The most recent
//! result has weight 1.0 and each older one is multiplied by `decay`:
//!
//!   value_i  = quality_i                      (success)
//!            = quality_i * failure_penalty    (failure)
//!   score    = sum(w_i * value_i) / sum(w_i),  w_i = decay^age_i
//!
//! An empty history scores `initial_score`. Output is clamped to [0, 100].

use crate::config::RegistryConfig;
use crate::registry::{AgentProfile, MissionResult};

pub trait PerformanceScorer: Send + Sync {
    fn score(&self, history: &[MissionResult]) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedRollingAverage {
    pub window: usize,
    pub decay: f64,
    pub failure_penalty: f64,
    pub initial_score: f64,
}

impl Default for WeightedRollingAverage {
    fn default() -> Self {
        Self {
            window: 10,
            decay: 0.8,
            failure_penalty: 0.5,
            initial_score: 50.0,
        }
    }
}

impl From<&RegistryConfig> for WeightedRollingAverage {
    fn from(cfg: &RegistryConfig) -> Self {
        Self {
            window: cfg.window.max(1),
            decay: cfg.decay,
            failure_penalty: cfg.failure_penalty,
            initial_score: cfg.initial_score,
        }
    }
}

impl PerformanceScorer for WeightedRollingAverage {
    fn score(&self, history: &[MissionResult]) -> f64 {
        if history.is_empty() {
            return self.initial_score.clamp(0.0, 100.0);
        }
        let mut num = 0.0;
        let mut den = 0.0;
        let mut w = 1.0;
        for r in history.iter().rev().take(self.window.max(1)) {
            let q = r.quality_score.clamp(0.0, 100.0);
            let value = if r.success { q } else { q * self.failure_penalty };
            num += w * value;
            den += w;
            w *= self.decay;
        }
        if den <= f64::EPSILON {
            return self.initial_score.clamp(0.0, 100.0);
        }
        (num / den).clamp(0.0, 100.0)
    }
}

/// Who may receive new missions. Eliminated agents keep their history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EliminationPolicy {
    pub floor: f64,
    pub min_history: usize,
}

impl Default for EliminationPolicy {
    fn default() -> Self {
        Self {
            floor: 40.0,
            min_history: 3,
        }
    }
}

impl From<&RegistryConfig> for EliminationPolicy {
    fn from(cfg: &RegistryConfig) -> Self {
        Self {
            floor: cfg.elimination_floor,
            min_history: cfg.min_history,
        }
    }
}

impl EliminationPolicy {
    pub fn is_eliminated(&self, profile: &AgentProfile) -> bool {
        profile.history.len() >= self.min_history && profile.performance_score < self.floor
    }
}
