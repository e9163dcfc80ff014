//! Trend scoring strategies.
//!
//! `overall_score` must be monotonic (non-decreasing) in both mention count and
//! source diversity. The default `BandedScorer` compresses mentions
//! logarithmically and floors the result to fixed-width bands, so trends with
//! quite different counts can land on the same score (e.g. both 84.0).
//!
//! raw   = mention_weight * log10(1 + mentions) + diversity_weight * (sources - 1)
//! score = min(max_score, floor(raw / band_width) * band_width)

use serde::Deserialize;

/// Pluggable strategy for `overall_score`.
pub trait TrendScorer: Send + Sync {
    fn overall_score(&self, mention_count: u64, source_count: usize) -> f64;
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct BandedScorer {
    pub mention_weight: f64,
    pub diversity_weight: f64,
    pub band_width: f64,
    pub max_score: f64,
}

impl Default for BandedScorer {
    fn default() -> Self {
        Self {
            mention_weight: 40.0,
            diversity_weight: 12.0,
            band_width: 4.0,
            max_score: 100.0,
        }
    }
}

impl TrendScorer for BandedScorer {
    fn overall_score(&self, mention_count: u64, source_count: usize) -> f64 {
        if mention_count == 0 {
            return 0.0;
        }
        let mentions = self.mention_weight.max(0.0) * (1.0 + mention_count as f64).log10();
        let diversity = self.diversity_weight.max(0.0) * source_count.saturating_sub(1) as f64;
        let raw = mentions + diversity;
        let banded = if self.band_width > 0.0 {
            (raw / self.band_width).floor() * self.band_width
        } else {
            raw
        };
        banded.clamp(0.0, self.max_score.max(0.0))
    }
}

/// Unbanded, uncapped variant; handy for ranking experiments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScorer;

impl TrendScorer for LinearScorer {
    fn overall_score(&self, mention_count: u64, source_count: usize) -> f64 {
        mention_count as f64 + source_count as f64
    }
}
