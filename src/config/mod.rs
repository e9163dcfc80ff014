// src/config/mod.rs
//! Pipeline configuration: `config/pipeline.toml` plus env overrides.
//!
//! Every field has a serde default, so a missing file or a partial file is fine.
//! Path resolution: `$PIPELINE_CONFIG_PATH`, else `config/pipeline.toml`, else
//! built-in defaults.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregate::BandedScorer;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_DATA_DIR: &str = "PIPELINE_DATA_DIR";
pub const ENV_MISSION_THRESHOLD: &str = "MISSION_THRESHOLD";
pub const ENV_ELIMINATION_FLOOR: &str = "ELIMINATION_FLOOR";
pub const ENV_ASSIGNMENT_TIMEOUT: &str = "ASSIGNMENT_TIMEOUT_SECS";
pub const ENV_BIND: &str = "PIPELINE_BIND";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub collectors: CollectorsConfig,
    pub aggregator: AggregatorConfig,
    /// `category -> keywords`; empty means the built-in seed.
    pub topics: BTreeMap<String, Vec<String>>,
    pub missions: MissionPolicyConfig,
    pub registry: RegistryConfig,
    pub agents: Vec<AgentSeed>,
    pub notify: NotifyConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// A lock older than this is considered left behind by a crashed run.
    pub stale_lock_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            stale_lock_secs: 2 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub collect_interval_secs: u64,
    pub aggregate_interval_secs: u64,
    pub assign_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collect_interval_secs: 6 * 3600,
            aggregate_interval_secs: 6 * 3600,
            assign_interval_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    /// Which providers run: `hacker_news`, `tldr`, `github_trending`.
    pub enabled: Vec<String>,
    pub window_hours: i64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub hacker_news_url: String,
    pub hacker_news_limit: usize,
    pub tldr_url: String,
    pub github_url: String,
    pub github_limit: usize,
    pub github_lookback_days: i64,
    /// Terms listed in the snapshot file's `trends` field.
    pub snapshot_trend_count: usize,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            enabled: vec![
                "hacker_news".to_string(),
                "tldr".to_string(),
                "github_trending".to_string(),
            ],
            window_hours: 24,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            request_timeout_secs: 15,
            hacker_news_url: "https://hacker-news.firebaseio.com/v0".to_string(),
            hacker_news_limit: 30,
            tldr_url: "https://tldr.tech/api/rss/tech".to_string(),
            github_url: "https://api.github.com".to_string(),
            github_limit: 30,
            github_lookback_days: 7,
            snapshot_trend_count: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Only snapshots newer than this feed a run.
    pub lookback_hours: i64,
    pub min_token_len: usize,
    pub min_mentions: u64,
    pub max_trends: Option<usize>,
    pub stopwords: Vec<String>,
    pub aliases: HashMap<String, String>,
    pub phrases: Vec<String>,
    pub scoring: BandedScorer,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            min_token_len: 3,
            min_mentions: 2,
            max_trends: Some(50),
            stopwords: Vec::new(),
            aliases: HashMap::new(),
            phrases: Vec::new(),
            scoring: BandedScorer::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionPolicyConfig {
    /// Minimum `overall_score` for a trend to become missions.
    pub threshold: f64,
    /// Whitelist of locations a mission may target.
    pub locations: Vec<String>,
    /// Preferred locations per category; filtered through the whitelist.
    pub category_locations: BTreeMap<String, Vec<String>>,
}

impl Default for MissionPolicyConfig {
    fn default() -> Self {
        Self {
            threshold: 60.0,
            locations: vec!["docs/investigations".to_string()],
            category_locations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub elimination_floor: f64,
    /// Results needed before an agent can be eliminated.
    pub min_history: usize,
    pub initial_score: f64,
    pub window: usize,
    pub decay: f64,
    pub failure_penalty: f64,
    pub assignment_timeout_secs: i64,
    pub max_active_per_agent: usize,
    pub overlap_weight: f64,
    pub performance_weight: f64,
    pub require_overlap: bool,
    pub fuzzy_threshold: f64,
    pub hall_of_fame_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            elimination_floor: 40.0,
            min_history: 3,
            initial_score: 50.0,
            window: 10,
            decay: 0.8,
            failure_penalty: 0.5,
            assignment_timeout_secs: 6 * 3600,
            max_active_per_agent: 1,
            overlap_weight: 0.7,
            performance_weight: 0.3,
            require_overlap: false,
            fuzzy_threshold: 0.9,
            hall_of_fame_size: 10,
        }
    }
}

/// Roster entry from config; existing registry records take precedence.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AgentSeed {
    pub name: String,
    #[serde(default)]
    pub specialization: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub cooldown_secs: i64,
    /// Per-request webhook timeout.
    pub timeout_secs: u64,
    pub retries: u8,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3 * 3600,
            timeout_secs: 5,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config toml")?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Resolve path, load, apply env overrides, validate.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.storage.data_dir = PathBuf::from(dir.trim());
            }
        }
        if let Some(t) = parse_score_env(std::env::var(ENV_MISSION_THRESHOLD).ok()) {
            self.missions.threshold = t;
        }
        if let Some(f) = parse_score_env(std::env::var(ENV_ELIMINATION_FLOOR).ok()) {
            self.registry.elimination_floor = f;
        }
        if let Some(secs) = std::env::var(ENV_ASSIGNMENT_TIMEOUT)
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
        {
            self.registry.assignment_timeout_secs = secs;
        }
        if let Ok(bind) = std::env::var(ENV_BIND) {
            if !bind.trim().is_empty() {
                self.server.bind = bind.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.missions;
        if !in_range(m.threshold, 0.0, 100.0) {
            bail!("missions.threshold must be within 0..=100, got {}", m.threshold);
        }
        if m.locations.iter().all(|l| l.trim().is_empty()) {
            bail!("missions.locations whitelist is empty");
        }
        let r = &self.registry;
        if !in_range(r.elimination_floor, 0.0, 100.0) {
            bail!("registry.elimination_floor must be within 0..=100");
        }
        if !in_range(r.initial_score, 0.0, 100.0) {
            bail!("registry.initial_score must be within 0..=100");
        }
        if r.assignment_timeout_secs <= 0 {
            bail!("registry.assignment_timeout_secs must be positive");
        }
        if !in_range(r.decay, 0.0, 1.0) || !in_range(r.failure_penalty, 0.0, 1.0) {
            bail!("registry.decay and registry.failure_penalty must be within 0..=1");
        }
        if !in_range(r.overlap_weight, 0.0, 1.0) || !in_range(r.performance_weight, 0.0, 1.0) {
            bail!("registry.overlap_weight and registry.performance_weight must be within 0..=1");
        }
        if r.overlap_weight + r.performance_weight <= 0.0 {
            bail!("registry match weights must not both be zero");
        }
        if !in_range(r.fuzzy_threshold, 0.0, 1.0) {
            bail!("registry.fuzzy_threshold must be within 0..=1");
        }
        if r.window == 0 || r.max_active_per_agent == 0 {
            bail!("registry.window and registry.max_active_per_agent must be >= 1");
        }
        if self.collectors.retry_attempts == 0 {
            bail!("collectors.retry_attempts must be >= 1");
        }
        let mut seen = std::collections::BTreeSet::new();
        for a in &self.agents {
            if a.name.trim().is_empty() {
                bail!("agent seed with empty name");
            }
            if !seen.insert(a.name.trim().to_string()) {
                bail!("duplicate agent seed `{}`", a.name);
            }
        }
        Ok(())
    }
}

fn in_range(v: f64, lo: f64, hi: f64) -> bool {
    v.is_finite() && (lo..=hi).contains(&v)
}

// parse optional score env and clamp to <0.0..=100.0>
fn parse_score_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 100.0))
}
