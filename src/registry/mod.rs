//! # Agent Registry
//! Roster of agent profiles, their append-only mission history, and the
//! assignment slots they currently hold.
//!
//! The registry is the one shared mutable store in the pipeline. Reads hand
//! out a `Versioned` copy; writes go through `compare_and_swap`, which only
//! succeeds if the entry's version is unchanged since it was read. Profiles are
//! never removed: elimination only gates eligibility.

pub mod leaderboard;
pub mod matching;
pub mod performance;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AssignError, MissionError};
use crate::missions::MissionId;

pub use leaderboard::{HallOfFame, LeaderboardEntry};
pub use matching::{MatchScorer, TagOverlapScorer};
pub use performance::{EliminationPolicy, PerformanceScorer, WeightedRollingAverage};

/// Reference to a markdown artifact an agent produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl DocumentRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sha256: None,
        }
    }

    /// Attach a hex sha256 of the artifact content.
    pub fn with_content(mut self, content: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(content);
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        self.sha256 = Some(out);
        self
    }
}

/// Outcome of one completed mission. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionResult {
    pub mission_id: MissionId,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<DocumentRef>,
    /// 0..=100
    pub quality_score: f64,
    pub success: bool,
    #[serde(default = "epoch")]
    pub completed_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

impl MissionResult {
    pub fn new(
        mission_id: MissionId,
        agent_name: impl Into<String>,
        quality_score: f64,
        success: bool,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            mission_id,
            agent_name: agent_name.into(),
            artifacts: Vec::new(),
            quality_score,
            success,
            completed_at,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<DocumentRef>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn validate(&self) -> Result<(), MissionError> {
        if !self.quality_score.is_finite() || !(0.0..=100.0).contains(&self.quality_score) {
            return Err(MissionError::QualityOutOfRange(self.quality_score.to_string()));
        }
        Ok(())
    }
}

/// Persisted registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    #[serde(default)]
    pub specialization: String,
    pub performance_score: f64,
    #[serde(default)]
    pub history: Vec<MissionResult>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, specialization: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specialization: specialization.into(),
            performance_score: WeightedRollingAverage::default().initial_score,
            history: Vec::new(),
        }
    }

    /// Lowercased words of the specialization, e.g. `"AI, security"` -> {ai, security}.
    pub fn specialization_tags(&self) -> BTreeSet<String> {
        self.specialization
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    }

    pub fn successes(&self) -> usize {
        self.history.iter().filter(|r| r.success).count()
    }
}

/// A registry read: the profile plus the version a later CAS must match.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub profile: AgentProfile,
    pub version: u64,
    pub active: BTreeSet<MissionId>,
    pub eliminated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CasError {
    #[error("unknown agent {0}")]
    Unknown(String),
    #[error("agent {name} changed (expected v{expected}, found v{found})")]
    Stale {
        name: String,
        expected: u64,
        found: u64,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    profile: AgentProfile,
    version: u64,
    active: BTreeSet<MissionId>,
}

pub struct AgentRegistry {
    entries: RwLock<BTreeMap<String, Entry>>,
    scorer: Arc<dyn PerformanceScorer>,
    elimination: EliminationPolicy,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.entries.read().len())
            .field("elimination", &self.elimination)
            .finish_non_exhaustive()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(
            Arc::new(WeightedRollingAverage::default()),
            EliminationPolicy::default(),
        )
    }
}

impl AgentRegistry {
    pub fn new(scorer: Arc<dyn PerformanceScorer>, elimination: EliminationPolicy) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            scorer,
            elimination,
        }
    }

    /// Load persisted records. Scores are recomputed from history, never trusted.
    pub fn load(&self, records: Vec<AgentProfile>) {
        let mut entries = self.entries.write();
        for mut profile in records {
            profile.performance_score = self.scorer.score(&profile.history);
            entries.insert(
                profile.name.clone(),
                Entry {
                    profile,
                    version: 0,
                    active: BTreeSet::new(),
                },
            );
        }
    }

    pub fn records(&self) -> Vec<AgentProfile> {
        self.entries.read().values().map(|e| e.profile.clone()).collect()
    }

    pub fn register(&self, name: &str, specialization: &str) -> Result<AgentProfile, AssignError> {
        let name = name.trim();
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(AssignError::DuplicateAgent(name.to_string()));
        }
        let mut profile = AgentProfile::new(name, specialization.trim());
        profile.performance_score = self.scorer.score(&profile.history);
        entries.insert(
            name.to_string(),
            Entry {
                profile: profile.clone(),
                version: 0,
                active: BTreeSet::new(),
            },
        );
        tracing::info!(target: "dispatch", agent = name, "agent registered");
        Ok(profile)
    }

    pub fn get(&self, name: &str) -> Option<Versioned> {
        self.entries.read().get(name).map(|e| self.versioned(e))
    }

    pub fn list(&self) -> Vec<Versioned> {
        self.entries.read().values().map(|e| self.versioned(e)).collect()
    }

    /// History stays queryable for eliminated agents too.
    pub fn history(&self, name: &str) -> Option<Vec<MissionResult>> {
        self.entries.read().get(name).map(|e| e.profile.history.clone())
    }

    pub fn is_eliminated(&self, name: &str) -> bool {
        self.entries
            .read()
            .get(name)
            .is_some_and(|e| self.elimination.is_eliminated(&e.profile))
    }

    pub fn elimination_policy(&self) -> EliminationPolicy {
        self.elimination
    }

    /// Replace a profile if nobody touched it since `expected_version` was read.
    /// The score is always recomputed from the new history.
    pub fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        mut profile: AgentProfile,
    ) -> Result<u64, CasError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| CasError::Unknown(name.to_string()))?;
        if entry.version != expected_version {
            return Err(CasError::Stale {
                name: name.to_string(),
                expected: expected_version,
                found: entry.version,
            });
        }
        profile.name = entry.profile.name.clone();
        profile.performance_score = self.scorer.score(&profile.history);
        entry.profile = profile;
        entry.version += 1;
        Ok(entry.version)
    }

    /// Append a result and rescore. Retries the read-modify-write on CAS conflicts.
    pub fn record_result(&self, result: MissionResult) -> Result<AgentProfile, AssignError> {
        result.validate()?;
        loop {
            let current = self
                .get(&result.agent_name)
                .ok_or_else(|| AssignError::UnknownAgent(result.agent_name.clone()))?;
            let was_eliminated = current.eliminated;
            let mut next = current.profile;
            next.history.push(result.clone());
            match self.compare_and_swap(&result.agent_name, current.version, next) {
                Ok(_) => {
                    let updated = self
                        .get(&result.agent_name)
                        .ok_or_else(|| AssignError::UnknownAgent(result.agent_name.clone()))?;
                    if updated.eliminated && !was_eliminated {
                        counter!("agents_eliminated_total").increment(1);
                        tracing::warn!(
                            target: "dispatch",
                            agent = %result.agent_name,
                            score = updated.profile.performance_score,
                            floor = self.elimination.floor,
                            "agent fell below elimination floor"
                        );
                    }
                    return Ok(updated.profile);
                }
                Err(CasError::Stale { .. }) => {
                    tracing::debug!(target: "dispatch", agent = %result.agent_name, "cas retry");
                    continue;
                }
                Err(CasError::Unknown(n)) => return Err(AssignError::UnknownAgent(n)),
            }
        }
    }

    /// Take an assignment slot for `mission`. Fails if the agent changed since
    /// `expected_version`, is eliminated, or is already at `max_active`.
    pub fn reserve_slot(
        &self,
        name: &str,
        expected_version: u64,
        mission: MissionId,
        max_active: usize,
    ) -> Result<(), AssignError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| AssignError::UnknownAgent(name.to_string()))?;
        let conflict = entry.version != expected_version
            || self.elimination.is_eliminated(&entry.profile)
            || entry.active.len() >= max_active.max(1);
        if conflict {
            return Err(AssignError::Conflict {
                mission,
                agent: name.to_string(),
            });
        }
        entry.active.insert(mission);
        entry.version += 1;
        Ok(())
    }

    pub fn release_slot(&self, name: &str, mission: MissionId) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            if entry.active.remove(&mission) {
                entry.version += 1;
            }
        }
    }

    /// Rebuild a slot from persisted board state at startup.
    pub fn restore_slot(&self, name: &str, mission: MissionId) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.active.insert(mission);
        }
    }

    fn versioned(&self, e: &Entry) -> Versioned {
        Versioned {
            profile: e.profile.clone(),
            version: e.version,
            active: e.active.clone(),
            eliminated: self.elimination.is_eliminated(&e.profile),
        }
    }
}
