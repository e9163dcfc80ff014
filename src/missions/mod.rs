//! # Missions
//! Mission records, their lifecycle, and the board that owns them.
//!
//! Lifecycle: `Open -> Assigned -> Completed | Abandoned`, and
//! `Abandoned -> Assigned` on reassignment. Every move goes through a method on
//! `Mission`; anything else is a `MissionError::InvalidTransition`.
//!
//! The board keeps one mutex per mission so a claim is a short critical
//! section on that mission only.

pub mod generator;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{MissionError, TimeoutAbandonment};
use crate::registry::MissionResult;

pub use generator::{MissionGenerator, RelevancePolicy};

/// `idea:<n>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MissionId(pub u64);

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idea:{}", self.0)
    }
}

impl FromStr for MissionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .strip_prefix("idea:")
            .and_then(|n| n.parse::<u64>().ok())
            .map(MissionId)
            .ok_or_else(|| format!("invalid mission id `{s}`"))
    }
}

impl TryFrom<String> for MissionId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MissionId> for String {
    fn from(id: MissionId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn from_score(overall_score: f64) -> Self {
        if overall_score >= 90.0 {
            Priority::Critical
        } else if overall_score >= 80.0 {
            Priority::High
        } else if overall_score >= 70.0 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MissionStatus {
    Open,
    Assigned {
        agent: String,
        claimed_at: DateTime<Utc>,
    },
    Completed {
        result: MissionResult,
    },
    Abandoned {
        agent: String,
        claimed_at: DateTime<Utc>,
        abandoned_at: DateTime<Utc>,
    },
}

impl MissionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            MissionStatus::Open => "open",
            MissionStatus::Assigned { .. } => "assigned",
            MissionStatus::Completed { .. } => "completed",
            MissionStatus::Abandoned { .. } => "abandoned",
        }
    }
}

/// Idempotency key for generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MissionKey {
    pub trend: String,
    pub run_at: DateTime<Utc>,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub title: String,
    pub trend: String,
    pub trend_run_at: DateTime<Utc>,
    pub category: String,
    pub tags: BTreeSet<String>,
    pub locations: Vec<String>,
    pub priority: Priority,
    #[serde(flatten)]
    pub status: MissionStatus,
    /// Agents that let this mission time out; skipped on reassignment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abandoned_by: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Mission {
    pub fn key(&self) -> MissionKey {
        MissionKey {
            trend: self.trend.clone(),
            run_at: self.trend_run_at,
            category: self.category.clone(),
        }
    }

    pub fn is_claimable(&self) -> bool {
        matches!(
            self.status,
            MissionStatus::Open | MissionStatus::Abandoned { .. }
        )
    }

    pub fn assignee(&self) -> Option<&str> {
        match &self.status {
            MissionStatus::Assigned { agent, .. } => Some(agent.as_str()),
            _ => None,
        }
    }

    pub fn claim(&mut self, agent: &str, now: DateTime<Utc>) -> Result<(), MissionError> {
        if !self.is_claimable() {
            return Err(self.invalid("assigned"));
        }
        self.status = MissionStatus::Assigned {
            agent: agent.to_string(),
            claimed_at: now,
        };
        Ok(())
    }

    pub fn complete(&mut self, result: MissionResult) -> Result<(), MissionError> {
        match &self.status {
            MissionStatus::Assigned { agent, .. } if *agent == result.agent_name => {
                self.status = MissionStatus::Completed { result };
                Ok(())
            }
            MissionStatus::Assigned { agent, .. } => Err(MissionError::WrongAssignee {
                id: self.id,
                assignee: agent.clone(),
                agent: result.agent_name,
            }),
            _ => Err(self.invalid("completed")),
        }
    }

    /// Move to `Abandoned` when the claim is at least `timeout` old.
    pub fn abandon_if_expired(
        &mut self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Option<TimeoutAbandonment> {
        let MissionStatus::Assigned { agent, claimed_at } = &self.status else {
            return None;
        };
        if now.signed_duration_since(*claimed_at) < timeout {
            return None;
        }
        let ev = TimeoutAbandonment {
            mission: self.id,
            agent: agent.clone(),
            claimed_at: *claimed_at,
            abandoned_at: now,
        };
        if !self.abandoned_by.contains(&ev.agent) {
            self.abandoned_by.push(ev.agent.clone());
        }
        self.status = MissionStatus::Abandoned {
            agent: ev.agent.clone(),
            claimed_at: ev.claimed_at,
            abandoned_at: now,
        };
        Some(ev)
    }

    fn invalid(&self, to: &'static str) -> MissionError {
        MissionError::InvalidTransition {
            id: self.id,
            from: self.status.name(),
            to,
        }
    }
}

/// Persisted board shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardRecord {
    pub next_id: u64,
    pub missions: Vec<Mission>,
}

#[derive(Debug, Default)]
struct BoardInner {
    next_id: u64,
    missions: BTreeMap<MissionId, Arc<Mutex<Mission>>>,
    keys: HashMap<MissionKey, MissionId>,
}

/// All missions, keyed by id, each behind its own mutex.
#[derive(Debug, Default)]
pub struct MissionBoard {
    inner: RwLock<BoardInner>,
}

impl MissionBoard {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BoardInner {
                next_id: 1,
                ..BoardInner::default()
            }),
        }
    }

    pub fn from_record(rec: BoardRecord) -> Self {
        let max_seen = rec.missions.iter().map(|m| m.id.0).max().unwrap_or(0);
        let mut inner = BoardInner {
            next_id: rec.next_id.max(max_seen + 1).max(1),
            ..BoardInner::default()
        };
        for m in rec.missions {
            inner.keys.insert(m.key(), m.id);
            inner.missions.insert(m.id, Arc::new(Mutex::new(m)));
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn to_record(&self) -> BoardRecord {
        let inner = self.inner.read();
        BoardRecord {
            next_id: inner.next_id,
            missions: inner.missions.values().map(|m| m.lock().clone()).collect(),
        }
    }

    /// Allocate the next id and insert, unless `key` already has a mission.
    pub fn insert_if_absent(
        &self,
        key: MissionKey,
        build: impl FnOnce(MissionId) -> Mission,
    ) -> Option<MissionId> {
        let mut inner = self.inner.write();
        if inner.keys.contains_key(&key) {
            return None;
        }
        let id = MissionId(inner.next_id);
        inner.next_id += 1;
        let mission = build(id);
        inner.keys.insert(key, id);
        inner.missions.insert(id, Arc::new(Mutex::new(mission)));
        Some(id)
    }

    pub fn contains_key(&self, key: &MissionKey) -> bool {
        self.inner.read().keys.contains_key(key)
    }

    pub fn handle(&self, id: MissionId) -> Option<Arc<Mutex<Mission>>> {
        self.inner.read().missions.get(&id).cloned()
    }

    pub fn get(&self, id: MissionId) -> Option<Mission> {
        self.handle(id).map(|m| m.lock().clone())
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<MissionId> {
        self.inner.read().missions.keys().copied().collect()
    }

    pub fn list(&self) -> Vec<Mission> {
        self.to_record().missions
    }

    pub fn len(&self) -> usize {
        self.inner.read().missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
    }

    fn mission(id: u64) -> Mission {
        Mission {
            id: MissionId(id),
            title: "Investigate agents (ai)".into(),
            trend: "agents".into(),
            trend_run_at: t0(),
            category: "ai".into(),
            tags: BTreeSet::from(["agents".to_string(), "ai".to_string()]),
            locations: vec!["docs/investigations".into()],
            priority: Priority::High,
            status: MissionStatus::Open,
            abandoned_by: Vec::new(),
            created_at: t0(),
        }
    }

    #[test]
    fn id_display_and_parse() {
        assert_eq!(MissionId(42).to_string(), "idea:42");
        assert_eq!("idea:7".parse::<MissionId>(), Ok(MissionId(7)));
        assert!("idea-7".parse::<MissionId>().is_err());
    }

    #[test]
    fn record_shape_is_flat_with_status() {
        let v = serde_json::to_value(mission(3)).unwrap();
        assert_eq!(v["id"], "idea:3");
        assert_eq!(v["status"], "open");
        assert!(v["tags"].is_array());
        assert!(v["locations"].is_array());
        let back: Mission = serde_json::from_value(v).unwrap();
        assert_eq!(back, mission(3));
    }

    #[test]
    fn lifecycle_rejects_illegal_moves() {
        let mut m = mission(1);
        let result = MissionResult::new(MissionId(1), "ada", 80.0, true, t0());
        assert!(matches!(
            m.complete(result.clone()),
            Err(MissionError::InvalidTransition { from: "open", .. })
        ));

        m.claim("ada", t0()).unwrap();
        assert!(m.claim("bob", t0()).is_err());

        let wrong = MissionResult::new(MissionId(1), "bob", 80.0, true, t0());
        assert!(matches!(m.complete(wrong), Err(MissionError::WrongAssignee { .. })));

        m.complete(result).unwrap();
        assert_eq!(m.status.name(), "completed");
        assert!(m.claim("bob", t0()).is_err());
    }

    #[test]
    fn timeout_abandons_and_allows_reclaim() {
        let mut m = mission(1);
        m.claim("ada", t0()).unwrap();
        assert!(m
            .abandon_if_expired(t0() + Duration::minutes(59), Duration::hours(1))
            .is_none());
        let ev = m
            .abandon_if_expired(t0() + Duration::hours(1), Duration::hours(1))
            .unwrap();
        assert_eq!(ev.agent, "ada");
        assert_eq!(m.abandoned_by, vec!["ada".to_string()]);
        assert!(m.is_claimable());
        m.claim("bob", t0() + Duration::hours(2)).unwrap();
        assert_eq!(m.assignee(), Some("bob"));
    }

    #[test]
    fn board_is_idempotent_per_key_and_restores_counter() {
        let board = MissionBoard::new();
        let key = mission(0).key();
        let a = board.insert_if_absent(key.clone(), |id| Mission { id, ..mission(0) });
        let b = board.insert_if_absent(key, |id| Mission { id, ..mission(0) });
        assert_eq!(a, Some(MissionId(1)));
        assert_eq!(b, None);

        let restored = MissionBoard::from_record(board.to_record());
        let mut other = mission(0);
        other.category = "security".into();
        let c = restored.insert_if_absent(other.key(), |id| Mission { id, ..other.clone() });
        assert_eq!(c, Some(MissionId(2)));
    }
}
