//! Typed failures for each pipeline stage.
//!
//! Stage code returns these; job glue (`pipeline`, `main`) wraps them with
//! `anyhow::Context` before logging.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::missions::MissionId;

/// Collector-level failure. Only `Network` is worth retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error from {source_name}: {detail}")]
    Network { source_name: String, detail: String },
    #[error("auth rejected by {source_name}: {detail}")]
    Auth { source_name: String, detail: String },
    #[error("cannot parse {source_name} payload: {detail}")]
    Parse { source_name: String, detail: String },
    #[error("collector {source_name} crashed: {detail}")]
    Panicked { source_name: String, detail: String },
}

impl FetchError {
    pub fn network(source: &str, detail: impl ToString) -> Self {
        Self::Network {
            source_name: source.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn auth(source: &str, detail: impl ToString) -> Self {
        Self::Auth {
            source_name: source.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn parse(source: &str, detail: impl ToString) -> Self {
        Self::Parse {
            source_name: source.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn panicked(source: &str, detail: impl ToString) -> Self {
        Self::Panicked {
            source_name: source.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Non-success HTTP status. 401/403 are auth problems, anything else is
    /// treated as transient.
    pub fn from_status(source: &str, status: u16) -> Self {
        match status {
            401 | 403 => Self::auth(source, format!("http {status}")),
            _ => Self::network(source, format!("http {status}")),
        }
    }

    /// Classify a reqwest failure; HTTP 401/403 are auth problems.
    pub fn from_reqwest(source: &str, err: reqwest::Error) -> Self {
        match err.status().map(|s| s.as_u16()) {
            Some(401) | Some(403) => Self::auth(source, err),
            _ if err.is_decode() => Self::parse(source, err),
            _ => Self::network(source, err),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("aggregation needs at least one snapshot")]
    EmptyInput,
}

/// Illegal lifecycle moves on a single mission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MissionError {
    #[error("mission {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: MissionId,
        from: &'static str,
        to: &'static str,
    },
    #[error("mission {id} is assigned to {assignee}, not {agent}")]
    WrongAssignee {
        id: MissionId,
        assignee: String,
        agent: String,
    },
    #[error("quality score {0} outside 0..=100")]
    QualityOutOfRange(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignError {
    /// The agent's slot was taken (or its record changed) between ranking and claim.
    #[error("agent {agent} could not take mission {mission}")]
    Conflict { mission: MissionId, agent: String },
    #[error("no eligible agent for mission {0}")]
    NoEligibleAgent(MissionId),
    #[error("unknown mission {0}")]
    UnknownMission(MissionId),
    #[error("unknown agent {0}")]
    UnknownAgent(String),
    #[error("agent {0} already registered")]
    DuplicateAgent(String),
    #[error(transparent)]
    Mission(#[from] MissionError),
}

/// A mission held past the assignment timeout. Recoverable by reassignment.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize)]
#[error("mission {mission} abandoned by {agent} (claimed {claimed_at})")]
pub struct TimeoutAbandonment {
    pub mission: MissionId,
    pub agent: String,
    pub claimed_at: DateTime<Utc>,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("job `{job}` already running (pid {pid}, since {since})")]
    Held {
        job: String,
        pid: u32,
        since: DateTime<Utc>,
    },
    #[error("lock io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store json at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
