//! # Dispatcher
//! Assignment cycle, timeout sweep and completion over the mission board and
//! the agent registry.
//!
//! Lock order is always mission mutex, then registry. The registry never
//! reaches back into the board, so the two cannot deadlock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;

use crate::config::RegistryConfig;
use crate::error::{AssignError, MissionError, TimeoutAbandonment};
use crate::missions::{Mission, MissionBoard, MissionId};
use crate::registry::{AgentProfile, AgentRegistry, DocumentRef, MatchScorer, MissionResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignmentPolicy {
    pub timeout: Duration,
    pub max_active_per_agent: usize,
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::hours(6),
            max_active_per_agent: 1,
        }
    }
}

impl From<&RegistryConfig> for AssignmentPolicy {
    fn from(cfg: &RegistryConfig) -> Self {
        Self {
            timeout: Duration::seconds(cfg.assignment_timeout_secs.max(1)),
            max_active_per_agent: cfg.max_active_per_agent.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub name: String,
    pub score: f64,
    #[serde(skip)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub mission: MissionId,
    pub agent: String,
    /// Candidates skipped because their slot was taken mid-claim.
    pub conflicts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignmentReport {
    pub abandoned: Vec<TimeoutAbandonment>,
    pub assigned: Vec<Assignment>,
    /// Still open after every candidate was tried.
    pub unassigned: Vec<MissionId>,
}

/// What an agent reports when it finishes a mission.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub agent: String,
    pub artifacts: Vec<DocumentRef>,
    pub quality_score: f64,
    pub success: bool,
}

pub struct Dispatcher {
    board: Arc<MissionBoard>,
    registry: Arc<AgentRegistry>,
    matcher: Arc<dyn MatchScorer>,
    policy: AssignmentPolicy,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        board: Arc<MissionBoard>,
        registry: Arc<AgentRegistry>,
        matcher: Arc<dyn MatchScorer>,
        policy: AssignmentPolicy,
    ) -> Self {
        Self {
            board,
            registry,
            matcher,
            policy,
        }
    }

    pub fn board(&self) -> &Arc<MissionBoard> {
        &self.board
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> AssignmentPolicy {
        self.policy
    }

    /// Eligible agents for `mission`, best first (score desc, name asc).
    pub fn rank_candidates(&self, mission: &Mission) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = self
            .registry
            .list()
            .into_iter()
            .filter(|a| !a.eliminated)
            .filter(|a| a.active.len() < self.policy.max_active_per_agent)
            .filter(|a| !mission.abandoned_by.contains(&a.profile.name))
            .filter_map(|a| {
                self.matcher.score(&a.profile, mission).map(|score| Candidate {
                    name: a.profile.name.clone(),
                    score,
                    version: a.version,
                })
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        out
    }

    /// Claim one mission for the best available agent. A slot conflict moves on
    /// to the next-best candidate; exhausting them leaves the mission claimable.
    pub fn assign(&self, id: MissionId, now: DateTime<Utc>) -> Result<Assignment, AssignError> {
        let handle = self
            .board
            .handle(id)
            .ok_or(AssignError::UnknownMission(id))?;
        let mut mission = handle.lock();
        if !mission.is_claimable() {
            return Err(MissionError::InvalidTransition {
                id,
                from: mission.status.name(),
                to: "assigned",
            }
            .into());
        }

        let mut conflicts = 0usize;
        for cand in self.rank_candidates(&mission) {
            match self.registry.reserve_slot(
                &cand.name,
                cand.version,
                id,
                self.policy.max_active_per_agent,
            ) {
                Ok(()) => {
                    if let Err(e) = mission.claim(&cand.name, now) {
                        self.registry.release_slot(&cand.name, id);
                        return Err(e.into());
                    }
                    counter!("missions_assigned_total").increment(1);
                    tracing::info!(
                        target: "dispatch",
                        mission = %id,
                        agent = %cand.name,
                        score = cand.score,
                        conflicts,
                        "mission assigned"
                    );
                    return Ok(Assignment {
                        mission: id,
                        agent: cand.name,
                        conflicts,
                    });
                }
                Err(AssignError::Conflict { .. }) => {
                    conflicts += 1;
                    counter!("assign_conflicts_total").increment(1);
                    tracing::debug!(
                        target: "dispatch",
                        mission = %id,
                        agent = %cand.name,
                        "slot conflict, trying next candidate"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(AssignError::NoEligibleAgent(id))
    }

    /// Abandon every claim older than the timeout and free the agent's slot.
    pub fn sweep_timeouts(&self, now: DateTime<Utc>) -> Vec<TimeoutAbandonment> {
        let mut out = Vec::new();
        for id in self.board.ids() {
            let Some(handle) = self.board.handle(id) else {
                continue;
            };
            let mut mission = handle.lock();
            if let Some(ev) = mission.abandon_if_expired(now, self.policy.timeout) {
                self.registry.release_slot(&ev.agent, id);
                counter!("missions_abandoned_total").increment(1);
                tracing::warn!(target: "dispatch", %ev, "assignment timed out");
                out.push(ev);
            }
        }
        out
    }

    /// Timeout sweep, then one assignment attempt per claimable mission (id order).
    pub fn run_cycle(&self, now: DateTime<Utc>) -> AssignmentReport {
        let mut report = AssignmentReport {
            abandoned: self.sweep_timeouts(now),
            ..AssignmentReport::default()
        };
        for id in self.board.ids() {
            let claimable = self.board.get(id).is_some_and(|m| m.is_claimable());
            if !claimable {
                continue;
            }
            match self.assign(id, now) {
                Ok(a) => report.assigned.push(a),
                Err(AssignError::NoEligibleAgent(id)) => {
                    tracing::warn!(target: "dispatch", mission = %id, "no eligible agent, mission stays open");
                    report.unassigned.push(id);
                }
                Err(e) => {
                    // Raced with another writer; the next cycle sees the new state.
                    tracing::debug!(target: "dispatch", mission = %id, error = %e, "skip");
                }
            }
        }
        report
    }

    /// Record a finished mission: rescore the agent, close the mission, free the slot.
    pub fn complete(
        &self,
        id: MissionId,
        done: Completion,
        now: DateTime<Utc>,
    ) -> Result<AgentProfile, AssignError> {
        let handle = self
            .board
            .handle(id)
            .ok_or(AssignError::UnknownMission(id))?;
        let mut mission = handle.lock();
        match mission.assignee() {
            Some(a) if a == done.agent => {}
            Some(a) => {
                return Err(MissionError::WrongAssignee {
                    id,
                    assignee: a.to_string(),
                    agent: done.agent,
                }
                .into())
            }
            None => {
                return Err(MissionError::InvalidTransition {
                    id,
                    from: mission.status.name(),
                    to: "completed",
                }
                .into())
            }
        }

        let result = MissionResult::new(id, &done.agent, done.quality_score, done.success, now)
            .with_artifacts(done.artifacts);
        let profile = self.registry.record_result(result.clone())?;
        mission.complete(result)?;
        self.registry.release_slot(&done.agent, id);

        counter!("missions_completed_total").increment(1);
        tracing::info!(
            target: "dispatch",
            mission = %id,
            agent = %done.agent,
            quality = done.quality_score,
            success = done.success,
            score = profile.performance_score,
            "mission completed"
        );
        Ok(profile)
    }
}
