//! # Pipeline
//! Owns the shared state (board, registry, latest trends) and runs the three
//! scheduled jobs against it:
//!
//! - `collect`: every collector once, one snapshot file per source.
//! - `aggregate`: recent snapshots -> trend run -> missions.
//! - `assign`: timeout sweep, then an assignment cycle.
//!
//! Each job holds its file lock for the duration of the run, records an entry
//! in the run history and persists what it changed.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::aggregate::{Aggregator, TrendRun};
use crate::config::PipelineConfig;
use crate::dispatch::{AssignmentPolicy, AssignmentReport, Completion, Dispatcher};
use crate::error::{AssignError, LockError};
use crate::history::{RunHistory, RunRecord};
use crate::ingest::topics::TopicClassifier;
use crate::ingest::types::{SourceCollector, TimeWindow};
use crate::ingest::{build_snapshot, run_collectors, RetryPolicy};
use crate::missions::{MissionBoard, MissionGenerator, MissionId, RelevancePolicy};
use crate::notify::{EventKind, NotifierMux, PipelineEvent};
use crate::registry::{
    AgentProfile, AgentRegistry, EliminationPolicy, HallOfFame, TagOverlapScorer,
    WeightedRollingAverage,
};
use crate::runlock::RunLock;
use crate::storage::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    Collect,
    Aggregate,
    Assign,
}

impl Job {
    pub const ALL: [Job; 3] = [Job::Collect, Job::Aggregate, Job::Assign];

    pub fn as_str(&self) -> &'static str {
        match self {
            Job::Collect => "collect",
            Job::Aggregate => "aggregate",
            Job::Assign => "assign",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobOutcome {
    Collected {
        written: usize,
        partial: usize,
        failed: Vec<String>,
    },
    Aggregated {
        snapshots: usize,
        trends: usize,
        missions_created: Vec<MissionId>,
    },
    Assigned(AssignmentReport),
    /// Another instance holds the job's lock.
    Skipped { holder_pid: u32 },
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Collected {
                written,
                partial,
                failed,
            } => {
                write!(f, "{written} snapshot(s), {partial} partial")?;
                if !failed.is_empty() {
                    write!(f, ", failed: {}", failed.join(", "))?;
                }
                Ok(())
            }
            JobOutcome::Aggregated {
                snapshots,
                trends,
                missions_created,
            } => write!(
                f,
                "{snapshots} snapshot(s) -> {trends} trend(s), {} new mission(s)",
                missions_created.len()
            ),
            JobOutcome::Assigned(r) => write!(
                f,
                "{} assigned, {} unassigned, {} abandoned",
                r.assigned.len(),
                r.unassigned.len(),
                r.abandoned.len()
            ),
            JobOutcome::Skipped { holder_pid } => write!(f, "skipped, lock held by pid {holder_pid}"),
        }
    }
}

pub struct Pipeline {
    cfg: PipelineConfig,
    store: Store,
    collectors: Vec<Arc<dyn SourceCollector>>,
    aggregator: Aggregator,
    generator: MissionGenerator,
    dispatcher: Dispatcher,
    notifier: NotifierMux,
    history: RunHistory,
    latest: RwLock<Option<TrendRun>>,
    /// Serializes board/registry file writes.
    persist: Mutex<()>,
}

impl Pipeline {
    /// Load persisted state from `cfg.storage.data_dir` and wire the stages.
    pub fn new(
        cfg: PipelineConfig,
        collectors: Vec<Arc<dyn SourceCollector>>,
        notifier: NotifierMux,
    ) -> Result<Self> {
        let store = Store::open(&cfg.storage.data_dir)
            .with_context(|| format!("opening data dir {}", cfg.storage.data_dir.display()))?;

        let registry = AgentRegistry::new(
            Arc::new(WeightedRollingAverage::from(&cfg.registry)),
            EliminationPolicy::from(&cfg.registry),
        );
        registry.load(store.load_agents().context("loading agents.json")?);
        for seed in &cfg.agents {
            match registry.register(&seed.name, &seed.specialization) {
                Ok(_) | Err(AssignError::DuplicateAgent(_)) => {}
                Err(e) => return Err(e).context("seeding agent roster"),
            }
        }

        let board = MissionBoard::from_record(store.load_board().context("loading missions.json")?);
        for m in board.list() {
            if let Some(agent) = m.assignee() {
                registry.restore_slot(agent, m.id);
            }
        }

        let topics = if cfg.topics.is_empty() {
            TopicClassifier::default_seed()
        } else {
            TopicClassifier::from_map(&cfg.topics)
        };
        let aggregator = Aggregator::from_config(&cfg.aggregator, topics);
        let generator = MissionGenerator::new(RelevancePolicy::from(&cfg.missions));
        let dispatcher = Dispatcher::new(
            Arc::new(board),
            Arc::new(registry),
            Arc::new(TagOverlapScorer::from(&cfg.registry)),
            AssignmentPolicy::from(&cfg.registry),
        );
        let latest = store.latest_trend_run().context("loading latest trend run")?;

        tracing::info!(
            target: "pipeline",
            data_dir = %cfg.storage.data_dir.display(),
            missions = dispatcher.board().len(),
            agents = dispatcher.registry().list().len(),
            collectors = collectors.len(),
            "pipeline ready"
        );

        let pipeline = Self {
            store,
            collectors,
            aggregator,
            generator,
            dispatcher,
            notifier,
            history: RunHistory::default(),
            latest: RwLock::new(latest),
            persist: Mutex::new(()),
            cfg,
        };
        pipeline.persist_registry()?;
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn board(&self) -> &MissionBoard {
        self.dispatcher.board()
    }

    pub fn registry(&self) -> &AgentRegistry {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn latest_trends(&self) -> Option<TrendRun> {
        self.latest.read().clone()
    }

    pub fn hall_of_fame(&self) -> HallOfFame {
        HallOfFame::build(&self.registry().list(), self.cfg.registry.hall_of_fame_size)
    }

    /// Run one job under its lock and record it in the run history.
    pub async fn run_job(&self, job: Job, now: DateTime<Utc>) -> Result<JobOutcome> {
        let stale = Duration::seconds(self.cfg.storage.stale_lock_secs.clamp(1, 86_400 * 365) as i64);
        let _lock = match RunLock::acquire(&self.store.locks_dir(), job.as_str(), stale) {
            Ok(lock) => lock,
            Err(LockError::Held { pid, since, .. }) => {
                tracing::info!(target: "pipeline", %job, pid, %since, "job already running, skipping");
                return Ok(JobOutcome::Skipped { holder_pid: pid });
            }
            Err(e) => return Err(e).with_context(|| format!("locking job {job}")),
        };

        let started_at = Utc::now();
        let res = match job {
            Job::Collect => self.collect(now).await,
            Job::Aggregate => self.aggregate(now).await,
            Job::Assign => self.assign(now).await,
        };
        let finished_at = Utc::now();
        let summary = match &res {
            Ok(out) => out.to_string(),
            Err(e) => format!("{e:#}"),
        };
        self.history.push(RunRecord {
            job: job.to_string(),
            started_at,
            finished_at,
            ok: res.is_ok(),
            summary: summary.clone(),
        });
        gauge!("pipeline_last_run_ts", "job" => job.as_str()).set(finished_at.timestamp() as f64);
        match &res {
            Ok(_) => tracing::info!(target: "pipeline", %job, %summary, "job finished"),
            Err(_) => tracing::error!(target: "pipeline", %job, %summary, "job failed"),
        }
        res
    }

    /// collect, aggregate, assign; a failing stage does not stop the next one.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Vec<(Job, Result<JobOutcome>)> {
        let mut out = Vec::with_capacity(Job::ALL.len());
        for job in Job::ALL {
            out.push((job, self.run_job(job, now).await));
        }
        out
    }

    async fn collect(&self, now: DateTime<Utc>) -> Result<JobOutcome> {
        let c = &self.cfg.collectors;
        let window = TimeWindow::trailing(now, c.window_hours);
        let report = run_collectors(&self.collectors, window, RetryPolicy::from(c)).await;

        let mut written = 0;
        let mut partial = 0;
        for (source, outcome) in report.succeeded() {
            let snap = build_snapshot(
                source.clone(),
                now,
                window,
                outcome,
                &self.aggregator,
                c.snapshot_trend_count,
            );
            match self.store.write_snapshot(&snap) {
                Ok(path) => {
                    written += 1;
                    if snap.is_partial() {
                        partial += 1;
                    }
                    tracing::debug!(target: "ingest", %source, path = %path.display(), items = snap.items.len(), "snapshot written");
                }
                Err(e) => tracing::error!(target: "ingest", %source, error = %e, "snapshot not written"),
            }
        }

        let mut failed = Vec::new();
        for (source, err) in report.failed() {
            failed.push(source.to_string());
            let ev = PipelineEvent::new(EventKind::CollectorFailed, source.as_str(), err.to_string(), now);
            self.notifier.notify(&ev).await;
        }
        Ok(JobOutcome::Collected {
            written,
            partial,
            failed,
        })
    }

    async fn aggregate(&self, now: DateTime<Utc>) -> Result<JobOutcome> {
        let since = now - Duration::hours(self.cfg.aggregator.lookback_hours.max(1));
        let snapshots = self
            .store
            .load_snapshots(Some(since))
            .context("loading snapshots")?;
        let trends = self
            .aggregator
            .aggregate(&snapshots, now)
            .context("aggregation aborted, previous trends and missions kept")?;

        let run = TrendRun {
            run_at: now,
            snapshot_count: snapshots.len(),
            trends,
        };
        self.store.write_trend_run(&run).context("writing trend run")?;

        let created = self.generator.generate(self.board(), &run.trends, now);
        self.persist_board()?;

        let outcome = JobOutcome::Aggregated {
            snapshots: run.snapshot_count,
            trends: run.trends.len(),
            missions_created: created,
        };
        *self.latest.write() = Some(run);
        Ok(outcome)
    }

    async fn assign(&self, now: DateTime<Utc>) -> Result<JobOutcome> {
        let report = self.dispatcher.run_cycle(now);
        self.persist_board()?;
        self.persist_registry()?;

        for ev in &report.abandoned {
            let msg = format!(
                "{} held {} since {} and timed out; reopened for another agent",
                ev.agent, ev.mission, ev.claimed_at
            );
            self.notifier
                .notify(&PipelineEvent::new(EventKind::MissionAbandoned, ev.mission.to_string(), msg, now))
                .await;
        }
        for id in &report.unassigned {
            let ev = PipelineEvent::new(
                EventKind::MissionUnassignable,
                id.to_string(),
                "no eligible agent; mission stays open",
                now,
            );
            self.notifier.notify(&ev).await;
        }
        Ok(JobOutcome::Assigned(report))
    }

    pub fn register_agent(&self, name: &str, specialization: &str) -> Result<AgentProfile, AssignError> {
        let profile = self.registry().register(name, specialization)?;
        if let Err(e) = self.persist_registry() {
            tracing::error!(target: "pipeline", error = %format!("{e:#}"), "agents.json not updated");
        }
        Ok(profile)
    }

    /// Record a completed mission, persist, refresh the Hall of Fame.
    pub async fn complete_mission(
        &self,
        id: MissionId,
        done: Completion,
        now: DateTime<Utc>,
    ) -> Result<AgentProfile, AssignError> {
        let agent = done.agent.clone();
        let was_eliminated = self.registry().is_eliminated(&agent);
        let profile = self.dispatcher.complete(id, done, now)?;

        // In-memory state is authoritative; a failed write is retried by the next persist.
        let persisted = self
            .persist_board()
            .and_then(|_| self.persist_registry())
            .and_then(|_| {
                self.store
                    .write_hall_of_fame(&self.hall_of_fame().to_markdown())
                    .context("writing hall_of_fame.md")
            });
        if let Err(e) = persisted {
            tracing::error!(target: "pipeline", mission = %id, error = %format!("{e:#}"), "completion not persisted");
        }

        if !was_eliminated && self.registry().is_eliminated(&agent) {
            let floor = self.registry().elimination_policy().floor;
            let msg = format!(
                "performance score {:.1} is below the floor {:.1}; no new missions",
                profile.performance_score, floor
            );
            self.notifier
                .notify(&PipelineEvent::new(EventKind::AgentEliminated, agent, msg, now))
                .await;
        }
        Ok(profile)
    }

    fn persist_board(&self) -> Result<()> {
        let _g = self.persist.lock();
        self.store
            .save_board(&self.board().to_record())
            .context("writing missions.json")
    }

    fn persist_registry(&self) -> Result<()> {
        let _g = self.persist.lock();
        self.store
            .save_agents(&self.registry().records())
            .context("writing agents.json")
    }
}
