// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ScheduleConfig;
use crate::pipeline::{Job, Pipeline};

pub fn interval_for(job: Job, cfg: &ScheduleConfig) -> Duration {
    let secs = match job {
        Job::Collect => cfg.collect_interval_secs,
        Job::Aggregate => cfg.aggregate_interval_secs,
        Job::Assign => cfg.assign_interval_secs,
    };
    Duration::from_secs(secs.max(1))
}

/// Tick `job` forever. The first tick fires immediately; a tick that arrives
/// while the previous run is still going is skipped, not queued.
pub fn spawn_job(pipeline: Arc<Pipeline>, job: Job, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = pipeline.run_job(job, Utc::now()).await {
                tracing::warn!(target: "pipeline", %job, error = %format!("{e:#}"), "scheduled run failed");
            }
        }
    })
}

pub fn spawn_all(pipeline: Arc<Pipeline>, cfg: &ScheduleConfig) -> Vec<JoinHandle<()>> {
    Job::ALL
        .into_iter()
        .map(|job| {
            let every = interval_for(job, cfg);
            tracing::info!(target: "pipeline", %job, every_secs = every.as_secs(), "job scheduled");
            spawn_job(Arc::clone(&pipeline), job, every)
        })
        .collect()
}
