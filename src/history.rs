//! history.rs: capped in-memory log of job runs, served on `/runs`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    /// One-line outcome, e.g. `3 snapshots, 1 partial` or the error chain.
    pub summary: String,
}

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<VecDeque<RunRecord>>,
    cap: usize,
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::with_capacity(500)
    }
}

impl RunHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, rec: RunRecord) {
        let mut v = self.inner.lock();
        v.push_back(rec);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    /// Newest first.
    pub fn last_n(&self, n: usize) -> Vec<RunRecord> {
        self.inner.lock().iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(job: &str) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            job: job.into(),
            started_at: now,
            finished_at: now,
            ok: true,
            summary: String::new(),
        }
    }

    #[test]
    fn drops_oldest_past_cap() {
        let h = RunHistory::with_capacity(2);
        h.push(rec("collect"));
        h.push(rec("aggregate"));
        h.push(rec("assign"));
        let jobs: Vec<_> = h.last_n(10).into_iter().map(|r| r.job).collect();
        assert_eq!(jobs, vec!["assign", "aggregate"]);
    }
}
