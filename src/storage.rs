//! JSON files under `data_dir`.
//!
//! ```text
//! snapshots/<source>/<ts>.json   create-new, never overwritten
//! trends/<ts>.json               one file per aggregation run
//! missions.json                  {next_id, missions}
//! agents.json                    [AgentProfile]
//! hall_of_fame.md
//! locks/<job>.lock
//! ```
//!
//! Board and registry are written to a temp file and renamed into place.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::aggregate::TrendRun;
use crate::error::StoreError;
use crate::ingest::types::LearningSnapshot;
use crate::missions::BoardRecord;
use crate::registry::AgentProfile;

const SNAPSHOTS: &str = "snapshots";
const TRENDS: &str = "trends";
const MISSIONS_FILE: &str = "missions.json";
const AGENTS_FILE: &str = "agents.json";
const HALL_OF_FAME_FILE: &str = "hall_of_fame.md";
const LOCKS: &str = "locks";

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_err(path: &Path) -> impl FnOnce(serde_json::Error) -> StoreError + '_ {
    move |source| StoreError::Json {
        path: path.display().to_string(),
        source,
    }
}

/// File-name stem for a timestamp; sorts chronologically.
pub fn ts_stem(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for sub in [SNAPSHOTS, TRENDS, LOCKS] {
            let p = root.join(sub);
            fs::create_dir_all(&p).map_err(io_err(&p))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS)
    }

    /// Persist a snapshot. Fails rather than overwrite an existing one.
    pub fn write_snapshot(&self, snap: &LearningSnapshot) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(SNAPSHOTS).join(snap.source.as_str());
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let path = dir.join(format!("{}.json", ts_stem(snap.timestamp)));
        let bytes = serde_json::to_vec_pretty(snap).map_err(json_err(&path))?;
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err(&path))?;
        f.write_all(&bytes).map_err(io_err(&path))?;
        f.sync_all().map_err(io_err(&path))?;
        Ok(path)
    }

    /// All snapshots with `timestamp >= since`. Unreadable files are logged and skipped.
    pub fn load_snapshots(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LearningSnapshot>, StoreError> {
        let base = self.root.join(SNAPSHOTS);
        let mut out = Vec::new();
        for source_dir in read_dir_sorted(&base)? {
            if !source_dir.is_dir() {
                continue;
            }
            for file in read_dir_sorted(&source_dir)? {
                if file.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match read_json::<LearningSnapshot>(&file) {
                    Ok(s) if since.is_none_or(|t| s.timestamp >= t) => out.push(s),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(target: "pipeline", error = %e, "skipping unreadable snapshot"),
                }
            }
        }
        Ok(out)
    }

    pub fn write_trend_run(&self, run: &TrendRun) -> Result<PathBuf, StoreError> {
        let path = self.root.join(TRENDS).join(format!("{}.json", ts_stem(run.run_at)));
        write_json_atomic(&path, run)?;
        Ok(path)
    }

    pub fn latest_trend_run(&self) -> Result<Option<TrendRun>, StoreError> {
        let files = read_dir_sorted(&self.root.join(TRENDS))?;
        match files
            .into_iter()
            .rev()
            .find(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        {
            Some(p) => read_json(&p).map(Some),
            None => Ok(None),
        }
    }

    pub fn load_board(&self) -> Result<BoardRecord, StoreError> {
        read_json_or_default(&self.root.join(MISSIONS_FILE))
    }

    pub fn save_board(&self, rec: &BoardRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.root.join(MISSIONS_FILE), rec)
    }

    pub fn load_agents(&self) -> Result<Vec<AgentProfile>, StoreError> {
        read_json_or_default(&self.root.join(AGENTS_FILE))
    }

    pub fn save_agents(&self, agents: &[AgentProfile]) -> Result<(), StoreError> {
        write_json_atomic(&self.root.join(AGENTS_FILE), &agents)
    }

    pub fn write_hall_of_fame(&self, markdown: &str) -> Result<(), StoreError> {
        write_atomic(&self.root.join(HALL_OF_FAME_FILE), markdown.as_bytes())
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut v = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        v.push(entry.map_err(io_err(dir))?.path());
    }
    v.sort();
    Ok(v)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(json_err(path))
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_json(path)
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(json_err(path))?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        f.write_all(bytes).map_err(io_err(&tmp))?;
        f.sync_all().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{SnapshotItem, SourceName};
    use chrono::TimeZone;

    #[test]
    fn snapshots_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 7, 1, 6, 0, 0).unwrap();
        let snap = LearningSnapshot::new(
            SourceName::from("tldr"),
            ts,
            vec![SnapshotItem::new("Rust 1.88", "")],
        );
        store.write_snapshot(&snap).unwrap();
        assert!(matches!(store.write_snapshot(&snap), Err(StoreError::Io { .. })));

        let later = LearningSnapshot::new(SourceName::from("tldr"), ts + chrono::Duration::hours(6), vec![]);
        store.write_snapshot(&later).unwrap();
        assert_eq!(store.load_snapshots(None).unwrap().len(), 2);
        assert_eq!(store.load_snapshots(Some(later.timestamp)).unwrap(), vec![later]);
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert!(store.load_agents().unwrap().is_empty());
        assert_eq!(store.load_board().unwrap(), BoardRecord::default());
        assert!(store.latest_trend_run().unwrap().is_none());
    }
}
