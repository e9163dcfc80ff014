//! One running instance per job, across processes.
//!
//! The lock is a file created with create-new semantics under `locks/`. Each
//! holder writes a unique token into it, and only the holder whose token is
//! still in the file removes it on drop. A lock older than `stale_after` is
//! assumed to belong to a crashed run and is taken over: the file is renamed
//! to a private tombstone first, so two contenders can never both discard
//! the same live lock.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LockError;

static NONCE: AtomicU64 = AtomicU64::new(0);

/// `pid-nanos-counter`; unique per acquisition within and across processes.
fn new_token() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let n = NONCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos:x}-{n}", std::process::id())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockInfo {
    job: String,
    pid: u32,
    since: DateTime<Utc>,
    #[serde(default)]
    token: String,
}

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    job: String,
    token: String,
}

impl RunLock {
    pub fn acquire(dir: &Path, job: &str, stale_after: Duration) -> Result<Self, LockError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{job}.lock"));
        let now = Utc::now();
        let token = new_token();

        // Second pass only after discarding a stale lock.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    let info = LockInfo {
                        job: job.to_string(),
                        pid: std::process::id(),
                        since: now,
                        token: token.clone(),
                    };
                    let body = serde_json::to_vec(&info).map_err(std::io::Error::other)?;
                    f.write_all(&body)?;
                    f.sync_all()?;
                    tracing::debug!(target: "pipeline", job, path = %path.display(), "run lock taken");
                    return Ok(Self {
                        path,
                        job: job.to_string(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path)?;
                    if now - holder.since < stale_after {
                        return Err(held(job, &holder));
                    }
                    tracing::warn!(
                        target: "pipeline",
                        job,
                        pid = holder.pid,
                        since = %holder.since,
                        "taking over stale run lock"
                    );
                    if !discard_if_owned_by(&path, &token, |found| *found == holder)? {
                        let current = read_holder(&path)?;
                        return Err(held(job, &current));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        // Someone else grabbed it between our discard and create.
        let holder = read_holder(&path)?;
        Err(held(job, &holder))
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let mine = self.token.clone();
        match discard_if_owned_by(&self.path, &self.token, |found| found.token == mine) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                target: "pipeline",
                job = %self.job,
                "run lock was taken over; leaving the new holder's file"
            ),
            Err(e) => {
                tracing::warn!(target: "pipeline", job = %self.job, error = %e, "could not remove run lock")
            }
        }
    }
}

fn held(job: &str, holder: &LockInfo) -> LockError {
    LockError::Held {
        job: job.to_string(),
        pid: holder.pid,
        since: holder.since,
    }
}

/// Move the lock at `path` aside and delete it if `expected` accepts its
/// contents. Otherwise put it back. `Ok(true)` also covers an already
/// missing file.
fn discard_if_owned_by(
    path: &Path,
    token: &str,
    expected: impl Fn(&LockInfo) -> bool,
) -> Result<bool, LockError> {
    let mut tomb_name = path.file_name().unwrap_or_default().to_os_string();
    tomb_name.push(format!(".{token}.tomb"));
    let tomb = path.with_file_name(tomb_name);

    match fs::rename(path, &tomb) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    }
    let found = read_holder(&tomb)?;
    if expected(&found) {
        fs::remove_file(&tomb)?;
        return Ok(true);
    }
    // Not ours to discard. Restore without clobbering a lock created meanwhile.
    match fs::hard_link(&tomb, path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::warn!(target: "pipeline", path = %path.display(), "run lock replaced while restoring");
        }
        Err(e) => return Err(e.into()),
    }
    fs::remove_file(&tomb)?;
    Ok(false)
}

/// Lock owner; falls back to the file's mtime when the body is unreadable.
fn read_holder(path: &Path) -> Result<LockInfo, LockError> {
    if let Ok(bytes) = fs::read(path) {
        if let Ok(info) = serde_json::from_slice::<LockInfo>(&bytes) {
            return Ok(info);
        }
    }
    let since = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => DateTime::<Utc>::from(t),
        Err(e) if e.kind() == ErrorKind::NotFound => DateTime::<Utc>::default(),
        Err(e) => return Err(e.into()),
    };
    Ok(LockInfo {
        job: String::new(),
        pid: 0,
        since,
        token: String::new(),
    })
}
