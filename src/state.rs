//! Persisted purchase history: period key -> executed timestamps.
//!
//! The file is only replaced atomically (temp file + rename), and a sibling
//! lock file keeps two runs from deciding on the same history at once.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{debug, warn};

use crate::error::{DcaError, Result};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaState {
    /// Executed purchases per period key, in execution order.
    #[serde(default)]
    pub executed: BTreeMap<String, Vec<DateTime<FixedOffset>>>,
    /// Top-level keys written by other tools or newer versions.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DcaState {
    pub fn executed_in(&self, period_key: &str) -> &[DateTime<FixedOffset>] {
        self.executed
            .get(period_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn append(&mut self, period_key: &str, at: DateTime<FixedOffset>) -> usize {
        let list = self.executed.entry(period_key.to_string()).or_default();
        list.push(at);
        list.len()
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means first run. Anything unreadable is an error, never
    /// an empty history.
    pub fn load(&self) -> Result<DcaState> {
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DcaState::default()),
            Err(e) => return Err(self.corrupt(e.to_string())),
        };
        serde_json::from_str(&s).map_err(|e| self.corrupt(e.to_string()))
    }

    /// Append one confirmed purchase and persist it before returning.
    pub fn record(&self, period_key: &str, at: DateTime<FixedOffset>) -> Result<()> {
        let mut state = self.load()?;
        let n = state.append(period_key, at);
        self.save(&state)?;
        debug!("recorded purchase #{} for {} in {}", n, period_key, self.path.display());
        Ok(())
    }

    pub fn save(&self, state: &DcaState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let s = serde_json::to_string_pretty(state)
            .map_err(|e| DcaError::Persistence(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        let tmp = sibling(&self.path, "tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(s.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        sync_parent_dir(&self.path);
        Ok(())
    }

    /// Take the run lock. A lock older than `stale_after` is assumed to be
    /// left behind by a killed run and is reclaimed.
    pub fn lock(&self, stale_after: Duration) -> Result<RunLock> {
        let lock_path = sibling(&self.path, "lock");
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        match RunLock::create(&lock_path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let age = fs::metadata(&lock_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| SystemTime::now().duration_since(t).ok());
                match age {
                    Some(age) if age > stale_after => {
                        warn!(
                            "reclaiming stale lock {} (age {}s)",
                            lock_path.display(),
                            age.as_secs()
                        );
                        fs::remove_file(&lock_path)?;
                        RunLock::create(&lock_path).map_err(|e| match e.kind() {
                            ErrorKind::AlreadyExists => {
                                DcaError::ConcurrentInvocation(lock_path.display().to_string())
                            }
                            _ => DcaError::Persistence(e),
                        })
                    }
                    _ => Err(DcaError::ConcurrentInvocation(
                        lock_path.display().to_string(),
                    )),
                }
            }
            Err(e) => Err(DcaError::Persistence(e)),
        }
    }

    fn corrupt(&self, reason: String) -> DcaError {
        DcaError::StateCorruption {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

/// Exclusive marker for one invocation; removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    fn create(path: &Path) -> std::io::Result<Self> {
        let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(f, "pid={} started={}", std::process::id(), Utc::now().to_rfc3339())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(p) => p,
        None => Path::new("."),
    };
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("directory sync skipped for {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
