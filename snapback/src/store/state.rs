//! Run-state store.
//!
//! JSON document mapping each job key to the last successful run per operation
//! kind and to the metadata of an installed scheduler descriptor. Only
//! successful operations (and explicit daemon registration) write here.
//!
//! There is no locking: the whole document is rewritten on every update, so
//! concurrent writers for the same job lose updates.

use crate::job::JobKey;
use crate::schedule::OperationKind;
use crate::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Scheduler descriptor installed for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRegistration {
    pub descriptor_path: PathBuf,
    #[serde(default)]
    pub label: String,
}

/// Persisted runtime state of one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRunState")]
pub struct RunState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_success: BTreeMap<OperationKind, DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon: Option<DaemonRegistration>,
}

impl RunState {
    pub fn last_success(&self, kind: OperationKind) -> Option<DateTime<Utc>> {
        self.last_success.get(&kind).copied()
    }

    pub fn record_success(&mut self, kind: OperationKind, at: DateTime<Utc>) {
        self.last_success.insert(kind, at);
    }

    /// Keep `at` only if it is newer than what is already recorded
    pub fn record_if_newer(&mut self, kind: OperationKind, at: DateTime<Utc>) {
        let entry = self.last_success.entry(kind).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_success.is_empty() && self.daemon.is_none()
    }

    /// Fold another state in, keeping the newest timestamp per kind
    pub fn absorb(&mut self, other: RunState) {
        for (kind, at) in other.last_success {
            self.record_if_newer(kind, at);
        }
        if other.daemon.is_some() {
            self.daemon = other.daemon;
        }
    }
}

/// Accepts the current layout as well as the intermediate one (`last_runs`
/// keyed by tool label, flat `daemon_plist`/`daemon_label`)
#[derive(Deserialize)]
struct RawRunState {
    #[serde(default, alias = "last_runs")]
    last_success: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    daemon: Option<DaemonRegistration>,
    #[serde(default)]
    daemon_plist: Option<String>,
    #[serde(default)]
    daemon_label: Option<String>,
}

impl From<RawRunState> for RunState {
    fn from(raw: RawRunState) -> Self {
        let mut state = RunState {
            last_success: BTreeMap::new(),
            daemon: raw.daemon,
        };

        for (label, value) in raw.last_success {
            let Some(kind) = OperationKind::from_label(&label) else {
                tracing::warn!(label = %label, "Ignoring run history for unknown operation kind");
                continue;
            };
            match value.as_str().and_then(parse_timestamp) {
                Some(at) => state.record_if_newer(kind, at),
                None => tracing::warn!(label = %label, "Ignoring unparsable run timestamp"),
            }
        }

        if state.daemon.is_none() {
            if let Some(plist) = raw.daemon_plist.filter(|p| !p.is_empty()) {
                state.daemon = Some(DaemonRegistration {
                    descriptor_path: PathBuf::from(plist),
                    label: raw.daemon_label.unwrap_or_default(),
                });
            }
        }

        state
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one interpreted as local time
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

/// Whole run-state document
pub type RunStateMap = BTreeMap<JobKey, RunState>;

/// File-backed run-state store
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

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the document; missing or corrupt storage reads as empty
    pub fn load(&self) -> RunStateMap {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RunStateMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read run state, using empty state");
                return RunStateMap::new();
            }
        };

        let entries: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to parse run state, using empty state");
                return RunStateMap::new();
            }
        };

        let mut map = RunStateMap::new();
        for (key, value) in entries {
            match serde_json::from_value::<RunState>(value) {
                Ok(state) => {
                    map.entry(JobKey::from_normalized(key))
                        .or_default()
                        .absorb(state);
                }
                Err(e) => {
                    tracing::warn!(job = %key, error = %e, "Dropping malformed run state entry");
                }
            }
        }
        map
    }

    /// Replace the whole document
    pub fn save(&self, map: &RunStateMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &JobKey) -> RunState {
        self.load().remove(key).unwrap_or_default()
    }

    /// Record a successful operation immediately
    pub fn record_success(&self, key: &JobKey, kind: OperationKind, at: DateTime<Utc>) -> Result<()> {
        self.update(key, |state| state.record_success(kind, at))
    }

    pub fn set_daemon(&self, key: &JobKey, registration: DaemonRegistration) -> Result<()> {
        self.update(key, |state| state.daemon = Some(registration))
    }

    pub fn clear_daemon(&self, key: &JobKey) -> Result<Option<DaemonRegistration>> {
        let mut previous = None;
        self.update(key, |state| previous = state.daemon.take())?;
        Ok(previous)
    }

    /// Forget a job entirely; returns whether anything was stored
    pub fn remove(&self, key: &JobKey) -> Result<bool> {
        let mut map = self.load();
        let removed = map.remove(key).is_some();
        if removed {
            self.save(&map)?;
        }
        Ok(removed)
    }

    fn update(&self, key: &JobKey, apply: impl FnOnce(&mut RunState)) -> Result<()> {
        let mut map = self.load();
        let state = map.entry(key.clone()).or_default();
        apply(state);
        if state.is_empty() {
            map.remove(key);
        }
        self.save(&map)
    }
}
