//! Schema migration.
//!
//! Two legacy layouts are upgraded:
//!
//! - `jobs.json`, a flat map of job key to a record mixing configuration and
//!   run history. It is split into the manifest and the run-state document.
//!   This happens at most once: as soon as a manifest exists the legacy file is
//!   ignored, even if it is still on disk.
//! - The combined `format` tag, which encoded both operation kinds in one enum.
//!   It is rewritten into `archive_format` + `use_restic` wherever it appears.

use super::manifest::{Manifest, ManifestStore};
use super::state::{parse_timestamp, DaemonRegistration, RunState, StateStore};
use crate::job::{ArchiveFormat, JobKey, JobOverride};
use crate::schedule::OperationKind;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Operation mode encoded by the legacy single-enum field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMode {
    /// Archive plus incremental
    Hybrid,
    /// Incremental only
    Restic,
    SevenZip,
    TarGz,
}

impl LegacyMode {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "hybrid" => Some(LegacyMode::Hybrid),
            "restic" => Some(LegacyMode::Restic),
            "7z" => Some(LegacyMode::SevenZip),
            "tar.gz" => Some(LegacyMode::TarGz),
            _ => None,
        }
    }

    /// `(archive_format, use_restic)` with the same runtime behavior
    pub fn translate(self) -> (ArchiveFormat, bool) {
        match self {
            LegacyMode::Hybrid => (ArchiveFormat::SevenZip, true),
            LegacyMode::Restic => (ArchiveFormat::None, true),
            LegacyMode::SevenZip => (ArchiveFormat::SevenZip, false),
            LegacyMode::TarGz => (ArchiveFormat::TarGz, false),
        }
    }
}

/// Replace a `format` key in a manifest table with the two current fields.
///
/// Fields already written in the current layout win over the translated tag.
/// An unknown tag is left in place so that nothing is silently dropped.
pub fn migrate_format_field(table: &mut toml::Table) {
    let Some(tag) = table.get("format").and_then(|v| v.as_str()).map(str::to_owned) else {
        return;
    };
    let Some(mode) = LegacyMode::parse(&tag) else {
        tracing::warn!(format = %tag, "Unknown legacy format tag, leaving it untouched");
        return;
    };

    table.remove("format");
    let (archive_format, use_restic) = mode.translate();
    table
        .entry("archive_format")
        .or_insert_with(|| toml::Value::String(archive_format.as_str().to_string()));
    table
        .entry("use_restic")
        .or_insert(toml::Value::Boolean(use_restic));
}

#[derive(Debug, Default, Deserialize)]
struct LegacyJob {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    dest: Option<String>,
    #[serde(default)]
    options: LegacyOptions,
    #[serde(default)]
    last_runs: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyOptions {
    #[serde(default)]
    use_restic: Option<bool>,
    #[serde(default)]
    hybrid: Option<bool>,
    #[serde(default)]
    use_7z: Option<bool>,
    #[serde(default)]
    op_vault: Option<String>,
    #[serde(default)]
    restic_interval_hours: Option<u64>,
    #[serde(default)]
    full_interval_days: Option<u64>,
    #[serde(default)]
    daemon_plist: Option<String>,
    #[serde(default)]
    daemon_label: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl LegacyOptions {
    /// Mode the legacy runner would have chosen for this record
    fn mode(&self) -> LegacyMode {
        if self.hybrid == Some(true) {
            LegacyMode::Hybrid
        } else if self.use_restic == Some(true) {
            LegacyMode::Restic
        } else if self.use_7z == Some(false) {
            LegacyMode::TarGz
        } else {
            LegacyMode::SevenZip
        }
    }
}

/// Legacy keys that would collide with typed job fields once flattened
const SHADOWED_FIELDS: &[&str] = &[
    "name",
    "source",
    "dest",
    "archive_format",
    "use_restic",
    "restic_interval_hours",
    "full_interval_days",
    "op_vault",
    "excludes",
    "format",
];

/// Configuration and run-state halves of one legacy record
fn split_record(legacy_key: &str, record: LegacyJob) -> (JobOverride, RunState) {
    let source = record
        .source
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| legacy_key.to_string());
    let name = record.name.filter(|n| !n.is_empty()).unwrap_or_else(|| {
        Path::new(&source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string())
    });

    let options = record.options;
    let (archive_format, use_restic) = options.mode().translate();

    let mut extra = toml::Table::new();
    for (field, value) in record.extra.into_iter().chain(options.extra) {
        if value.is_null() {
            continue;
        }
        if SHADOWED_FIELDS.contains(&field.as_str()) {
            tracing::debug!(field = %field, "Dropping legacy field superseded by the derived mode");
            continue;
        }
        match toml::Value::try_from(&value) {
            Ok(converted) => {
                extra.insert(field, converted);
            }
            Err(e) => tracing::warn!(field = %field, error = %e, "Dropping unconvertible legacy field"),
        }
    }

    let job = JobOverride {
        name,
        source,
        dest: record.dest.filter(|d| !d.is_empty()),
        archive_format: Some(archive_format),
        use_restic: Some(use_restic),
        restic_interval_hours: options.restic_interval_hours,
        full_interval_days: options.full_interval_days,
        op_vault: options.op_vault.filter(|v| !v.is_empty()),
        excludes: Vec::new(),
        extra,
    };

    let mut state = RunState::default();
    for (label, value) in record.last_runs {
        let kind = OperationKind::from_label(&label);
        let at = value.as_str().and_then(parse_timestamp);
        match (kind, at) {
            (Some(kind), Some(at)) => state.record_if_newer(kind, at),
            _ => tracing::warn!(label = %label, "Skipping unreadable legacy run entry"),
        }
    }
    if let Some(plist) = options.daemon_plist.filter(|p| !p.is_empty()) {
        state.daemon = Some(DaemonRegistration {
            descriptor_path: plist.into(),
            label: options.daemon_label.unwrap_or_default(),
        });
    }

    (job, state)
}

/// Upgrade `jobs.json` into the manifest and run-state documents.
///
/// Returns `true` only when a migration was written. Never fails: an
/// unreadable legacy store is logged and treated as absent.
pub fn migrate_if_needed(legacy_path: &Path, manifest: &ManifestStore, state: &StateStore) -> bool {
    if !legacy_path.exists() || manifest.exists() {
        return false;
    }

    let records: BTreeMap<String, serde_json::Value> = match std::fs::read_to_string(legacy_path)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
    {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(path = %legacy_path.display(), error = %e, "Failed to read legacy job store, skipping migration");
            return false;
        }
    };

    if records.is_empty() {
        return false;
    }

    let mut migrated = Manifest::default();
    let mut run_state = state.load();

    for (legacy_key, value) in records {
        let record: LegacyJob = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(job = %legacy_key, error = %e, "Skipping malformed legacy job");
                continue;
            }
        };

        let (job, job_state) = split_record(&legacy_key, record);
        let key: JobKey = migrated.upsert(job);
        if !job_state.is_empty() {
            run_state.entry(key).or_default().absorb(job_state);
        }
    }

    // The manifest marks the migration as done, so it is written last.
    if let Err(e) = state.save(&run_state) {
        tracing::error!(error = %e, "Failed to write migrated run state");
        return false;
    }
    if let Err(e) = manifest.save(&migrated) {
        tracing::error!(error = %e, "Failed to write migrated manifest");
        return false;
    }

    tracing::info!(jobs = migrated.jobs.len(), "Migrated jobs from legacy job store");
    true
}
