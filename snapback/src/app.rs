//! Application facade used by the CLI.
//!
//! Owns the two stores and performs the one-time legacy migration before any
//! read of current storage.

use crate::config::Settings;
use crate::environment::Environment;
use crate::executor::OperationExecutor;
use crate::job::{normalize, resolve, ArchiveFormat, Defaults, EffectiveConfig, JobKey, JobOverride};
use crate::schedule::decision::hours;
use crate::schedule::{decide, run_job, JobRun, OperationDecision, RunFlags, RunReport, SchedulingDecision};
use crate::store::{migrate_if_needed, DaemonRegistration, ManifestStore, StateStore};
use crate::{Result, SnapbackError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

pub struct App {
    settings: Settings,
    manifest: ManifestStore,
    state: StateStore,
}

/// Status of one saved job at one instant
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub key: JobKey,
    pub config: EffectiveConfig,
    pub decision: SchedulingDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon: Option<DaemonRegistration>,
}

#[derive(Debug, Clone, Tabled)]
pub struct JobRow {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Mode")]
    pub mode: String,
    #[tabled(rename = "Incremental")]
    pub incremental: String,
    #[tabled(rename = "Full")]
    pub full: String,
    #[tabled(rename = "Daemon")]
    pub daemon: String,
}

impl From<&JobStatus> for JobRow {
    fn from(status: &JobStatus) -> Self {
        Self {
            name: status.config.name.clone(),
            source: status.key.to_string(),
            mode: status.config.mode_label(),
            incremental: describe(&status.decision.incremental),
            full: describe(&status.decision.full),
            daemon: status
                .daemon
                .as_ref()
                .map(|d| d.label.clone())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// `due (never run)`, `ok (current, ...)` or `-` for kinds that are off
pub fn describe(op: &OperationDecision) -> String {
    match op.reason {
        crate::schedule::DueReason::NotConfigured => "-".to_string(),
        reason if op.needed => format!("due ({reason})"),
        reason => format!("ok ({reason})"),
    }
}

impl App {
    /// Open the stores, migrating legacy data first if present
    pub fn open(settings: Settings) -> Self {
        let manifest = ManifestStore::new(settings.manifest_path());
        let state = StateStore::new(settings.state_path());
        migrate_if_needed(&settings.legacy_jobs_path(), &manifest, &state);
        Self {
            settings,
            manifest,
            state,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Explicit migration; a no-op once the manifest exists
    pub fn migrate(&self) -> bool {
        migrate_if_needed(&self.settings.legacy_jobs_path(), &self.manifest, &self.state)
    }

    /// Layer `cli` on top of the saved override for the same source
    pub fn layered_override(&self, cli: &JobOverride) -> JobOverride {
        let manifest = self.manifest.load();
        let key = cli.key();
        let mut layered = match manifest.find(&key) {
            Some(saved) => saved.clone().merge(cli),
            None => cli.clone(),
        };
        if layered.name.trim().is_empty() {
            layered.name = default_name(&key);
        }
        layered.source = key.as_str().to_string();
        layered
    }

    /// Effective configuration of `cli` layered over the saved job
    pub fn resolve_job(&self, cli: &JobOverride) -> (JobKey, EffectiveConfig) {
        let defaults = self.manifest.load().defaults;
        let layered = self.layered_override(cli);
        let config = resolve(&defaults, &layered);
        (layered.key(), config)
    }

    /// Run one job and register it when anything succeeded
    pub fn run(
        &self,
        cli: &JobOverride,
        flags: RunFlags,
        env: &dyn Environment,
        executor: &mut dyn OperationExecutor,
    ) -> RunReport {
        let layered = self.layered_override(cli);
        let defaults = self.manifest.load().defaults;
        let config = resolve(&defaults, &layered);
        let key = layered.key();

        let run = JobRun {
            key: &key,
            config: &config,
            flags,
            now: Utc::now(),
            recent_run_guard: hours(self.settings.recent_run_guard_hours),
        };
        let report = run_job(&run, &self.state, env, executor);

        if !flags.dry_run && report.attempts.iter().any(|a| a.succeeded) {
            if let Err(e) = self.save_job(layered) {
                tracing::warn!(job = %key, error = %e, "Failed to register job");
            }
        }
        report
    }

    /// Register or update a job without running it
    pub fn save_job(&self, job: JobOverride) -> Result<JobKey> {
        job.validate()?;
        let mut manifest = self.manifest.load();
        let key = manifest.upsert(job);
        self.manifest.save(&manifest)?;
        tracing::debug!(job = %key, "Saved job");
        Ok(key)
    }

    /// Status of every saved job, in manifest order
    pub fn statuses(&self, now: DateTime<Utc>) -> Vec<JobStatus> {
        let manifest = self.manifest.load();
        let mut states = self.state.load();
        manifest
            .entries()
            .into_iter()
            .map(|(key, job)| {
                let config = resolve(&manifest.defaults, job);
                let state = states.remove(&key).unwrap_or_default();
                JobStatus {
                    decision: decide(&config, &state, now, RunFlags::default()),
                    daemon: state.daemon,
                    key,
                    config,
                }
            })
            .collect()
    }

    /// Status of one saved job
    pub fn status(&self, source: &Path, now: DateTime<Utc>) -> Result<JobStatus> {
        let key = normalize(source);
        self.statuses(now)
            .into_iter()
            .find(|status| status.key == key)
            .ok_or_else(|| SnapbackError::JobNotFound(key.to_string()))
    }

    /// Forget a saved job and its run state
    pub fn remove_job(&self, source: &Path) -> Result<JobOverride> {
        let key = normalize(source);
        let mut manifest = self.manifest.load();
        let removed = manifest
            .remove(&key)
            .ok_or_else(|| SnapbackError::JobNotFound(key.to_string()))?;
        self.manifest.save(&manifest)?;
        self.state.remove(&key)?;
        tracing::info!(job = %key, name = %removed.name, "Removed job");
        Ok(removed)
    }

    pub fn defaults(&self) -> Defaults {
        self.manifest.load().defaults
    }

    /// Change one shared default
    pub fn set_default(&self, field: &str, value: &str) -> Result<Defaults> {
        let mut manifest = self.manifest.load();
        if manifest.defaults_rejected() {
            return Err(SnapbackError::Config(format!(
                "[defaults] in {} is invalid; fix it by hand before editing defaults",
                self.manifest.path().display()
            )));
        }
        let mut defaults = manifest.defaults.clone();
        apply_default(&mut defaults, field, value)?;
        manifest.set_defaults(defaults);
        self.manifest.save(&manifest)?;
        Ok(manifest.defaults)
    }

    /// Record an installed scheduler descriptor for a saved job
    pub fn register_daemon(&self, source: &Path, registration: DaemonRegistration) -> Result<JobKey> {
        let key = self.saved_key(source)?;
        self.state.set_daemon(&key, registration)?;
        Ok(key)
    }

    pub fn unregister_daemon(&self, source: &Path) -> Result<Option<DaemonRegistration>> {
        let key = self.saved_key(source)?;
        self.state.clear_daemon(&key)
    }

    fn saved_key(&self, source: &Path) -> Result<JobKey> {
        let key = normalize(source);
        match self.manifest.load().find(&key) {
            Some(_) => Ok(key),
            None => Err(SnapbackError::JobNotFound(key.to_string())),
        }
    }
}

fn default_name(key: &JobKey) -> String {
    key.as_path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string())
}

fn apply_default(defaults: &mut Defaults, field: &str, value: &str) -> Result<()> {
    let invalid = |e: &dyn std::fmt::Display| {
        SnapbackError::Config(format!("invalid value '{value}' for {field}: {e}"))
    };
    match field {
        "dest" => defaults.dest = value.to_string(),
        "archive_format" => defaults.archive_format = value.parse::<ArchiveFormat>()?,
        "use_restic" => defaults.use_restic = value.parse().map_err(|e| invalid(&e))?,
        "restic_interval_hours" => {
            defaults.restic_interval_hours = value.parse().map_err(|e| invalid(&e))?
        }
        "full_interval_days" => {
            defaults.full_interval_days = value.parse().map_err(|e| invalid(&e))?
        }
        "op_vault" => {
            defaults.op_vault = Some(value.to_string()).filter(|v| !v.is_empty());
        }
        "excludes" => {
            defaults.excludes = value
                .split(',')
                .map(str::trim)
                .filter(|pattern| !pattern.is_empty())
                .map(String::from)
                .collect();
        }
        other => {
            return Err(SnapbackError::Config(format!(
                "unknown default '{other}'"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{OperationKind, RunOutcome};
    use tempfile::TempDir;

    struct QuietEnv;

    impl Environment for QuietEnv {
        fn on_battery(&self) -> bool {
            false
        }
        fn is_interactive(&self) -> bool {
            false
        }
        fn confirm(&self, _question: &str) -> bool {
            false
        }
        fn notify(&self, _title: &str, _message: &str) {}
    }

    struct Succeeds(Vec<OperationKind>);

    impl OperationExecutor for Succeeds {
        fn run(&mut self, kind: OperationKind, _config: &EffectiveConfig, _now: DateTime<Utc>) -> Result<()> {
            self.0.push(kind);
            Ok(())
        }
    }

    fn setup() -> (TempDir, App, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("project");
        std::fs::create_dir(&source).unwrap();
        let app = App::open(Settings::for_dir(dir.path().join("config")));
        (dir, app, source)
    }

    fn cli_job(dir: &TempDir, source: &Path) -> JobOverride {
        JobOverride {
            dest: Some(dir.path().join("backups").to_string_lossy().into_owned()),
            use_restic: Some(true),
            ..JobOverride::new("", source.to_string_lossy())
        }
    }

    #[test]
    fn test_successful_run_registers_job() {
        let (dir, app, source) = setup();
        let mut exec = Succeeds(Vec::new());

        let report = app.run(&cli_job(&dir, &source), RunFlags::default(), &QuietEnv, &mut exec);

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(exec.0, vec![OperationKind::Incremental, OperationKind::Full]);

        let statuses = app.statuses(Utc::now());
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].config.name, "project");
        assert_eq!(statuses[0].key, normalize(&source));
        assert!(statuses[0].decision.due_kinds().is_empty());
    }

    #[test]
    fn test_dry_run_does_not_register() {
        let (dir, app, source) = setup();
        let mut exec = Succeeds(Vec::new());
        let flags = RunFlags {
            dry_run: true,
            ..Default::default()
        };

        app.run(&cli_job(&dir, &source), flags, &QuietEnv, &mut exec);

        assert!(exec.0.is_empty());
        assert!(app.statuses(Utc::now()).is_empty());
    }

    #[test]
    fn test_cli_override_layers_on_saved_job() -> Result<()> {
        let (dir, app, source) = setup();
        app.save_job(JobOverride {
            full_interval_days: Some(3),
            excludes: vec!["*.log".to_string()],
            ..JobOverride::new("site", source.to_string_lossy())
        })?;

        let (_, config) = app.resolve_job(&cli_job(&dir, &source));

        assert_eq!(config.name, "site");
        assert_eq!(config.full_interval_days, 3);
        assert!(config.use_restic);
        assert!(config.excludes.contains(&"*.log".to_string()));
        assert!(config.excludes.contains(&"node_modules".to_string()));

        Ok(())
    }

    #[test]
    fn test_remove_job_clears_state() -> Result<()> {
        let (dir, app, source) = setup();
        let mut exec = Succeeds(Vec::new());
        app.run(&cli_job(&dir, &source), RunFlags::default(), &QuietEnv, &mut exec);

        let removed = app.remove_job(&source)?;
        assert_eq!(removed.name, "project");
        assert!(app.statuses(Utc::now()).is_empty());
        assert!(app.state.load().is_empty());

        assert!(matches!(app.remove_job(&source), Err(SnapbackError::JobNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_set_default() -> Result<()> {
        let (_dir, app, _source) = setup();

        let defaults = app.set_default("archive_format", "tar.gz")?;
        assert_eq!(defaults.archive_format, ArchiveFormat::TarGz);

        app.set_default("restic_interval_hours", "12")?;
        assert_eq!(app.defaults().restic_interval_hours, 12);

        assert!(app.set_default("restic_interval_hours", "soon").is_err());
        assert!(app.set_default("colour", "blue").is_err());
        Ok(())
    }

    #[test]
    fn test_set_default_refuses_to_replace_invalid_defaults() -> Result<()> {
        let (_dir, app, _source) = setup();
        let path = app.settings().manifest_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[defaults]\nfull_interval_days = \"weekly\"\n").unwrap();

        assert!(app.set_default("archive_format", "tar.gz").is_err());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"weekly\""));
        Ok(())
    }

    #[test]
    fn test_daemon_registration_requires_saved_job() -> Result<()> {
        let (_dir, app, source) = setup();
        let registration = DaemonRegistration {
            descriptor_path: "/tmp/snapback.project.plist".into(),
            label: "snapback.project".to_string(),
        };
        assert!(app.register_daemon(&source, registration.clone()).is_err());

        app.save_job(JobOverride::new("project", source.to_string_lossy()))?;
        app.register_daemon(&source, registration.clone())?;
        assert_eq!(app.status(&source, Utc::now())?.daemon, Some(registration.clone()));

        assert_eq!(app.unregister_daemon(&source)?, Some(registration));
        assert_eq!(app.status(&source, Utc::now())?.daemon, None);
        Ok(())
    }

    #[test]
    fn test_open_migrates_legacy_store() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("jobs.json"),
            r#"{"/srv/app": {"name": "app", "source": "/srv/app", "options": {"use_restic": true}}}"#,
        )
        .unwrap();

        let app = App::open(Settings::for_dir(&config_dir));
        let statuses = app.statuses(Utc::now());

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].config.mode_label(), "restic");
        assert!(!app.migrate());
    }
}
