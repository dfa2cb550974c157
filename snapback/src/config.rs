//! Application settings for snapback.
//!
//! Loads settings from an optional `settings.toml` in the config directory with
//! `SNAPBACK_*` environment variable overrides. Job definitions are not part of
//! this file; they live in the manifest managed by [`crate::store::manifest`].

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.toml";
const STATE_FILE: &str = "state.json";
const LEGACY_JOBS_FILE: &str = "jobs.json";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the manifest, run state and legacy job store
    pub config_dir: PathBuf,

    #[serde(default)]
    pub log: LogConfig,

    /// Single-kind runs younger than this ask for confirmation
    #[serde(default = "default_recent_run_guard_hours")]
    pub recent_run_guard_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_recent_run_guard_hours() -> u64 {
    18
}

/// `~/.config/snapback`, or `./.config/snapback` when no home directory is known
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("snapback")
}

impl Settings {
    /// Load settings, honouring `SNAPBACK_CONFIG_DIR` for the settings file location
    pub fn load() -> Result<Self> {
        let config_dir = std::env::var_os("SNAPBACK_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_dir);
        Self::load_from(&config_dir)
    }

    /// Load settings rooted at `config_dir`
    pub fn load_from(config_dir: &Path) -> Result<Self> {
        let built = config::Config::builder()
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?
            .set_default("log.level", default_log_level())?
            .set_default(
                "recent_run_guard_hours",
                default_recent_run_guard_hours() as i64,
            )?
            .add_source(config::File::from(config_dir.join(SETTINGS_FILE)).required(false))
            .add_source(
                config::Environment::with_prefix("SNAPBACK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Settings with built-in defaults rooted at `config_dir`, ignoring files and env
    pub fn for_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            log: LogConfig::default(),
            recent_run_guard_hours: default_recent_run_guard_hours(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.config_dir.join(MANIFEST_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.config_dir.join(STATE_FILE)
    }

    pub fn legacy_jobs_path(&self) -> PathBuf {
        self.config_dir.join(LEGACY_JOBS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Environment variables are process-wide; tests that load settings take this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_store_paths_derive_from_config_dir() {
        let settings = Settings::for_dir("/tmp/snapback-test");
        assert_eq!(
            settings.manifest_path(),
            PathBuf::from("/tmp/snapback-test/manifest.toml")
        );
        assert_eq!(
            settings.state_path(),
            PathBuf::from("/tmp/snapback-test/state.json")
        );
        assert_eq!(
            settings.legacy_jobs_path(),
            PathBuf::from("/tmp/snapback-test/jobs.json")
        );
        assert_eq!(settings.recent_run_guard_hours, 18);
    }

    #[test]
    fn test_settings_file_overrides_defaults() -> anyhow::Result<()> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new()?;
        std::fs::write(
            temp_dir.path().join("settings.toml"),
            "recent_run_guard_hours = 6\n[log]\nlevel = \"debug\"\n",
        )?;

        let settings = Settings::load_from(temp_dir.path())?;
        assert_eq!(settings.recent_run_guard_hours, 6);
        assert_eq!(settings.log.level, "debug");
        assert_eq!(settings.config_dir, temp_dir.path());

        Ok(())
    }

    #[test]
    fn test_environment_overrides_settings_file() -> anyhow::Result<()> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new()?;
        std::fs::write(
            temp_dir.path().join("settings.toml"),
            "recent_run_guard_hours = 6\n",
        )?;

        std::env::set_var("SNAPBACK_RECENT_RUN_GUARD_HOURS", "3");
        std::env::set_var("SNAPBACK_LOG__LEVEL", "warn");
        let loaded = Settings::load_from(temp_dir.path());
        std::env::remove_var("SNAPBACK_RECENT_RUN_GUARD_HOURS");
        std::env::remove_var("SNAPBACK_LOG__LEVEL");

        let settings = loaded?;
        assert_eq!(settings.recent_run_guard_hours, 3);
        assert_eq!(settings.log.level, "warn");

        Ok(())
    }
}
