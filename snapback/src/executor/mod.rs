//! Backup executor - runs the wrapped backup tools.
//!
//! The scheduler treats each operation as an atomic succeed/fail unit. This
//! module only assembles command lines for `restic`, `7z` and `tar` and
//! reports whether the tool exited successfully.

use crate::job::{ArchiveFormat, EffectiveConfig};
use crate::schedule::OperationKind;
use crate::{Result, SnapbackError};
use chrono::{DateTime, Local, Utc};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Excluded from archives; restic deduplicates history well enough to keep it
const GIT_DIR: &str = ".git";

/// Performs one operation for one job
pub trait OperationExecutor {
    fn run(&mut self, kind: OperationKind, config: &EffectiveConfig, now: DateTime<Utc>) -> Result<()>;
}

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn execute(&self) -> Result<()> {
        info!(program = %self.program, "Running {}", self.program);
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|e| SnapbackError::Operation(format!("failed to start {}: {e}", self.program)))?;

        if status.success() {
            Ok(())
        } else {
            Err(SnapbackError::Operation(format!(
                "{} exited with {status}",
                self.program
            )))
        }
    }
}

/// Restic repository of a job
pub fn restic_repo(config: &EffectiveConfig) -> PathBuf {
    config.job_dir().join("restic")
}

/// Local password file read by restic
pub fn restic_password_file(config: &EffectiveConfig) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("restic")
        .join(format!("{}-password", config.name))
}

/// `<dest>/<name>/<name>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn archive_path(config: &EffectiveConfig, now: DateTime<Utc>) -> Option<PathBuf> {
    let extension = match config.archive_format {
        ArchiveFormat::None => return None,
        ArchiveFormat::SevenZip => "7z",
        ArchiveFormat::TarGz => "tar.gz",
    };
    let stamp = now.with_timezone(&Local).format("%Y%m%d_%H%M%S");
    Some(
        config
            .job_dir()
            .join(format!("{}_{stamp}.{extension}", config.name)),
    )
}

pub fn restic_init_command(config: &EffectiveConfig, password_file: &Path) -> CommandSpec {
    CommandSpec::new("restic")
        .arg("init")
        .arg("--repo")
        .arg(restic_repo(config))
        .arg("--password-file")
        .arg(password_file)
}

pub fn restic_backup_command(config: &EffectiveConfig, password_file: &Path) -> CommandSpec {
    let mut spec = CommandSpec::new("restic")
        .arg("backup")
        .arg("--repo")
        .arg(restic_repo(config))
        .arg("--password-file")
        .arg(password_file)
        .arg("--tag")
        .arg("snapback");
    for pattern in &config.excludes {
        spec = spec.arg("--exclude").arg(pattern);
    }
    spec.arg(&config.source)
}

pub fn archive_command(config: &EffectiveConfig, archive: &Path) -> Option<CommandSpec> {
    let excludes = config
        .excludes
        .iter()
        .map(String::as_str)
        .chain((!config.excludes.iter().any(|e| e == GIT_DIR)).then_some(GIT_DIR));

    match config.archive_format {
        ArchiveFormat::None => None,
        ArchiveFormat::SevenZip => {
            let mut spec = CommandSpec::new("7z")
                .arg("a")
                .arg("-t7z")
                .arg("-mx=5")
                .arg(archive)
                .arg(&config.source);
            for pattern in excludes {
                spec = spec.arg(format!("-xr!{pattern}"));
            }
            Some(spec)
        }
        ArchiveFormat::TarGz => {
            let mut spec = CommandSpec::new("tar").arg("-czf").arg(archive);
            for pattern in excludes {
                spec = spec.arg(format!("--exclude={pattern}"));
            }
            let parent = config.source.parent().unwrap_or(Path::new("/"));
            let base = config
                .source
                .file_name()
                .map(OsString::from)
                .unwrap_or_else(|| OsString::from("."));
            Some(spec.arg("-C").arg(parent).arg(base))
        }
    }
}

/// Runs the real tools
#[derive(Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    fn run_incremental(&self, config: &EffectiveConfig) -> Result<()> {
        let password_file = restic_password_file(config);
        if !password_file.exists() {
            return Err(SnapbackError::Operation(format!(
                "restic password file not found: {}",
                password_file.display()
            )));
        }

        let repo = restic_repo(config);
        if !repo.join("config").exists() {
            info!(repo = %repo.display(), "Initializing restic repository");
            std::fs::create_dir_all(&repo)?;
            restic_init_command(config, &password_file).execute()?;
        }

        restic_backup_command(config, &password_file).execute()
    }

    fn run_full(&self, config: &EffectiveConfig, now: DateTime<Utc>) -> Result<()> {
        let archive = archive_path(config, now).ok_or_else(|| {
            SnapbackError::Config(format!("job '{}' has no archive format", config.name))
        })?;
        let command = archive_command(config, &archive).ok_or_else(|| {
            SnapbackError::Config(format!("job '{}' has no archive format", config.name))
        })?;

        std::fs::create_dir_all(config.job_dir())?;
        let result = command.execute();
        if result.is_err() && archive.exists() {
            warn!(archive = %archive.display(), "Removing incomplete archive");
            let _ = std::fs::remove_file(&archive);
        }
        result?;

        info!(archive = %archive.display(), "Archive written");
        Ok(())
    }
}

impl OperationExecutor for CommandExecutor {
    fn run(&mut self, kind: OperationKind, config: &EffectiveConfig, now: DateTime<Utc>) -> Result<()> {
        match kind {
            OperationKind::Incremental => self.run_incremental(config),
            OperationKind::Full => self.run_full(config, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(format: ArchiveFormat) -> EffectiveConfig {
        EffectiveConfig {
            name: "site".to_string(),
            source: PathBuf::from("/srv/site"),
            dest: PathBuf::from("/backups"),
            archive_format: format,
            use_restic: true,
            restic_interval_hours: 4,
            full_interval_days: 7,
            op_vault: None,
            excludes: vec!["node_modules".to_string()],
        }
    }

    fn args(spec: &CommandSpec) -> Vec<String> {
        spec.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_restic_backup_keeps_git_and_applies_excludes() {
        let spec = restic_backup_command(&config(ArchiveFormat::None), Path::new("/pw"));

        assert_eq!(spec.program, "restic");
        assert_eq!(
            args(&spec),
            vec![
                "backup",
                "--repo",
                "/backups/site/restic",
                "--password-file",
                "/pw",
                "--tag",
                "snapback",
                "--exclude",
                "node_modules",
                "/srv/site"
            ]
        );
    }

    #[test]
    fn test_tar_archive_excludes_git() {
        let archive = Path::new("/backups/site/site_1.tar.gz");
        let spec = archive_command(&config(ArchiveFormat::TarGz), archive).unwrap();

        assert_eq!(spec.program, "tar");
        assert_eq!(
            args(&spec),
            vec![
                "-czf",
                "/backups/site/site_1.tar.gz",
                "--exclude=node_modules",
                "--exclude=.git",
                "-C",
                "/srv",
                "site"
            ]
        );
    }

    #[test]
    fn test_seven_zip_archive_command() {
        let archive = Path::new("/backups/site/site_1.7z");
        let spec = archive_command(&config(ArchiveFormat::SevenZip), archive).unwrap();

        assert_eq!(spec.program, "7z");
        assert!(args(&spec).contains(&"-xr!.git".to_string()));
        assert!(args(&spec).contains(&"-xr!node_modules".to_string()));
    }

    #[test]
    fn test_archive_path_uses_job_dir_and_extension() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let path = archive_path(&config(ArchiveFormat::TarGz), now).unwrap();

        assert!(path.starts_with("/backups/site"));
        assert!(path.to_string_lossy().ends_with(".tar.gz"));
        assert!(archive_path(&config(ArchiveFormat::None), now).is_none());
    }
}
