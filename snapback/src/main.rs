//! Snapback - Main entry point
//!
//! Interval-driven restic and archive backups for project directories.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use snapback::app::{App, JobRow};
use snapback::environment::SystemEnvironment;
use snapback::executor::CommandExecutor;
use snapback::job::{ArchiveFormat, JobOverride};
use snapback::schedule::RunFlags;
use snapback::store::DaemonRegistration;
use snapback::utils::{self, output};
use snapback::Settings;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding manifest.toml and state.json
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run whatever is due for a job
    Run(RunArgs),
    /// Show the schedule of one saved job, or of all jobs
    Status { source: Option<PathBuf> },
    /// List saved jobs
    Jobs {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget a saved job and its run history
    Remove { source: PathBuf },
    /// Show or edit shared defaults
    Defaults {
        #[command(subcommand)]
        action: DefaultsAction,
    },
    /// Import the legacy jobs.json store
    Migrate,
    /// Record or clear an installed scheduler descriptor
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand, Debug)]
enum DefaultsAction {
    Show,
    /// Set one default, e.g. `archive_format tar.gz`
    Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    Register {
        source: PathBuf,
        /// Path of the installed descriptor
        #[arg(long, value_name = "FILE")]
        descriptor: PathBuf,
        #[arg(long)]
        label: Option<String>,
    },
    Unregister { source: PathBuf },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Source directory to back up
    #[arg(default_value = ".")]
    source: PathBuf,

    /// Name for this backup (used in filenames)
    #[arg(short = 'N', long)]
    name: Option<String>,

    /// Destination root directory
    #[arg(short, long)]
    dest: Option<String>,

    /// Enable restic incremental backups
    #[arg(long, conflicts_with = "no_restic")]
    restic: bool,

    /// Disable restic incremental backups
    #[arg(long)]
    no_restic: bool,

    /// Full archive format
    #[arg(long, value_name = "FORMAT")]
    archive_format: Option<ArchiveFormat>,

    /// Additional patterns to exclude
    #[arg(short, long = "exclude")]
    excludes: Vec<String>,

    /// Hours between restic snapshots
    #[arg(long)]
    restic_interval: Option<u64>,

    /// Days between full archives
    #[arg(long)]
    full_interval: Option<u64>,

    /// Secret vault holding the restic password
    #[arg(long)]
    op_vault: Option<String>,

    /// Ignore intervals and the recent-run check
    #[arg(short, long)]
    force: bool,

    /// Unattended mode: skip silently when nothing is needed
    #[arg(short, long)]
    auto: bool,

    /// Show what would happen without doing it
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Send desktop notifications
    #[arg(long)]
    notify: bool,

    /// Save the job configuration without running
    #[arg(long)]
    save: bool,
}

impl RunArgs {
    fn job_override(&self) -> JobOverride {
        let use_restic = match (self.restic, self.no_restic) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };
        JobOverride {
            dest: self.dest.clone(),
            archive_format: self.archive_format,
            use_restic,
            restic_interval_hours: self.restic_interval,
            full_interval_days: self.full_interval,
            op_vault: self.op_vault.clone(),
            excludes: self.excludes.clone(),
            ..JobOverride::new(
                self.name.clone().unwrap_or_default(),
                self.source.to_string_lossy(),
            )
        }
    }

    fn flags(&self) -> RunFlags {
        RunFlags {
            force: self.force,
            auto: self.auto,
            dry_run: self.dry_run,
        }
    }
}

fn main() -> ExitCode {
    match run_cli() {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run_cli() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = match &cli.config_dir {
        Some(dir) => Settings::load_from(dir),
        None => Settings::load(),
    }
    .context("failed to load settings")?;
    if cli.verbose {
        settings.log.level = "debug".to_string();
    }

    utils::logger::init(&settings.log.level)?;
    tracing::debug!(
        "snapback v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        settings.config_dir.display()
    );

    let app = App::open(settings);

    match cli.command {
        Command::Run(args) => {
            let job = args.job_override();
            if args.save {
                let key = app.save_job(app.layered_override(&job))?;
                let (_, config) = app.resolve_job(&job);
                println!("Saved {} ({}) for {key}", config.name, config.mode_label());
                return Ok(ExitCode::SUCCESS);
            }

            let env = SystemEnvironment::new(args.notify, args.auto);
            let mut executor = CommandExecutor;
            let report = app.run(&job, args.flags(), &env, &mut executor);
            Ok(ExitCode::from(report.exit_code()))
        }
        Command::Status { source: Some(source) } => {
            let status = app.status(&source, Utc::now())?;
            output::print_detail("Name", &status.config.name);
            output::print_detail("Source", &status.key);
            output::print_detail("Destination", status.config.job_dir().display());
            output::print_detail("Mode", status.config.mode_label());
            output::print_detail("Restic interval", format!("{}h", status.config.restic_interval_hours));
            output::print_detail("Full interval", format!("{}d", status.config.full_interval_days));
            if let Some(vault) = &status.config.op_vault {
                output::print_detail("Vault", vault);
            }
            for op in status.decision.operations() {
                output::print_detail(op.kind.as_str(), snapback::app::describe(op));
            }
            if let Some(daemon) = &status.daemon {
                output::print_detail("Daemon", format!("{} ({})", daemon.label, daemon.descriptor_path.display()));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { source: None } => list_jobs(&app, output::OutputFormat::Table),
        Command::Jobs { json } => list_jobs(&app, output::OutputFormat::from_json_flag(json)),
        Command::Remove { source } => {
            let removed = app.remove_job(&source)?;
            println!("Removed {} ({})", removed.name, removed.source);
            Ok(ExitCode::SUCCESS)
        }
        Command::Defaults { action } => {
            let defaults = match action {
                DefaultsAction::Show => app.defaults(),
                DefaultsAction::Set { key, value } => app.set_default(&key, &value)?,
            };
            print!("{}", toml::to_string_pretty(&defaults)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate => {
            if app.migrate() {
                println!("Migrated legacy jobs to {}", app.settings().manifest_path().display());
            } else {
                println!("Nothing to migrate");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Daemon { action } => {
            match action {
                DaemonAction::Register {
                    source,
                    descriptor,
                    label,
                } => {
                    let label = match label {
                        Some(label) => label,
                        None => format!("com.snapback.{}", app.status(&source, Utc::now())?.config.name),
                    };
                    let key = app.register_daemon(
                        &source,
                        DaemonRegistration {
                            descriptor_path: descriptor,
                            label,
                        },
                    )?;
                    println!("Registered daemon for {key}");
                }
                DaemonAction::Unregister { source } => match app.unregister_daemon(&source)? {
                    Some(previous) => println!("Unregistered {}", previous.label),
                    None => println!("No daemon registered"),
                },
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn list_jobs(app: &App, format: output::OutputFormat) -> Result<ExitCode> {
    let statuses = app.statuses(Utc::now());
    let rows: Vec<JobRow> = statuses.iter().map(JobRow::from).collect();
    output::print_list(&rows, &statuses, format)?;
    Ok(ExitCode::SUCCESS)
}
