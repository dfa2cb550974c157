//! Executes the due operations of one job.
//!
//! Gates are checked first (source, destination, power), then the decision is
//! turned into a plan. Kinds run sequentially, incremental before full, and a
//! success is persisted as soon as it happens so a later failure cannot lose
//! it.

use super::decision::{decide, format_age, JobMode, OperationKind, Plan, RunFlags, RunOutcome, SchedulingDecision};
use crate::environment::Environment;
use crate::executor::OperationExecutor;
use crate::job::{EffectiveConfig, JobKey};
use crate::store::StateStore;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

/// One invocation for one job
#[derive(Debug, Clone)]
pub struct JobRun<'a> {
    pub key: &'a JobKey,
    pub config: &'a EffectiveConfig,
    pub flags: RunFlags,
    pub now: DateTime<Utc>,
    /// Single-kind jobs ask before running again within this window
    pub recent_run_guard: Duration,
}

/// Why a run ended without attempting anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DestinationUnreachable,
    OnBattery,
    NothingDue,
    AllCurrent,
    RecentRun,
    Declined,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub kind: OperationKind,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub decision: Option<SchedulingDecision>,
    pub attempts: Vec<Attempt>,
    pub skipped: Option<SkipReason>,
}

impl RunReport {
    fn finished(outcome: RunOutcome, decision: Option<SchedulingDecision>) -> Self {
        Self {
            outcome,
            decision,
            attempts: Vec::new(),
            skipped: None,
        }
    }

    fn skipped(reason: SkipReason, decision: Option<SchedulingDecision>) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::finished(RunOutcome::Success, decision)
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

/// Run whatever is due for one job and report the aggregate outcome
pub fn run_job(
    run: &JobRun<'_>,
    state: &StateStore,
    env: &dyn Environment,
    executor: &mut dyn OperationExecutor,
) -> RunReport {
    let config = run.config;
    let flags = run.flags;

    if !config.source.is_dir() {
        error!(job = %run.key, source = %config.source.display(), "Source directory does not exist");
        env.notify("Backup failed", &format!("{}: source directory missing", config.name));
        return RunReport::finished(RunOutcome::Failure, None);
    }

    if !destination_reachable(config) {
        env.notify(
            "Backup skipped",
            &format!("{}: destination {} is not reachable", config.name, config.dest.display()),
        );
        if flags.auto {
            debug!(job = %run.key, "Destination unreachable, skipping");
            return RunReport::skipped(SkipReason::DestinationUnreachable, None);
        }
        error!(job = %run.key, dest = %config.dest.display(), "Destination is not reachable");
        return RunReport::finished(RunOutcome::Failure, None);
    }

    if flags.auto && env.on_battery() {
        debug!(job = %run.key, "On battery power, skipping");
        return RunReport::skipped(SkipReason::OnBattery, None);
    }

    let decision = decide(config, &state.get(run.key), run.now, flags);
    for op in decision.operations() {
        debug!(job = %run.key, kind = %op.kind, needed = op.needed, reason = %op.reason, "Evaluated");
    }

    let kinds = match decision.plan(flags) {
        Plan::Unconfigured => {
            error!(job = %run.key, "Neither restic nor an archive format is configured");
            return RunReport::finished(RunOutcome::Failure, Some(decision));
        }
        Plan::Idle => return RunReport::skipped(SkipReason::NothingDue, Some(decision)),
        Plan::AllCurrent => {
            info!(job = %run.key, "All backups are current");
            return RunReport::skipped(SkipReason::AllCurrent, Some(decision));
        }
        Plan::Run(kinds) => kinds,
    };

    if let JobMode::Single(kind) = decision.mode {
        if let Some(reason) = check_recent_run(run, &decision, kind, env) {
            return RunReport::skipped(reason, Some(decision));
        }
    }

    if flags.dry_run {
        for kind in &kinds {
            info!(job = %run.key, kind = %kind, reason = %decision.get(*kind).reason, "Would run");
        }
        return RunReport::skipped(SkipReason::DryRun, Some(decision));
    }

    let mut attempts = Vec::with_capacity(kinds.len());
    for kind in kinds {
        info!(job = %run.key, kind = %kind, "Starting");
        match executor.run(kind, config, run.now) {
            Ok(()) => {
                info!(job = %run.key, kind = %kind, "Completed");
                if let Err(e) = state.record_success(run.key, kind, run.now) {
                    warn!(job = %run.key, kind = %kind, error = %e, "Failed to record success");
                }
                attempts.push(Attempt {
                    kind,
                    succeeded: true,
                    error: None,
                });
            }
            Err(e) => {
                error!(job = %run.key, kind = %kind, error = %e, "Failed");
                attempts.push(Attempt {
                    kind,
                    succeeded: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let outcome = RunOutcome::aggregate(attempts.iter().map(|a| a.succeeded));
    match outcome {
        RunOutcome::Success => env.notify("Backup complete", &config.name),
        RunOutcome::Partial => env.notify(
            "Backup partially failed",
            &format!("{}: {}", config.name, describe_failures(&attempts)),
        ),
        RunOutcome::Failure => env.notify(
            "Backup failed",
            &format!("{}: {}", config.name, describe_failures(&attempts)),
        ),
    }

    RunReport {
        outcome,
        decision: Some(decision),
        attempts,
        skipped: None,
    }
}

fn destination_reachable(config: &EffectiveConfig) -> bool {
    config.dest.is_dir() || config.dest.parent().is_some_and(|parent| parent.is_dir())
}

/// Guard against re-running a single-kind job shortly after its last success
fn check_recent_run(
    run: &JobRun<'_>,
    decision: &SchedulingDecision,
    kind: OperationKind,
    env: &dyn Environment,
) -> Option<SkipReason> {
    if run.flags.force {
        return None;
    }
    let last = decision.get(kind).last_success?;
    let age = (run.now - last).max(Duration::zero());
    if age >= run.recent_run_guard {
        return None;
    }

    let question = format!("Last {kind} backup was {} ago. Run again?", format_age(age));
    if run.flags.auto {
        debug!(job = %run.key, kind = %kind, "Ran recently, skipping");
        return Some(SkipReason::RecentRun);
    }
    if run.flags.dry_run {
        info!(job = %run.key, "Would ask: {question}");
        return Some(SkipReason::DryRun);
    }
    if !env.is_interactive() {
        warn!(job = %run.key, kind = %kind, "Ran {} ago; use --force to run again", format_age(age));
        return Some(SkipReason::Declined);
    }
    if env.confirm(&question) {
        None
    } else {
        info!(job = %run.key, "Skipped");
        Some(SkipReason::Declined)
    }
}

fn describe_failures(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .filter(|a| !a.succeeded)
        .map(|a| format!("{} failed", a.kind))
        .collect::<Vec<_>>()
        .join(", ")
}
