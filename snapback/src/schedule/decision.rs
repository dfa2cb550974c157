//! Scheduling decisions.
//!
//! Each operation kind is evaluated independently: forced runs are always due,
//! a kind that never succeeded is due, otherwise it is due once the time since
//! its last success reaches the configured interval. A zero interval is always
//! due.

use crate::job::EffectiveConfig;
use crate::store::state::RunState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two independently scheduled operations of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Deduplicating restic snapshot
    Incremental,
    /// Standalone compressed archive
    Full,
}

impl OperationKind {
    /// Evaluation and execution order
    pub const ALL: [OperationKind; 2] = [OperationKind::Incremental, OperationKind::Full];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Incremental => "incremental",
            OperationKind::Full => "full",
        }
    }

    /// Map a persisted label, including the tool names used by older stores
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "incremental" | "restic" => Some(OperationKind::Incremental),
            "full" | "archive" | "7z" | "tar.gz" => Some(OperationKind::Full),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invocation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Ignore intervals and the recency guard
    pub force: bool,
    /// Unattended invocation: quiet on no-ops and environment skips
    pub auto: bool,
    /// Report intent only; never attempt or record anything
    pub dry_run: bool,
}

/// Which operation kinds a job has configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "kind")]
pub enum JobMode {
    Combined,
    Single(OperationKind),
    Unconfigured,
}

impl JobMode {
    pub fn of(config: &EffectiveConfig) -> Self {
        match (config.use_restic, config.archive_format.is_enabled()) {
            (true, true) => JobMode::Combined,
            (true, false) => JobMode::Single(OperationKind::Incremental),
            (false, true) => JobMode::Single(OperationKind::Full),
            (false, false) => JobMode::Unconfigured,
        }
    }

    pub fn includes(self, kind: OperationKind) -> bool {
        match self {
            JobMode::Combined => true,
            JobMode::Single(only) => only == kind,
            JobMode::Unconfigured => false,
        }
    }
}

/// Why a kind is or is not due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DueReason {
    NotConfigured,
    Forced,
    NeverRun,
    IntervalElapsed { age_secs: i64, interval_secs: i64 },
    Current { age_secs: i64, interval_secs: i64 },
}

impl fmt::Display for DueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DueReason::NotConfigured => f.write_str("not configured"),
            DueReason::Forced => f.write_str("forced"),
            DueReason::NeverRun => f.write_str("never run"),
            DueReason::IntervalElapsed {
                age_secs,
                interval_secs,
            } => write!(
                f,
                "last run {} ago (every {})",
                format_age(Duration::seconds(age_secs)),
                format_age(Duration::seconds(interval_secs))
            ),
            DueReason::Current {
                age_secs,
                interval_secs,
            } => write!(
                f,
                "current, last run {} ago (every {})",
                format_age(Duration::seconds(age_secs)),
                format_age(Duration::seconds(interval_secs))
            ),
        }
    }
}

/// Decision for one operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationDecision {
    pub kind: OperationKind,
    pub needed: bool,
    pub reason: DueReason,
    pub last_success: Option<DateTime<Utc>>,
}

/// What the runner should do with a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Unattended and nothing due: exit 0 without output
    Idle,
    /// Manual run and nothing due
    AllCurrent,
    /// Attempt these kinds, in order
    Run(Vec<OperationKind>),
    /// Neither kind configured
    Unconfigured,
}

/// Result of evaluating one job at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulingDecision {
    pub evaluated_at: DateTime<Utc>,
    pub mode: JobMode,
    pub incremental: OperationDecision,
    pub full: OperationDecision,
}

impl SchedulingDecision {
    pub fn get(&self, kind: OperationKind) -> &OperationDecision {
        match kind {
            OperationKind::Incremental => &self.incremental,
            OperationKind::Full => &self.full,
        }
    }

    pub fn operations(&self) -> [&OperationDecision; 2] {
        [&self.incremental, &self.full]
    }

    pub fn due_kinds(&self) -> Vec<OperationKind> {
        self.operations()
            .into_iter()
            .filter(|op| op.needed)
            .map(|op| op.kind)
            .collect()
    }

    /// Turn the per-kind decisions into an action.
    ///
    /// Combined jobs follow the intervals in every mode. A single-kind job
    /// follows its interval only when unattended; a manual run always targets
    /// the configured kind and relies on the recency guard instead.
    pub fn plan(&self, flags: RunFlags) -> Plan {
        match self.mode {
            JobMode::Unconfigured => Plan::Unconfigured,
            JobMode::Combined => {
                let due = self.due_kinds();
                match (due.is_empty(), flags.auto) {
                    (true, true) => Plan::Idle,
                    (true, false) => Plan::AllCurrent,
                    (false, _) => Plan::Run(due),
                }
            }
            JobMode::Single(kind) => {
                if flags.auto && !self.get(kind).needed {
                    Plan::Idle
                } else {
                    Plan::Run(vec![kind])
                }
            }
        }
    }
}

/// Interval after which `kind` is due again
pub fn interval_for(config: &EffectiveConfig, kind: OperationKind) -> Duration {
    match kind {
        OperationKind::Incremental => hours(config.restic_interval_hours),
        OperationKind::Full => days(config.full_interval_days),
    }
}

/// Whole hours, saturating at `Duration::MAX` instead of wrapping
pub fn hours(count: u64) -> Duration {
    i64::try_from(count)
        .ok()
        .and_then(Duration::try_hours)
        .unwrap_or(Duration::MAX)
}

/// Whole days, saturating at `Duration::MAX`
pub fn days(count: u64) -> Duration {
    i64::try_from(count)
        .ok()
        .and_then(Duration::try_days)
        .unwrap_or(Duration::MAX)
}

/// Decide which operation kinds of a job are due at `now`
pub fn decide(
    config: &EffectiveConfig,
    state: &RunState,
    now: DateTime<Utc>,
    flags: RunFlags,
) -> SchedulingDecision {
    let mode = JobMode::of(config);
    let evaluate = |kind| decide_kind(kind, mode.includes(kind), config, state, now, flags);

    SchedulingDecision {
        evaluated_at: now,
        mode,
        incremental: evaluate(OperationKind::Incremental),
        full: evaluate(OperationKind::Full),
    }
}

fn decide_kind(
    kind: OperationKind,
    configured: bool,
    config: &EffectiveConfig,
    state: &RunState,
    now: DateTime<Utc>,
    flags: RunFlags,
) -> OperationDecision {
    let last_success = state.last_success(kind);
    let (needed, reason) = if !configured {
        (false, DueReason::NotConfigured)
    } else if flags.force {
        (true, DueReason::Forced)
    } else {
        match last_success {
            None => (true, DueReason::NeverRun),
            Some(last) => {
                let age = (now - last).max(Duration::zero());
                let interval = interval_for(config, kind);
                let age_secs = age.num_seconds();
                let interval_secs = interval.num_seconds();
                if age >= interval {
                    (true, DueReason::IntervalElapsed { age_secs, interval_secs })
                } else {
                    (false, DueReason::Current { age_secs, interval_secs })
                }
            }
        }
    };

    OperationDecision {
        kind,
        needed,
        reason,
        last_success,
    }
}

/// Aggregate result of a run, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every needed kind succeeded, or nothing needed to run
    Success,
    /// At least one needed kind succeeded and at least one failed
    Partial,
    /// Every needed kind failed, or the run could not start
    Failure,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failure => 1,
            RunOutcome::Partial => 2,
        }
    }

    /// Combine per-kind results (`true` = succeeded)
    pub fn aggregate(results: impl IntoIterator<Item = bool>) -> Self {
        let (mut ok, mut failed) = (0usize, 0usize);
        for succeeded in results {
            if succeeded {
                ok += 1;
            } else {
                failed += 1;
            }
        }
        match (ok, failed) {
            (_, 0) => RunOutcome::Success,
            (0, _) => RunOutcome::Failure,
            _ => RunOutcome::Partial,
        }
    }
}

/// Compact age such as `3d 4h`, `5h 12m` or `7m`
pub fn format_age(age: Duration) -> String {
    let days = age.num_days();
    let hours = age.num_hours() % 24;
    let minutes = age.num_minutes() % 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
