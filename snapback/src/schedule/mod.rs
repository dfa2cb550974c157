//! Scheduling: per-kind due decisions and the run loop built on them.

pub mod decision;
pub mod runner;

pub use decision::{
    decide, format_age, DueReason, JobMode, OperationDecision, OperationKind, Plan, RunFlags,
    RunOutcome, SchedulingDecision,
};
pub use runner::{run_job, Attempt, JobRun, RunReport, SkipReason};
