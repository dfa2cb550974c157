//! Property-based tests for job resolution, identity and scheduling.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use snapback::job::{normalize, resolve, ArchiveFormat, Defaults, JobOverride};
use snapback::schedule::{decide, OperationKind, RunFlags, RunOutcome};
use snapback::store::RunState;

fn archive_format() -> impl Strategy<Value = ArchiveFormat> {
    prop_oneof![
        Just(ArchiveFormat::None),
        Just(ArchiveFormat::SevenZip),
        Just(ArchiveFormat::TarGz),
    ]
}

fn pattern() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("node_modules".to_string()),
        Just(".venv".to_string()),
        Just("*.log".to_string()),
        "[a-z*.]{1,10}",
    ]
}

// Absolute paths below a root that does not exist, so symlinks never interfere
fn source_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_-]{0,8}", 1..4)
        .prop_map(|parts| format!("/snapback-prop-root/{}", parts.join("/")))
}

fn defaults() -> impl Strategy<Value = Defaults> {
    (
        "/[a-z]{1,8}(/[a-z]{1,8}){0,2}",
        archive_format(),
        any::<bool>(),
        0u64..500,
        0u64..60,
        proptest::option::of(prop_oneof![Just(String::new()), Just("Private".to_string())]),
        prop::collection::vec(pattern(), 0..6),
    )
        .prop_map(
            |(dest, archive_format, use_restic, hours, days, op_vault, excludes)| Defaults {
                dest,
                archive_format,
                use_restic,
                restic_interval_hours: hours,
                full_interval_days: days,
                op_vault,
                excludes,
                ..Defaults::default()
            },
        )
}

fn job_override() -> impl Strategy<Value = JobOverride> {
    (
        "[a-z]{1,10}",
        source_path(),
        proptest::option::of("/[a-z]{1,8}"),
        proptest::option::of(archive_format()),
        proptest::option::of(any::<bool>()),
        proptest::option::of(0u64..500),
        proptest::option::of(0u64..60),
        proptest::option::of(prop_oneof![Just(String::new()), Just("Work".to_string())]),
        prop::collection::vec(pattern(), 0..4),
    )
        .prop_map(
            |(name, source, dest, archive_format, use_restic, hours, days, op_vault, excludes)| {
                JobOverride {
                    dest,
                    archive_format,
                    use_restic,
                    restic_interval_hours: hours,
                    full_interval_days: days,
                    op_vault,
                    excludes,
                    ..JobOverride::new(name, source)
                }
            },
        )
}

proptest! {
    #[test]
    fn resolve_is_idempotent(defaults in defaults(), job in job_override()) {
        let effective = resolve(&defaults, &job);
        let again = resolve(&defaults, &effective.as_override());

        prop_assert_eq!(again, effective);
    }

    #[test]
    fn exclusions_are_a_superset(defaults in defaults(), job in job_override()) {
        let effective = resolve(&defaults, &job);

        for pattern in defaults.excludes.iter().chain(job.excludes.iter()) {
            prop_assert!(effective.excludes.contains(pattern));
        }
        let mut seen = std::collections::HashSet::new();
        prop_assert!(effective.excludes.iter().all(|p| seen.insert(p)));
    }

    #[test]
    fn override_scalars_win(defaults in defaults(), job in job_override()) {
        let effective = resolve(&defaults, &job);

        prop_assert_eq!(effective.use_restic, job.use_restic.unwrap_or(defaults.use_restic));
        prop_assert_eq!(
            effective.archive_format,
            job.archive_format.unwrap_or(defaults.archive_format)
        );
        prop_assert_eq!(
            effective.full_interval_days,
            job.full_interval_days.unwrap_or(defaults.full_interval_days)
        );
    }

    #[test]
    fn normalize_is_a_projection(source in source_path(), noise in prop::collection::vec(prop_oneof![Just("."), Just("x/..")], 0..3)) {
        let noisy = format!("{}/{}", source, noise.join("/"));
        let key = normalize(&noisy);

        prop_assert_eq!(normalize(key.as_str()), key.clone());
        prop_assert_eq!(normalize(&source), key);
    }

    #[test]
    fn forced_runs_need_every_configured_kind(defaults in defaults(), job in job_override(), age_hours in 0i64..2000) {
        let config = resolve(&defaults, &job);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut state = RunState::default();
        state.record_success(OperationKind::Incremental, now - Duration::hours(age_hours));
        state.record_success(OperationKind::Full, now - Duration::hours(age_hours));

        let flags = RunFlags { force: true, ..Default::default() };
        let decision = decide(&config, &state, now, flags);

        prop_assert_eq!(decision.incremental.needed, config.use_restic);
        prop_assert_eq!(decision.full.needed, config.archive_format.is_enabled());
    }

    #[test]
    fn due_kinds_stay_due_as_time_passes(
        defaults in defaults(),
        job in job_override(),
        age_hours in 0i64..2000,
        later_hours in 0i64..2000,
    ) {
        let config = resolve(&defaults, &job);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut state = RunState::default();
        state.record_success(OperationKind::Incremental, now - Duration::hours(age_hours));
        state.record_success(OperationKind::Full, now - Duration::hours(age_hours));

        let first = decide(&config, &state, now, RunFlags::default());
        let later = decide(&config, &state, now + Duration::hours(later_hours), RunFlags::default());

        for kind in OperationKind::ALL {
            if first.get(kind).needed {
                prop_assert!(later.get(kind).needed);
            }
        }
    }

    #[test]
    fn outcome_matches_results(results in prop::collection::vec(any::<bool>(), 0..4)) {
        let outcome = RunOutcome::aggregate(results.iter().copied());
        let expected = if results.iter().all(|ok| *ok) {
            RunOutcome::Success
        } else if results.iter().any(|ok| *ok) {
            RunOutcome::Partial
        } else {
            RunOutcome::Failure
        };

        prop_assert_eq!(outcome, expected);
    }
}
