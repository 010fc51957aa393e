//! Property tests for status bucketing and batch roll-up

use proptest::prelude::*;

use ghmigrate::lifecycle::rollup;
use ghmigrate::models::BatchStatus;
use ghmigrate::status::{bucket_for_raw, Bucket, RepositoryStatus, StatusCounts};

fn any_status() -> impl Strategy<Value = RepositoryStatus> {
    prop::sample::select(RepositoryStatus::ALL.to_vec())
}

/// Known status strings mixed with arbitrary ones
fn raw_status() -> impl Strategy<Value = String> {
    prop_oneof![
        any_status().prop_map(|s| s.as_str().to_string()),
        "[a-z_]{1,20}",
    ]
}

proptest! {
    #[test]
    fn bucketing_counts_every_repository(
        entries in prop::collection::vec((raw_status(), 0u64..1_000), 0..40)
    ) {
        let expected: u64 = entries.iter().map(|(_, n)| n).sum();
        let counts: StatusCounts = entries.into_iter().collect();
        let buckets = counts.bucketed();

        prop_assert_eq!(buckets.total() + buckets.excluded, expected);
        prop_assert_eq!(buckets.excluded, counts.get("wont_migrate"));
    }

    #[test]
    fn unknown_strings_are_pending(raw in "[A-Z]{1,12}") {
        // Persisted statuses are lower case, so these never parse
        prop_assert_eq!(bucket_for_raw(&raw), Bucket::Pending);
    }

    #[test]
    fn status_strings_parse_back(status in any_status()) {
        prop_assert_eq!(status.as_str().parse::<RepositoryStatus>().unwrap(), status);
    }

    #[test]
    fn transitions_never_loop_or_leave_final_states(from in any_status(), to in any_status()) {
        if from.can_transition_to(to) {
            prop_assert_ne!(from, to);
            prop_assert!(!matches!(
                from,
                RepositoryStatus::Complete
                    | RepositoryStatus::MigrationComplete
                    | RepositoryStatus::WontMigrate
            ));
        }
    }

    #[test]
    fn rollup_is_never_ahead_of_members(
        statuses in prop::collection::vec(any_status(), 0..12)
    ) {
        let counted: Vec<RepositoryStatus> = statuses
            .iter()
            .copied()
            .filter(|s| *s != RepositoryStatus::WontMigrate)
            .collect();

        match rollup(statuses.clone()) {
            BatchStatus::Completed => {
                prop_assert!(!counted.is_empty());
                prop_assert!(counted.iter().all(|s| s.bucket() == Bucket::Completed));
            }
            BatchStatus::CompletedWithErrors => {
                prop_assert!(counted.iter().all(|s| s.is_terminal()));
                prop_assert!(counted.iter().any(|s| s.bucket() == Bucket::Failed));
                prop_assert!(counted.iter().any(|s| matches!(
                    s,
                    RepositoryStatus::Complete
                        | RepositoryStatus::MigrationComplete
                        | RepositoryStatus::MigrationFailed
                        | RepositoryStatus::RolledBack
                )));
            }
            BatchStatus::Ready => {
                prop_assert!(counted.iter().all(|s| *s == RepositoryStatus::DryRunComplete));
            }
            BatchStatus::InProgress => {
                prop_assert!(counted.iter().any(|s| s.is_active()));
            }
            BatchStatus::Pending => {}
        }
    }

    #[test]
    fn excluded_members_do_not_change_rollup(
        statuses in prop::collection::vec(any_status(), 1..12),
        extra in 0usize..4
    ) {
        let mut with_excluded = statuses.clone();
        with_excluded.extend(std::iter::repeat(RepositoryStatus::WontMigrate).take(extra));
        prop_assert_eq!(rollup(statuses), rollup(with_excluded));
    }
}
