//! Property-based tests for statistics, transitions and backoff

mod common;

use std::time::Duration;

use common::strategies::*;
use geoconv_core::models::TaskStatistics;
use geoconv_core::orchestration::{BackoffCalculator, BackoffCalculatorConfig};
use geoconv_core::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use geoconv_core::storage::UploadedFile;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_statistics_partition_loaded(statuses in group_statuses_strategy()) {
        let stats = TaskStatistics::from_statuses(statuses.iter().copied());

        prop_assert_eq!(stats.loaded, statuses.len() as i64);
        prop_assert_eq!(stats.remaining, stats.loaded - stats.completed - stats.failed);
        prop_assert_eq!(
            stats.loaded,
            stats.completed + stats.failed + stats.in_progress + stats.waiting()
        );
        prop_assert!(stats.waiting() >= 0);
        prop_assert_eq!(stats.is_finished(), statuses.iter().all(|s| s.is_some_and(|s| s.is_terminal())));
    }

    #[test]
    fn test_fail_reaches_failed_from_any_live_state(state in task_state_strategy(), message in ".{0,40}") {
        let result = TaskStateMachine::determine_target_state(state, &TaskEvent::Fail(message));
        if state.is_terminal() {
            prop_assert!(result.is_err());
        } else {
            prop_assert_eq!(result.unwrap(), TaskState::Failed);
        }
    }

    #[test]
    fn test_restart_always_returns_to_accepted(state in task_state_strategy()) {
        let target = TaskStateMachine::determine_target_state(state, &TaskEvent::Restart).unwrap();
        prop_assert_eq!(target, TaskState::Accepted);

        let patch = TaskStateMachine::build_patch(target, &TaskEvent::Restart);
        prop_assert_eq!(patch.error, Some(None));
        prop_assert_eq!(patch.result_artifact_path, Some(None));
    }

    #[test]
    fn test_retry_delay_bounded_and_monotonic(
        step_ms in 1u64..5_000,
        max_ms in 1u64..120_000,
        jitter_ms in 0u64..3_000,
        attempt in 0u32..1_000,
    ) {
        let backoff = BackoffCalculator::new(BackoffCalculatorConfig {
            initial_jitter_max: Duration::ZERO,
            step: Duration::from_millis(step_ms),
            retry_jitter_max: Duration::from_millis(3_000),
            max_delay: Duration::from_millis(max_ms),
            budget: Duration::from_secs(1_800),
        });
        let jitter = Duration::from_millis(jitter_ms);

        let delay = backoff.retry_delay(attempt, jitter);
        prop_assert!(delay <= Duration::from_millis(max_ms));
        prop_assert!(backoff.retry_delay(attempt + 1, jitter) >= delay);

        let uncapped = Duration::from_millis(step_ms * (u64::from(attempt) + 1) + jitter_ms);
        prop_assert_eq!(delay, uncapped.min(Duration::from_millis(max_ms)));
    }

    #[test]
    fn test_random_retry_delay_within_jitter(attempt in 0u32..20) {
        let config = BackoffCalculatorConfig::default();
        let backoff = BackoffCalculator::new(config.clone());
        let delay = backoff.next_retry_delay(attempt);
        let floor = config.step.saturating_mul(attempt + 1).min(config.max_delay);

        prop_assert!(delay >= floor);
        prop_assert!(delay <= config.max_delay);
        prop_assert!(delay <= floor + config.retry_jitter_max);
        prop_assert!(backoff.initial_delay() <= config.initial_jitter_max);
    }

    #[test]
    fn test_only_zip_uploads_are_archives(file_name in file_name_strategy()) {
        let upload = UploadedFile::new(file_name.clone(), Vec::new());
        let expected = file_name.to_ascii_lowercase().ends_with(".zip");
        prop_assert_eq!(upload.is_archive(), expected);
        prop_assert!(!upload.task_name().is_empty());
    }
}
