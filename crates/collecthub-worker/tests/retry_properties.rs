//! Property tests for the retry state machine.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use collecthub_worker::retry::{RetryDecision, RetryPolicy};

fn budget() -> impl Strategy<Value = i32> {
    0..=10i32
}

fn base_delay() -> impl Strategy<Value = Duration> {
    (1u64..=3600).prop_map(Duration::from_secs)
}

proptest! {
    #[test]
    fn retry_count_never_exceeds_budget(
        max_retries in budget(),
        base in base_delay(),
        failures in 1usize..20,
    ) {
        let policy = RetryPolicy::new(base);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut retry_count = 0;
        let mut terminal = false;

        for _ in 0..failures {
            match policy.decide(retry_count, max_retries, true, now) {
                RetryDecision::Retry { retry_count: next, .. } => {
                    prop_assert_eq!(next, retry_count + 1);
                    retry_count = next;
                }
                RetryDecision::Fail { retry_count: last } => {
                    prop_assert!(last >= retry_count);
                    retry_count = last;
                    terminal = true;
                    break;
                }
            }
            prop_assert!(retry_count <= max_retries);
        }

        prop_assert!(retry_count <= max_retries);
        if failures > max_retries as usize {
            prop_assert!(terminal);
        }
    }

    #[test]
    fn retry_delay_doubles(base in base_delay(), retry_count in 0i32..10) {
        let policy = RetryPolicy::new(base);
        prop_assert_eq!(policy.backoff(retry_count), base * 2u32.pow(retry_count as u32));
        prop_assert_eq!(policy.backoff(retry_count + 1), policy.backoff(retry_count) * 2);
    }

    #[test]
    fn non_retryable_fails_without_counting(
        retry_count in 0i32..5,
        extra in 0i32..5,
    ) {
        let policy = RetryPolicy::new(Duration::from_secs(300));
        let decision = policy.decide(retry_count, retry_count + extra, false, Utc::now());
        prop_assert_eq!(decision, RetryDecision::Fail { retry_count });
    }

    #[test]
    fn next_run_time_matches_delay(base in base_delay(), max_retries in 2i32..10) {
        let policy = RetryPolicy::new(base);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        match policy.decide(0, max_retries, true, now) {
            RetryDecision::Retry { retry_count, delay, next_run_time } => {
                prop_assert_eq!(retry_count, 1);
                prop_assert_eq!(delay, base * 2);
                prop_assert_eq!((next_run_time - now).to_std().unwrap(), delay);
            }
            other => prop_assert!(false, "expected retry, got {:?}", other),
        }
    }
}
