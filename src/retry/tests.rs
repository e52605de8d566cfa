//! Property tests for retry decisions.

use super::*;
use crate::error::{ErrorKind, OperationError};
use proptest::prelude::*;
use std::time::Duration;

fn any_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::Fatal),
        Just(ErrorKind::Validation),
        Just(ErrorKind::Data),
        Just(ErrorKind::Network),
        Just(ErrorKind::Timeout),
        Just(ErrorKind::Cancelled),
        Just(ErrorKind::Other),
    ]
}

/// Count how many attempts an always-failing operation gets under `policy`.
fn attempts_until_give_up(policy: &RetryPolicy, error: &OperationError) -> u32 {
    let mut retries = 0;
    while policy.decide(retries, error).is_retry() {
        retries += 1;
    }
    retries + 1
}

proptest! {
    #[test]
    fn prop_always_failing_gets_max_retries_plus_one(
        max_retries in 0u32..20,
        base_ms in 0u64..5_000,
        kind in any_kind(),
    ) {
        let policy = RetryPolicy::linear(Duration::from_millis(base_ms))
            .with_max_retries(max_retries);
        let err = OperationError::new(kind, "failure");

        prop_assert_eq!(attempts_until_give_up(&policy, &err), max_retries + 1);
    }

    #[test]
    fn prop_linear_delay_formula(
        attempt in 0u32..50,
        base_ms in 1u64..10_000,
    ) {
        let base = Duration::from_millis(base_ms);
        let policy = RetryPolicy::linear(base).with_max_retries(50);

        prop_assert_eq!(
            policy.delay_for_attempt(attempt),
            Some(base * (attempt + 1))
        );
    }

    #[test]
    fn prop_delay_never_exceeds_cap(
        attempt in 0u32..30,
        base_ms in 1u64..1_000,
        cap_ms in 1u64..10_000,
    ) {
        let cap = Duration::from_millis(cap_ms);
        let policy = RetryPolicy::exponential(Duration::from_millis(base_ms))
            .with_max_retries(30)
            .with_max_delay(cap);

        let delay = policy.delay_for_attempt(attempt).unwrap();
        prop_assert!(delay <= cap);
    }

    #[test]
    fn prop_transient_only_matches_kind(kind in any_kind()) {
        let policy = RetryPolicy::default().transient_only();
        let err = OperationError::new(kind, "failure");

        prop_assert_eq!(policy.decide(0, &err).is_retry(), kind.is_transient());
    }
}

#[test]
fn test_default_policy_allows_four_attempts() {
    let err = OperationError::from("boom");
    assert_eq!(attempts_until_give_up(&RetryPolicy::default(), &err), 4);
}

#[test]
fn test_default_delays_are_one_two_three_seconds() {
    let policy = RetryPolicy::default();
    let err = OperationError::from("boom");

    let delays: Vec<_> = (0..4).filter_map(|n| policy.decide(n, &err).delay()).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3)
        ]
    );
}
