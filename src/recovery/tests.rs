use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing_test::traced_test;

use super::*;
use crate::error::Severity;

fn failing(runs: &AtomicU32) -> impl FnOnce() -> futures::future::Ready<Result<(), OperationError>> + '_ {
    move || {
        runs.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Err(OperationError::from("backup store unavailable")))
    }
}

fn cfg(id: &str) -> ErrorContext {
    ErrorContext::new().with("config_id", id)
}

#[tokio::test]
async fn test_recovery_budget_is_three_per_key() {
    let manager = RecoveryManager::default();
    let runs = AtomicU32::new(0);
    let ctx = cfg("cfg-1");

    for _ in 0..3 {
        assert!(!manager.attempt_recovery("save", &ctx, failing(&runs)).await);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    let fourth = manager.try_recovery("save", &ctx, failing(&runs)).await;
    assert!(fourth.is_exhausted());
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(manager.recovery_attempts("save", &ctx), 3);
}

#[tokio::test]
async fn test_success_resets_budget() {
    let manager = RecoveryManager::default();
    let runs = AtomicU32::new(0);
    let ctx = cfg("cfg-1");

    manager.attempt_recovery("save", &ctx, failing(&runs)).await;
    manager.attempt_recovery("save", &ctx, failing(&runs)).await;
    assert_eq!(manager.recovery_attempts("save", &ctx), 2);

    let recovered = manager
        .attempt_recovery("save", &ctx, || async { Ok::<_, OperationError>(true) })
        .await;
    assert!(recovered);
    assert_eq!(manager.recovery_attempts("save", &ctx), 0);

    for _ in 0..3 {
        manager.attempt_recovery("save", &ctx, failing(&runs)).await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_budgets_are_per_key() {
    let manager = RecoveryManager::default();
    let runs = AtomicU32::new(0);

    for _ in 0..3 {
        manager.attempt_recovery("save", &cfg("a"), failing(&runs)).await;
    }

    assert!(manager
        .try_recovery("save", &cfg("a"), failing(&runs))
        .await
        .is_exhausted());
    assert!(!manager
        .try_recovery("save", &cfg("b"), failing(&runs))
        .await
        .is_exhausted());
    assert!(!manager
        .try_recovery("delete", &cfg("a"), failing(&runs))
        .await
        .is_exhausted());
}

#[test]
fn test_identity_falls_back_through_fields() {
    let manager = RecoveryManager::default();

    let key = manager.key_for("save", &ErrorContext::new().with("nickname", "alice"));
    assert_eq!(key.identity, "alice");

    let both = ErrorContext::new()
        .with("config_id", "cfg-9")
        .with("nickname", "alice");
    assert_eq!(manager.key_for("save", &both).identity, "cfg-9");

    let empty_id = ErrorContext::new()
        .with("config_id", "")
        .with("nickname", "alice");
    assert_eq!(manager.key_for("save", &empty_id).identity, "alice");

    let none = manager.key_for("save", &ErrorContext::new().with("other", 1));
    assert_eq!(none.identity, UNKNOWN_IDENTITY);
    assert_eq!(none.to_string(), "save-unknown");
}

#[test]
fn test_custom_identity_fields() {
    let manager =
        RecoveryManager::new(RecoveryConfig::new().with_identity_fields(["record_id"]));
    let ctx = ErrorContext::new()
        .with("config_id", "ignored")
        .with("record_id", "r-1");

    assert_eq!(manager.key_for("save", &ctx).identity, "r-1");
}

#[tokio::test]
async fn test_failed_recovery_is_journaled() {
    let manager = RecoveryManager::default();
    let runs = AtomicU32::new(0);
    let ctx = cfg("cfg-3").with("nickname", "bob");

    let outcome = manager.try_recovery("save-config", &ctx, failing(&runs)).await;

    let RecoveryOutcome::Failed(record) = outcome else {
        panic!("Expected failed recovery, got {:?}", outcome);
    };
    assert_eq!(record.operation_type, "recovery-save-config");
    assert_eq!(record.error.message(), "backup store unavailable");
    assert_eq!(record.context.get("recovery_attempt"), Some("1"));
    assert_eq!(record.context.get("config_id"), Some("cfg-3"));
    assert_eq!(record.context.get("nickname"), Some("bob"));

    assert_eq!(manager.error_log(10), vec![record]);
}

#[tokio::test]
async fn test_recovery_attempt_number_increments() {
    let manager = RecoveryManager::default();
    let runs = AtomicU32::new(0);
    let ctx = cfg("cfg-4");

    manager.attempt_recovery("save", &ctx, failing(&runs)).await;
    manager.attempt_recovery("save", &ctx, failing(&runs)).await;

    let attempts: Vec<Option<String>> = manager
        .error_log(10)
        .iter()
        .map(|r| r.context.get("recovery_attempt").map(String::from))
        .collect();
    assert_eq!(attempts, vec![Some("2".to_string()), Some("1".to_string())]);
}

#[tokio::test]
async fn test_panicking_recovery_counts_as_failure() {
    let manager = RecoveryManager::default();
    let ctx = cfg("cfg-5");

    let outcome = manager
        .try_recovery("save", &ctx, || async {
            if true {
                panic!("restore exploded");
            }
            Ok::<(), OperationError>(())
        })
        .await;

    let RecoveryOutcome::Failed(record) = outcome else {
        panic!("Expected failed recovery, got {:?}", outcome);
    };
    assert_eq!(record.severity, Severity::Critical);
    assert_eq!(record.error.message(), "recovery panicked: restore exploded");
    assert_eq!(manager.recovery_attempts("save", &ctx), 1);
}

#[tokio::test]
async fn test_recovery_reporting_false_is_a_failed_attempt() {
    let manager = RecoveryManager::default();
    let ctx = cfg("cfg-6");
    let runs = AtomicU32::new(0);

    let mut results = Vec::new();
    for _ in 0..4 {
        let recovered = manager
            .attempt_recovery("save", &ctx, || {
                runs.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, OperationError>(false) }
            })
            .await;
        results.push(recovered);
    }

    assert_eq!(results, vec![false, false, false, false]);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(manager.recovery_attempts("save", &ctx), 3);

    let records = manager.error_log(10);
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|r| r.operation_type == "recovery-save"
            && r.error.message() == "recovery reported failure"));
}

#[tokio::test]
async fn test_plain_bool_recovery() {
    let manager = RecoveryManager::default();
    let ctx = cfg("cfg-7");

    assert!(!manager.attempt_recovery("save", &ctx, || async { false }).await);
    assert_eq!(manager.recovery_attempts("save", &ctx), 1);

    assert!(manager.attempt_recovery("save", &ctx, || async { true }).await);
    assert_eq!(manager.recovery_attempts("save", &ctx), 0);
    assert_eq!(manager.error_log_len(), 1);
}

#[test]
fn test_recovery_result_conversions() {
    assert!(true.into_recovery().is_ok());
    assert_eq!(
        false.into_recovery().unwrap_err().message(),
        "recovery reported failure"
    );
    assert!(Ok::<bool, OperationError>(true).into_recovery().is_ok());
    assert!(Ok::<bool, OperationError>(false).into_recovery().is_err());
    assert!(Ok::<(), OperationError>(()).into_recovery().is_ok());
    assert_eq!(
        Err::<bool, _>(OperationError::from("offline"))
            .into_recovery()
            .unwrap_err()
            .message(),
        "offline"
    );
}

#[test]
fn test_log_error_severity_from_kind() {
    let manager = RecoveryManager::default();

    let cases = [
        (ErrorKind::Fatal, Severity::Critical),
        (ErrorKind::Validation, Severity::High),
        (ErrorKind::Data, Severity::High),
        (ErrorKind::Network, Severity::Medium),
        (ErrorKind::Timeout, Severity::Medium),
        (ErrorKind::Cancelled, Severity::Low),
        (ErrorKind::Other, Severity::Low),
    ];
    for (kind, severity) in cases {
        let record = manager.log_error("save", &OperationError::new(kind, "x"), ErrorContext::new());
        assert_eq!(record.severity, severity, "kind {}", kind);
    }
}

#[test]
fn test_classified_errors_keep_legacy_severity() {
    let manager = RecoveryManager::default();

    let severities: Vec<Severity> = ["fatal crash", "bad data", "network down", "oops"]
        .into_iter()
        .map(|msg| {
            manager
                .log_error("save", &OperationError::classified(msg), ErrorContext::new())
                .severity
        })
        .collect();

    assert_eq!(
        severities,
        vec![
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low
        ]
    );
}

#[test]
fn test_error_log_evicts_oldest_beyond_capacity() {
    let manager = RecoveryManager::default();

    for n in 0..101 {
        manager.log_error("save", &OperationError::from(format!("error {}", n)), ErrorContext::new());
    }

    assert_eq!(manager.error_log_len(), 100);
    let all = manager.error_log(usize::MAX);
    assert_eq!(all.first().map(|r| r.error.message()), Some("error 100"));
    assert_eq!(all.last().map(|r| r.error.message()), Some("error 1"));
    assert_eq!(manager.recent_errors().len(), DEFAULT_ERROR_LOG_LIMIT);
}

#[test]
fn test_error_log_limit_and_clear() {
    let manager = RecoveryManager::new(RecoveryConfig::new().with_max_error_log_size(5));
    for n in 0..3 {
        manager.log_error("save", &OperationError::from(format!("e{}", n)), ErrorContext::new());
    }

    let two = manager.error_log(2);
    assert_eq!(two.len(), 2);
    assert_eq!(two[0].error.message(), "e2");
    assert!(two[0].timestamp >= two[1].timestamp);

    manager.clear_error_log();
    assert_eq!(manager.error_log_len(), 0);
    assert!(manager.error_log(10).is_empty());
}

#[tokio::test]
async fn test_clearing_journal_keeps_budgets() {
    let manager = RecoveryManager::default();
    let runs = AtomicU32::new(0);
    let ctx = cfg("cfg-6");

    manager.attempt_recovery("save", &ctx, failing(&runs)).await;
    manager.clear_error_log();

    assert_eq!(manager.recovery_attempts("save", &ctx), 1);
}

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    nickname: String,
    volume: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            nickname: "guest".to_string(),
            volume: 50,
        }
    }
}

impl Repair for Settings {
    fn repair(mut self) -> Self {
        if self.nickname == "explode" {
            panic!("cannot repair nickname");
        }
        if self.nickname.trim().is_empty() {
            self.nickname = "guest".to_string();
        }
        self.volume = self.volume.min(100);
        self
    }
}

#[test]
fn test_validate_and_repair() {
    let manager = RecoveryManager::default();

    assert_eq!(manager.validate_and_repair::<Settings>(None), Settings::default());

    let repaired = manager.validate_and_repair(Some(Settings {
        nickname: "  ".to_string(),
        volume: 200,
    }));
    assert_eq!(
        repaired,
        Settings {
            nickname: "guest".to_string(),
            volume: 100
        }
    );

    let valid = Settings {
        nickname: "alice".to_string(),
        volume: 10,
    };
    assert_eq!(manager.validate_and_repair(Some(valid.clone())), valid);
    assert_eq!(manager.error_log_len(), 0);
}

#[test]
fn test_panicking_repair_falls_back_to_default() {
    let manager = RecoveryManager::default();

    let repaired = manager.validate_and_repair(Some(Settings {
        nickname: "explode".to_string(),
        volume: 1,
    }));

    assert_eq!(repaired, Settings::default());
    let log = manager.error_log(1);
    assert_eq!(log[0].operation_type, "validate-and-repair");
    assert_eq!(log[0].error.message(), "repair panicked: cannot repair nickname");
}

#[tokio::test]
#[traced_test]
async fn test_exhausted_budget_is_logged() {
    let manager = RecoveryManager::new(RecoveryConfig::new().with_max_recovery_attempts(1));
    let runs = AtomicU32::new(0);
    let ctx = cfg("cfg-7");

    manager.attempt_recovery("save", &ctx, failing(&runs)).await;
    manager.attempt_recovery("save", &ctx, failing(&runs)).await;

    assert!(logs_contain("attempting recovery"));
    assert!(logs_contain("backup store unavailable"));
    assert!(logs_contain("no further recovery possible"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_recoveries_share_one_budget() {
    let manager = Arc::new(RecoveryManager::default());
    let runs = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                manager
                    .attempt_recovery("save", &cfg("shared"), || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Err::<(), _>(OperationError::from("still broken"))
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert!(!task.await.unwrap());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(manager.error_log_len(), 3);
}
