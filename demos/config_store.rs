//! Config Store Example
//!
//! A user-profile store that accepts one writer at a time, fronted by an
//! `OperationQueue`. Shows:
//! - optimistic counters updated before the write lands
//! - retries with linear backoff that keep submission order
//! - rollback of a write that never succeeds
//! - bounded recovery and the error journal afterwards
//!
//! Run with `cargo run --example config_store`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tidewater::prelude::*;

/// A profile write.
#[derive(Debug, Clone)]
struct Profile {
    id: String,
    nickname: String,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            id: "unknown".to_string(),
            nickname: "guest".to_string(),
        }
    }
}

impl Repair for Profile {
    fn repair(mut self) -> Self {
        if self.nickname.trim().is_empty() {
            self.nickname = format!("user-{}", self.id);
        }
        self
    }
}

/// A store that drops the first write it sees for each profile and
/// rejects writes for the `locked` profile outright.
#[derive(Clone, Default)]
struct FlakyStore {
    rows: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl FlakyStore {
    async fn write(&self, profile: Profile) -> Result<String, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        if profile.id == "locked" {
            return Err(OperationError::new(ErrorKind::Validation, "profile is locked"));
        }

        let first_time = {
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(&profile.id) {
                false
            } else {
                seen.push(profile.id.clone());
                true
            }
        };
        if first_time {
            return Err(OperationError::new(ErrorKind::Network, "connection reset"));
        }

        self.rows
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile.nickname.clone());
        Ok(profile.id)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("Config Store Example");
    println!("====================");

    let store = FlakyStore::default();
    let visible_profiles = Arc::new(Mutex::new(0i64));

    let queue: OperationQueue<Profile, i64, String> = OperationQueue::builder()
        .retry_policy(RetryPolicy::linear(Duration::from_millis(50)).with_max_retries(2))
        .on_apply({
            let visible = visible_profiles.clone();
            move |_: &str, delta: &i64| *visible.lock().unwrap() += delta
        })
        .on_success(|ty: &str, profile: &Profile, id: &String| {
            println!("  [{}] committed {} ({})", ty, id, profile.nickname)
        })
        .on_rollback({
            let visible = visible_profiles.clone();
            move |ty: &str, delta: &i64, err: &OperationError| {
                println!("  [{}] rolling back: {}", ty, err.message());
                *visible.lock().unwrap() -= delta
            }
        })
        .build();

    println!("\n=== Submitting writes ===");
    let writes: Vec<_> = [("p1", "alice"), ("locked", "mallory"), ("p2", "bob")]
        .into_iter()
        .map(|(id, nickname)| {
            let store = store.clone();
            let profile = Profile {
                id: id.to_string(),
                nickname: nickname.to_string(),
            };
            queue.enqueue(
                move |profile| {
                    let store = store.clone();
                    async move { store.write(profile).await }
                },
                "save-profile",
                profile,
                Some(1),
            )
        })
        .collect();

    println!(
        "  queued {} writes, {} visible optimistically",
        queue.len(),
        visible_profiles.lock().unwrap()
    );

    let recovery = RecoveryManager::default();
    for completion in writes {
        let id = completion.id();
        match completion.await {
            Ok(profile_id) => println!("  {} saved {}", id, profile_id),
            Err(err) => {
                println!("  {} failed: {}", id, err);
                let ctx = ErrorContext::new().with("config_id", "locked");
                let error = err.into_operation_error();
                recovery.log_error("save-profile", &error, ctx.clone());

                for _ in 0..4 {
                    let outcome = recovery
                        .try_recovery("save-profile", &ctx, || async {
                            Err::<(), _>(OperationError::from("backup store is read-only"))
                        })
                        .await;
                    println!("  recovery: {:?}", outcome.is_recovered());
                    if outcome.is_exhausted() {
                        println!("  no further recovery possible");
                    }
                }
            }
        }
    }

    println!("\n=== Results ===");
    println!("  store calls: {}", store.calls.load(Ordering::SeqCst));
    println!("  visible profiles: {}", visible_profiles.lock().unwrap());
    println!("  rows: {:?}", store.rows.lock().unwrap());

    println!("\n=== Error journal (newest first) ===");
    for record in recovery.error_log(10) {
        println!(
            "  {} [{}] {}: {}",
            record.timestamp.format("%H:%M:%S%.3f"),
            record.severity,
            record.operation_type,
            record.error.message()
        );
    }

    println!("\n=== Repairing a malformed profile ===");
    let repaired = recovery.validate_and_repair(Some(Profile {
        id: "p3".to_string(),
        nickname: "   ".to_string(),
    }));
    println!("  repaired nickname: {}", repaired.nickname);
    let fallback = recovery.validate_and_repair::<Profile>(None);
    println!("  missing profile falls back to: {:?}", fallback);
}
