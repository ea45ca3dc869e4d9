//! Integration tests for throttle handling: retry budgets, backoff toward
//! the quota window, restriction episodes, and failure isolation between
//! queued callers.

mod support;

use std::sync::atomic::Ordering::SeqCst;
use std::time::Duration;

use serde_json::json;
use storage_rocket::{BackendError, RocketError, StorageRocket, UploadOptions, ValueCodec};
use support::MockBackend;

/// Verifies that throttled writes are retried across quota-window backoffs
/// and succeed once the backend stops throttling.
///
/// # Test Steps
/// 1. Script two throttle failures on the write path
/// 2. Set a value with an attempt budget of five
/// 3. Expect success after exactly three backend calls, with at least two
///    full backoff delays of paused time consumed
#[tokio::test(start_paused = true)]
async fn test_throttled_write_retries_then_succeeds() {
    support::init_tracing();
    let backend = MockBackend::new();
    backend.throttle_writes(2);
    let rocket = StorageRocket::new(backend.clone());

    let started = tokio::time::Instant::now();
    rocket
        .set("k", json!("durable"), Some(UploadOptions::new().max_attempts(5)))
        .await
        .unwrap();

    assert_eq!(backend.set_calls.load(SeqCst), 3);
    // Two retries, each aimed at the capped window boundary.
    assert!(started.elapsed() >= Duration::from_secs(90));
    assert_eq!(ValueCodec::default().decode(&backend.value_of("k").unwrap()), json!("durable"));

    rocket.shutdown();
}

/// Verifies that a persistently throttled write burns its whole attempt
/// budget and rejects with the write-exhaustion error, making no further
/// calls afterwards.
#[tokio::test(start_paused = true)]
async fn test_throttled_write_exhausts_attempt_budget() {
    let backend = MockBackend::new();
    backend.throttle_writes(10);
    let rocket = StorageRocket::new(backend.clone());

    let error = rocket
        .set("k", json!(1), Some(UploadOptions::new().max_attempts(3)))
        .await
        .unwrap_err();

    assert!(matches!(error, RocketError::WriteAttemptsExhausted));
    assert_eq!(backend.set_calls.load(SeqCst), 3);

    // The group is gone; nothing keeps retrying.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(backend.set_calls.load(SeqCst), 3);

    rocket.shutdown();
}

/// Verifies that a non-throttle backend failure surfaces immediately: one
/// call, no backoff, no retries.
#[tokio::test(start_paused = true)]
async fn test_backend_failure_surfaces_immediately() {
    let backend = MockBackend::new();
    backend.fail_writes([BackendError::other("storage space corrupted")]);
    let rocket = StorageRocket::new(backend.clone());

    let started = tokio::time::Instant::now();
    let error = rocket.set("k", json!(1), None).await.unwrap_err();

    assert!(matches!(error, RocketError::Backend(ref e) if !e.is_throttled()));
    assert_eq!(backend.set_calls.load(SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));

    rocket.shutdown();
}

/// Verifies failure isolation inside one write group: the failure rejects a
/// single caller while the remaining one retries and succeeds.
///
/// # Test Steps
/// 1. Hold writes open and queue two sets on the same key
/// 2. Fail the in-flight call with a non-throttle error; the newest caller
///    is rejected
/// 3. The surviving caller's operation re-runs and succeeds
#[tokio::test(start_paused = true)]
async fn test_rejected_caller_does_not_sink_its_sibling() {
    let backend = MockBackend::new();
    let rocket = StorageRocket::new(backend.clone());

    backend.hold_writes();
    let older = tokio::spawn({
        let rocket = rocket.clone();
        async move { rocket.set("k", json!("old"), None).await }
    });
    // Let the first write enter the backend before queueing the second.
    for _ in 0..50 {
        if backend.set_calls.load(SeqCst) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(backend.set_calls.load(SeqCst), 1);

    let newer = tokio::spawn({
        let rocket = rocket.clone();
        async move { rocket.set("k", json!("new"), None).await }
    });
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }

    backend.fail_writes([BackendError::other("write rejected")]);
    backend.release_writes();

    let newer_result = newer.await.unwrap();
    assert!(matches!(newer_result, Err(RocketError::Backend(_))));

    let older_result = older.await.unwrap();
    assert!(older_result.is_ok());
    assert_eq!(backend.set_calls.load(SeqCst), 2);
    assert_eq!(ValueCodec::default().decode(&backend.value_of("k").unwrap()), json!("old"));

    rocket.shutdown();
}

/// Verifies that throttled reads follow the same budget discipline as
/// writes and reject with the read-exhaustion error.
#[tokio::test(start_paused = true)]
async fn test_throttled_read_exhausts_attempt_budget() {
    let backend = MockBackend::new();
    backend.throttle_reads(5);
    let rocket = StorageRocket::new(backend.clone());

    let error = rocket.get("cold", Some(2)).await.unwrap_err();

    assert!(matches!(error, RocketError::ReadAttemptsExhausted));
    assert_eq!(backend.get_calls.load(SeqCst), 2);
    assert!(!rocket.cache().contains("cold"));

    rocket.shutdown();
}

/// Verifies that a throttled read recovers within its budget once the
/// backend relents, and the value lands in the cache.
#[tokio::test(start_paused = true)]
async fn test_throttled_read_recovers_within_budget() {
    let backend = MockBackend::new();
    backend.insert_raw("k", ValueCodec::default().encode(&json!("eventually")));
    backend.throttle_reads(1);
    let rocket = StorageRocket::new(backend.clone());

    let value = rocket.get("k", Some(3)).await.unwrap();

    assert_eq!(value, Some(json!("eventually")));
    assert_eq!(backend.get_calls.load(SeqCst), 2);
    assert_eq!(rocket.cache().is_synchronized("k"), Some(true));

    rocket.shutdown();
}

/// Verifies that a restriction episode spanning several keys ends once any
/// write succeeds, after which every queued group settles.
#[tokio::test(start_paused = true)]
async fn test_restriction_episode_ends_and_all_groups_settle() {
    let backend = MockBackend::new();
    backend.throttle_writes(2);
    let rocket = StorageRocket::new(backend.clone());

    let (first, second) = tokio::join!(
        rocket.set("k1", json!("a"), Some(UploadOptions::new().max_attempts(5))),
        rocket.set("k2", json!("b"), Some(UploadOptions::new().max_attempts(5))),
    );

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(backend.set_calls.load(SeqCst), 4);
    assert_eq!(ValueCodec::default().decode(&backend.value_of("k1").unwrap()), json!("a"));
    assert_eq!(ValueCodec::default().decode(&backend.value_of("k2").unwrap()), json!("b"));

    rocket.shutdown();
}

/// Verifies that read-side and write-side restriction episodes are tracked
/// independently: a throttled write path does not delay cold reads.
#[tokio::test(start_paused = true)]
async fn test_read_and_write_restrictions_are_independent() {
    let backend = MockBackend::new();
    backend.insert_raw("cold", ValueCodec::default().encode(&json!("fresh")));
    backend.throttle_writes(1);
    let rocket = StorageRocket::new(backend.clone());

    let write = tokio::spawn({
        let rocket = rocket.clone();
        async move { rocket.set("k", json!(1), Some(UploadOptions::new().max_attempts(2))).await }
    });

    // The cold read proceeds while the write direction is backing off.
    let started = tokio::time::Instant::now();
    let value = rocket.get("cold", None).await.unwrap();
    assert_eq!(value, Some(json!("fresh")));
    assert!(started.elapsed() < Duration::from_secs(1));

    write.await.unwrap().unwrap();
    assert_eq!(backend.set_calls.load(SeqCst), 2);

    rocket.shutdown();
}
