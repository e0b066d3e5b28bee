// SPDX-License-Identifier: PMPL-1.0-or-later
//! Queue intake end to end: queue -> dispatcher -> result cache.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docrelay_broker::{
    CompletionHook, Dispatcher, DropReason, HookError, InMemoryQueue, IntakeConfig, IntakeError, IntakeLoop,
    MessageOutcome, MessageQueue,
};
use docrelay_cache::{
    CacheBackend, CacheError, InMemoryCache, OperationResult, OperationStatus, ResultCache, MAX_RESULT_TTL,
};
use docrelay_store::{DocumentStore, InMemoryDriver, StoreConfig};
use serde_json::json;
use tokio::sync::{watch, Mutex};

struct Harness {
    queue: Arc<InMemoryQueue>,
    backend: Arc<InMemoryCache>,
    results: ResultCache,
    intake: IntakeLoop,
}

fn config() -> IntakeConfig {
    IntakeConfig {
        max_messages: 10,
        wait_time: Duration::ZERO,
        error_backoff: Duration::from_millis(10),
    }
}

fn harness() -> Harness {
    harness_with(config())
}

fn harness_with(config: IntakeConfig) -> Harness {
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30)));
    let backend = Arc::new(InMemoryCache::new());
    let results = ResultCache::new(backend.clone(), Duration::from_secs(300));
    let dispatcher = Arc::new(Dispatcher::new(DocumentStore::new(
        Arc::new(InMemoryDriver::new()),
        StoreConfig::default(),
    )));
    let intake = IntakeLoop::new(queue.clone(), dispatcher, results.clone(), config);
    Harness {
        queue,
        backend,
        results,
        intake,
    }
}

#[tokio::test]
async fn set_new_result_is_cached_under_correlation_id() {
    let h = harness();
    h.queue
        .send(
            json!({
                "action": "setNew",
                "payload": {"dbName": "d", "collection": "c", "data": {"x": 1}},
                "correlationId": "abc",
            })
            .to_string(),
        )
        .await
        .unwrap();

    let report = h.intake.poll_once().await.unwrap();
    assert_eq!((report.received, report.completed), (1, 1));
    assert_eq!(h.queue.in_flight_len().await, 0);

    let stored = h.results.get("abc").await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Success);
    let data = stored.data.unwrap();
    assert_eq!(data["x"], 1);
    assert_eq!(data["_id"].as_str().map(str::len), Some(24));
}

#[tokio::test]
async fn unknown_action_caches_an_error_result() {
    let h = harness();
    h.queue
        .send(json!({"action": "unknownAction", "payload": {}, "correlationId": "xyz"}).to_string())
        .await
        .unwrap();
    h.intake.poll_once().await.unwrap();

    assert_eq!(
        h.results.get("xyz").await.unwrap(),
        Some(OperationResult::failure("Action 'unknownAction' not found or is not valid."))
    );
}

#[tokio::test]
async fn messages_without_correlation_id_are_dropped_silently() {
    let h = harness();
    h.queue
        .send(json!({"action": "setNew", "payload": {"dbName": "d", "collection": "c", "data": {}}}).to_string())
        .await
        .unwrap();
    h.queue.send("{not json".to_string()).await.unwrap();

    let report = h.intake.poll_once().await.unwrap();
    assert_eq!((report.received, report.dropped), (2, 2));
    assert_eq!(h.backend.stats().await.entries, 0);
    assert_eq!(h.queue.in_flight_len().await, 0);
}

#[tokio::test]
async fn process_message_reports_drop_reasons() {
    let h = harness();
    assert_eq!(
        h.intake.process_message(r#"{"action": "get", "correlationId": ""}"#).await.unwrap(),
        MessageOutcome::Dropped(DropReason::MissingCorrelationId)
    );
    assert!(matches!(
        h.intake.process_message("[").await.unwrap(),
        MessageOutcome::Dropped(DropReason::Unparseable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn per_request_ttl_overrides_the_default() {
    let h = harness();
    h.intake
        .process_message(&json!({"action": "nope", "correlationId": "short", "ttl": 5}).to_string())
        .await
        .unwrap();
    assert!(h.results.get("short").await.unwrap().is_some());
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(h.results.get("short").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn ttl_beyond_any_deadline_is_capped_not_fatal() {
    let h = harness();
    let body = json!({"action": "nope", "correlationId": "huge", "ttl": u64::MAX}).to_string();
    let intake = Arc::new(h.intake);
    let task = tokio::spawn({
        let intake = intake.clone();
        async move { intake.process_message(&body).await }
    });

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { .. }));
    tokio::time::advance(MAX_RESULT_TTL - Duration::from_secs(1)).await;
    assert!(h.results.get("huge").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn fractional_ttl_is_honoured() {
    let h = harness();
    h.intake
        .process_message(&json!({"action": "nope", "correlationId": "frac", "ttl": 1.5}).to_string())
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(h.results.get("frac").await.unwrap().is_some());
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(h.results.get("frac").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn invalid_ttl_falls_back_to_the_default() {
    let h = harness();
    for (id, ttl) in [("neg", json!(-5)), ("word", json!("soon")), ("obj", json!({"s": 1})), ("zero", json!(0))] {
        let outcome = h
            .intake
            .process_message(&json!({"action": "nope", "correlationId": id, "ttl": ttl}).to_string())
            .await
            .unwrap();
        assert!(matches!(outcome, MessageOutcome::Completed { .. }), "{id}");
    }
    tokio::time::advance(Duration::from_secs(299)).await;
    for id in ["neg", "word", "obj", "zero"] {
        assert!(h.results.get(id).await.unwrap().is_some(), "{id}");
    }
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(h.results.get("neg").await.unwrap().is_none());
}

#[tokio::test]
async fn non_string_action_caches_an_unknown_action_error() {
    let h = harness();
    let outcome = h
        .intake
        .process_message(&json!({"action": 42, "correlationId": "numeric"}).to_string())
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { success: false, .. }));
    assert_eq!(
        h.results.get("numeric").await.unwrap(),
        Some(OperationResult::failure("Action '42' not found or is not valid."))
    );
}

#[tokio::test]
async fn non_object_body_is_unparseable() {
    let h = harness();
    assert!(matches!(
        h.intake.process_message("[1, 2]").await.unwrap(),
        MessageOutcome::Dropped(DropReason::Unparseable(_))
    ));
}

#[tokio::test]
async fn batch_messages_are_all_processed() {
    let h = harness();
    for n in 0..5 {
        h.queue
            .send(
                json!({
                    "action": "setNew",
                    "payload": {"dbName": "d", "collection": "c", "data": {"n": n}},
                    "correlationId": format!("req-{n}"),
                })
                .to_string(),
            )
            .await
            .unwrap();
    }
    let report = h.intake.poll_once().await.unwrap();
    assert_eq!(report.completed, 5);
    for n in 0..5 {
        let stored = h.results.get(&format!("req-{n}")).await.unwrap().unwrap();
        assert_eq!(stored.data.unwrap()["n"], n);
    }
}

/// Fails every write until switched on.
struct FlakyCache {
    inner: InMemoryCache,
    healthy: AtomicBool,
}

#[async_trait]
impl CacheBackend for FlakyCache {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(CacheError::backend("flaky", "connection reset"));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.delete(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn failed_cache_write_leaves_message_for_redelivery() {
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30)));
    let backend = Arc::new(FlakyCache {
        inner: InMemoryCache::new(),
        healthy: AtomicBool::new(false),
    });
    let results = ResultCache::new(backend.clone(), Duration::from_secs(300));
    let dispatcher = Arc::new(Dispatcher::new(DocumentStore::new(
        Arc::new(InMemoryDriver::new()),
        StoreConfig::default(),
    )));
    let intake = IntakeLoop::new(queue.clone(), dispatcher, results.clone(), config());

    let body = json!({"action": "unknownAction", "correlationId": "retry-me"}).to_string();
    assert!(matches!(
        intake.process_message(&body).await,
        Err(IntakeError::CacheWrite { .. })
    ));

    queue.send(body).await.unwrap();
    let report = intake.poll_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(queue.in_flight_len().await, 1);

    backend.healthy.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(30)).await;
    let report = intake.poll_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(queue.in_flight_len().await, 0);
    assert!(results.get("retry-me").await.unwrap().is_some());
}

/// Records every notification.
#[derive(Default)]
struct RecordingHook {
    seen: Mutex<Vec<(String, OperationResult)>>,
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_complete(&self, correlation_id: &str, result: &OperationResult) -> Result<(), HookError> {
        self.seen.lock().await.push((correlation_id.to_string(), result.clone()));
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HookError::Status(500))
    }
}

#[tokio::test]
async fn completion_hook_sees_result_and_its_failure_is_ignored() {
    let h = harness();
    let hook = Arc::new(RecordingHook::default());
    let intake = h.intake.with_hook(hook.clone());

    let outcome = intake
        .process_message(&json!({"action": "nope", "correlationId": "hooked"}).to_string())
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { success: false, .. }));

    for _ in 0..100 {
        if hook.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    let seen = hook.seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "hooked");
    assert_eq!(Some(seen[0].1.clone()), h.results.get("hooked").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_loop_stops_on_shutdown_signal() {
    let h = harness_with(IntakeConfig {
        wait_time: Duration::from_millis(50),
        ..config()
    });
    h.queue
        .send(json!({"action": "nope", "correlationId": "looped"}).to_string())
        .await
        .unwrap();

    let (stop, signal) = watch::channel(false);
    let task = tokio::spawn(h.intake.run(signal));

    for _ in 0..200 {
        if h.results.get("looped").await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.results.get("looped").await.unwrap().is_some());

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}
