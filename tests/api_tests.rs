mod common;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::watch;

use common::{StubAuthority, StubTokens, engine_with, seeded_store, settings};
use idgen_worker::models::{QueueEntry, RequestStatus};
use idgen_worker::state::AppState;
use idgen_worker::store::MemoryStore;
use idgen_worker::worker::{self, TaskReceiver};

struct TestApp {
    base: String,
    client: Client,
    store: Arc<MemoryStore>,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn enqueue(&self, registrant_id: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/api/v1/tasks/id_generation_request_worker"))
            .json(&json!({ "registrant_id": registrant_id }))
            .send()
            .await
            .expect("enqueue request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    async fn queue_entry(&self, registrant_id: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(&format!("/api/v1/queue/{registrant_id}")))
            .send()
            .await
            .expect("queue entry request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

/// Spawn the HTTP surface over a memory store. The worker side of the task
/// queue is returned so tests decide whether a pool runs.
async fn spawn_app(store: Arc<MemoryStore>, capacity: usize) -> (TestApp, TaskReceiver) {
    let (tasks, receiver) = worker::task_queue(capacity);
    let state = Arc::new(AppState {
        queue: store.clone(),
        tasks,
    });
    let addr = common::serve(idgen_worker::build_app(state)).await;

    let app = TestApp {
        base: format!("http://{addr}"),
        client: Client::new(),
        store,
    };
    (app, receiver)
}

// ── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok() {
    let (app, _rx) = spawn_app(Arc::new(MemoryStore::new()), 4).await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

// ── Task intake ─────────────────────────────────────────────────

#[tokio::test]
async fn enqueue_accepts_registrant() {
    let (app, _rx) = spawn_app(seeded_store(&["1"]), 4).await;

    let (body, status) = app.enqueue("1").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], true);
}

#[tokio::test]
async fn enqueue_rejects_blank_registrant() {
    let (app, _rx) = spawn_app(seeded_store(&["1"]), 4).await;

    let (body, status) = app.enqueue("   ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("registrant_id"));
}

#[tokio::test]
async fn enqueue_rejects_padded_registrant() {
    let (app, _rx) = spawn_app(seeded_store(&["1"]), 4).await;

    let (body, status) = app.enqueue(" 1 ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("whitespace"));
}

#[tokio::test]
async fn enqueue_reports_full_queue() {
    let (app, _rx) = spawn_app(seeded_store(&["1", "2"]), 1).await;

    let (_, first) = app.enqueue("1").await;
    assert_eq!(first, StatusCode::ACCEPTED);

    let (body, second) = app.enqueue("2").await;
    assert_eq!(second, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("full"));
}

#[tokio::test]
async fn enqueue_without_workers_is_unavailable() {
    let (app, rx) = spawn_app(seeded_store(&["1"]), 4).await;
    drop(rx);

    let (_, status) = app.enqueue("1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ── Queue observation ───────────────────────────────────────────

#[tokio::test]
async fn queue_entry_not_found() {
    let (app, _rx) = spawn_app(Arc::new(MemoryStore::new()), 4).await;

    let (_, status) = app.queue_entry("missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_entry_exposes_bookkeeping() {
    let store = Arc::new(MemoryStore::new());
    let mut entry = QueueEntry::pending("7");
    entry.number_of_attempts_request = 2;
    entry.last_attempt_error_code_request = Some("MOSIP down".to_string());
    store.insert_queue_entry(entry);
    let (app, _rx) = spawn_app(store, 4).await;

    let (body, status) = app.queue_entry("7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registrant_id"], "7");
    assert_eq!(body["number_of_attempts_request"], 2);
    assert_eq!(body["request_status"], "PENDING");
    assert_eq!(body["last_attempt_error_code_request"], "MOSIP down");
    assert!(body.get("leased_by").is_none());
}

// ── End to end through the worker pool ──────────────────────────

#[tokio::test]
async fn queued_task_is_processed_by_worker_pool() {
    let store = seeded_store(&["1", "2"]);
    let (app, receiver) = spawn_app(store.clone(), 8).await;

    let engine = engine_with(
        &store,
        StubTokens::ok("tok"),
        StubAuthority::scripted(vec![Ok("U1".to_string())], Ok("U2".to_string())),
        settings(3),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = worker::run_pool(engine, receiver, shutdown_rx, 2).unwrap();

    assert_eq!(app.enqueue("1").await.1, StatusCode::ACCEPTED);
    assert_eq!(app.enqueue("2").await.1, StatusCode::ACCEPTED);

    let done = common::wait_until(Duration::from_secs(5), || {
        ["1", "2"].iter().all(|id| {
            app.store
                .queue_entry(id)
                .is_some_and(|e| e.request_status == RequestStatus::Completed)
        })
    })
    .await;
    assert!(done, "worker pool did not complete both requests");

    let (body, _) = app.queue_entry("1").await;
    assert_eq!(body["request_status"], "COMPLETED");
    assert_eq!(body["update_status"], "PENDING");

    let mut uins: Vec<_> = ["1", "2"]
        .iter()
        .filter_map(|id| app.store.registrant(id).and_then(|r| r.unique_id))
        .collect();
    uins.sort();
    assert_eq!(uins, vec!["U1".to_string(), "U2".to_string()]);

    shutdown_tx.send(true).unwrap();
    tokio::task::spawn_blocking(move || pool.join())
        .await
        .unwrap()
        .unwrap();
}
