#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;
use uuid::Uuid;

use idgen_worker::authority::{AuthorityError, IdentityAuthority};
use idgen_worker::models::{QueueEntry, Registrant};
use idgen_worker::store::{MemoryStore, QueueEntryStore, RegistrantStore};
use idgen_worker::token::{TokenError, TokenProvider};
use idgen_worker::workflow::{EngineSettings, WorkflowEngine};

// ── Stub collaborators ──────────────────────────────────────────

/// Token provider returning a fixed result and counting calls.
pub struct StubTokens {
    result: Result<String, String>,
    pub calls: AtomicUsize,
}

impl StubTokens {
    pub fn ok(token: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(token.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenProvider for StubTokens {
    async fn access_token(&self) -> Result<String, TokenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(TokenError::from)
    }
}

/// Authority answering from a script; once the script runs out it repeats
/// the fallback.
pub struct StubAuthority {
    script: Mutex<VecDeque<Result<String, AuthorityError>>>,
    fallback: Result<String, AuthorityError>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl StubAuthority {
    pub fn issuing(uin: &str) -> Arc<Self> {
        Self::build(VecDeque::new(), Ok(uin.to_string()), Duration::ZERO)
    }

    pub fn failing(err: AuthorityError) -> Arc<Self> {
        Self::build(VecDeque::new(), Err(err), Duration::ZERO)
    }

    pub fn scripted(
        script: Vec<Result<String, AuthorityError>>,
        fallback: Result<String, AuthorityError>,
    ) -> Arc<Self> {
        Self::build(script.into(), fallback, Duration::ZERO)
    }

    pub fn slow(uin: &str, delay: Duration) -> Arc<Self> {
        Self::build(VecDeque::new(), Ok(uin.to_string()), delay)
    }

    pub fn slow_failing(err: AuthorityError, delay: Duration) -> Arc<Self> {
        Self::build(VecDeque::new(), Err(err), delay)
    }

    fn build(
        script: VecDeque<Result<String, AuthorityError>>,
        fallback: Result<String, AuthorityError>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            fallback,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityAuthority for StubAuthority {
    async fn fetch_identifier(&self, _token: &str) -> Result<String, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().await.pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn server_error() -> AuthorityError {
    AuthorityError::Status {
        code: 503,
        body: "unavailable".to_string(),
    }
}

// ── Engine wiring ───────────────────────────────────────────────

pub fn settings(max_attempts: i32) -> EngineSettings {
    EngineSettings {
        max_attempts,
        request_timeout: Duration::from_secs(5),
        lease_duration: Duration::from_secs(60),
        logger_name: "idgen_worker_test".to_string(),
    }
}

pub fn engine_with<S>(
    store: &Arc<S>,
    tokens: Arc<dyn TokenProvider>,
    authority: Arc<dyn IdentityAuthority>,
    settings: EngineSettings,
) -> Arc<WorkflowEngine>
where
    S: QueueEntryStore + RegistrantStore + 'static,
{
    Arc::new(WorkflowEngine::new(
        store.clone(),
        store.clone(),
        tokens,
        authority,
        settings,
    ))
}

/// Memory store seeded with a pending queue entry and an unassigned registrant.
pub fn seeded_store(registrant_ids: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for id in registrant_ids {
        store.insert_queue_entry(QueueEntry::pending(*id));
        store.insert_registrant(Registrant::new(*id));
    }
    store
}

pub fn with_uin(id: &str, uin: &str) -> Registrant {
    Registrant {
        unique_id: Some(uin.to_string()),
        ..Registrant::new(id)
    }
}

// ── Local HTTP servers ──────────────────────────────────────────

/// Serve `router` on a random local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    addr
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ── PostgreSQL ──────────────────────────────────────────────────

/// A fresh, migrated database for one test.
pub struct TestDb {
    pub pool: PgPool,
    pub db_name: String,
}

fn admin_url(base_url: &str) -> String {
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.to_string())
}

pub async fn spawn_db() -> TestDb {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let db_name = format!("idgen_test_{}", Uuid::now_v7().to_string().replace('-', ""));

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    TestDb { pool, db_name }
}

/// Drop the test database after a test completes.
pub async fn cleanup(db: TestDb) {
    db.pool.close().await;

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!(
        "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
        db.db_name
    ))
    .execute(&admin_pool)
    .await;

    admin_pool.close().await;
}
