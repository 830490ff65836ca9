pub mod config;
pub mod error;
pub mod state;
pub mod db;
pub mod models;
pub mod store;
pub mod authority;
pub mod token;
pub mod workflow;
pub mod worker;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::authority::MosipAuthorityClient;
use crate::config::Config;
use crate::state::SharedState;
use crate::store::PgStore;
use crate::token::OAuthTokenProvider;
use crate::workflow::{EngineSettings, WorkflowEngine};

/// Wire the production collaborators: PostgreSQL stores, the OAuth token
/// provider and the MOSIP authority client.
pub fn build_engine(pool: PgPool, config: &Config) -> Result<Arc<WorkflowEngine>, String> {
    let store = Arc::new(PgStore::new(pool));
    let tokens = Arc::new(OAuthTokenProvider::new(
        config.oauth.clone(),
        config.request_timeout,
    )?);
    let authority = Arc::new(MosipAuthorityClient::new(
        config.mosip_get_uin_url.clone(),
        config.request_timeout,
    )?);

    Ok(Arc::new(WorkflowEngine::new(
        store.clone(),
        store,
        tokens,
        authority,
        EngineSettings::from_config(config),
    )))
}

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
