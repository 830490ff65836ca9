pub mod tasks;

use axum::Router;
use axum::routing::{get, post};

use crate::state::SharedState;
use crate::worker::TASK_NAME;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route(&format!("/api/v1/tasks/{TASK_NAME}"), post(tasks::enqueue))
        .route("/api/v1/queue/{registrant_id}", get(tasks::queue_entry))
}
