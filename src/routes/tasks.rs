use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::AppError;
use crate::models::QueueEntry;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct EnqueueTask {
    pub registrant_id: String,
}

/// Hand a registrant id to the worker pool. The outcome is only observable
/// through the queue entry.
pub async fn enqueue(
    State(state): State<SharedState>,
    Json(req): Json<EnqueueTask>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let registrant_id = req.registrant_id.as_str();
    if registrant_id.trim().is_empty() {
        return Err(AppError::BadRequest("registrant_id is required".to_string()));
    }
    if registrant_id.trim() != registrant_id {
        return Err(AppError::BadRequest(
            "registrant_id must not have leading or trailing whitespace".to_string(),
        ));
    }

    state
        .tasks
        .try_enqueue(registrant_id.to_string())
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    tracing::debug!("Queued ID generation request for registrant_id {registrant_id}");
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true }))))
}

pub async fn queue_entry(
    State(state): State<SharedState>,
    Path(registrant_id): Path<String>,
) -> Result<Json<QueueEntry>, AppError> {
    let entry = state
        .queue
        .find(&registrant_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue entry not found".to_string()))?;
    Ok(Json(entry))
}
