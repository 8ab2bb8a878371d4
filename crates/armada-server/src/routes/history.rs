use armada_core::types::EntityKind;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use super::{blocking, target_of};
use crate::auth::Actor;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/projects/{id}/history, newest first.
pub async fn project_history(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
) -> Result<Json<Value>, AppError> {
    target_of(&collection, id, &[EntityKind::Project])?;
    let catalog = app.armada.catalog.clone();
    let list = blocking(move || catalog.project_history(&who, id)).await?;
    Ok(Json(Value::Array(list)))
}

/// POST /api/history/{id}/cancel is accepted. The record changes when the
/// engine reports back.
pub async fn cancel(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
) -> Result<StatusCode, AppError> {
    target_of(&collection, id, &[EntityKind::History])?;
    let dispatcher = app.armada.dispatcher.clone();
    blocking(move || dispatcher.cancel(&who, id)).await?;
    Ok(StatusCode::ACCEPTED)
}
