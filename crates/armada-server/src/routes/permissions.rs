//! `/api/{kind}/{id}/permissions`: one handler, dispatched on the HTTP method
//! through the core verb table.

use armada_core::permissions::{PermissionPayload, PermissionVerb};
use axum::extract::{Path, State};
use axum::http::Method;
use axum::Json;
use bytes::Bytes;
use serde_json::Value;

use super::{blocking, target};
use crate::auth::Actor;
use crate::error::AppError;
use crate::state::AppState;

pub async fn permissions(
    State(app): State<AppState>,
    method: Method,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let verb = PermissionVerb::from_method(method.as_str())
        .ok_or_else(|| AppError::bad_request(format!("{method} is not a permissions verb")))?;
    let target = target(&collection, id)?;
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        PermissionPayload::Empty
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(format!("invalid permissions body: {e}")))?
    };
    let evaluator = app.armada.permissions.clone();
    let list = blocking(move || evaluator.apply(verb, target, &who, payload)).await?;
    Ok(Json(serde_json::to_value(list)?))
}
