use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::{blocking, target};
use crate::auth::Actor;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetVariableBody {
    pub key: String,
    pub value: Value,
}

/// GET /api/{kind}/{id}/variables, masked.
pub async fn list_variables(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
) -> Result<Json<Value>, AppError> {
    let target = target(&collection, id)?;
    let catalog = app.armada.catalog.clone();
    let vars = blocking(move || catalog.variables(&who, target)).await?;
    Ok(Json(serde_json::to_value(vars)?))
}

/// POST /api/{kind}/{id}/variables
pub async fn set_variable(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<SetVariableBody>,
) -> Result<StatusCode, AppError> {
    let target = target(&collection, id)?;
    let catalog = app.armada.catalog.clone();
    blocking(move || catalog.set_variable(&who, target, &body.key, body.value)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/{kind}/{id}/variables/{key}
pub async fn remove_variable(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id, key)): Path<(String, u64, String)>,
) -> Result<StatusCode, AppError> {
    let target = target(&collection, id)?;
    let catalog = app.armada.catalog.clone();
    let removed = blocking(move || catalog.remove_variable(&who, target, &key)).await?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("{target} has no such variable")))
    }
}
