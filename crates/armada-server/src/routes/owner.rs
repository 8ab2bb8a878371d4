use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{blocking, target};
use crate::auth::Actor;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetOwnerBody {
    pub owner: u64,
}

/// GET /api/{kind}/{id}/owner
pub async fn get_owner(
    State(app): State<AppState>,
    Actor(_who): Actor,
    Path((collection, id)): Path<(String, u64)>,
) -> Result<Json<Value>, AppError> {
    let target = target(&collection, id)?;
    let evaluator = app.armada.permissions.clone();
    let owner = blocking(move || evaluator.get_owner(target)).await?;
    Ok(Json(json!({ "owner": owner })))
}

/// PUT /api/{kind}/{id}/owner hands over ownership. Only the current owner may do this.
pub async fn set_owner(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<SetOwnerBody>,
) -> Result<Json<Value>, AppError> {
    let target = target(&collection, id)?;
    let evaluator = app.armada.permissions.clone();
    let owner = blocking(move || evaluator.set_owner(target, &who, body.owner)).await?;
    Ok(Json(json!({ "owner": owner })))
}
