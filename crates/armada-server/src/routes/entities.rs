use armada_core::catalog::{NewGroup, NewHost, NewInventory, NewPeriodicTask, NewProject, NewTemplate, Patch};
use armada_core::entity::Entity;
use armada_core::types::EntityKind;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{blocking, kind, target};
use crate::auth::Actor;
use crate::error::AppError;
use crate::state::AppState;

fn body<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    serde_json::from_value(value).map_err(|e| AppError::bad_request(format!("invalid body: {e}")))
}

/// GET /api/{kind} lists every entity of the kind visible to the caller.
pub async fn list(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path(collection): Path<String>,
) -> Result<Json<Value>, AppError> {
    let kind = kind(&collection)?;
    let catalog = app.armada.catalog.clone();
    let list = blocking(move || catalog.list(&who, kind)).await?;
    Ok(Json(Value::Array(list)))
}

/// POST /api/{kind} creates; the caller becomes the owner.
pub async fn create(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path(collection): Path<String>,
    Json(input): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let catalog = app.armada.catalog.clone();
    let view = match kind(&collection)? {
        EntityKind::Host => {
            let input: NewHost = body(input)?;
            blocking(move || catalog.create_host(&who, input).map(|e| e.view())).await?
        }
        EntityKind::Group => {
            let input: NewGroup = body(input)?;
            blocking(move || catalog.create_group(&who, input).map(|e| e.view())).await?
        }
        EntityKind::Inventory => {
            let input: NewInventory = body(input)?;
            blocking(move || catalog.create_inventory(&who, input).map(|e| e.view())).await?
        }
        EntityKind::Project => {
            let input: NewProject = body(input)?;
            blocking(move || catalog.create_project(&who, input).map(|e| e.view())).await?
        }
        EntityKind::Template => {
            let input: NewTemplate = body(input)?;
            blocking(move || catalog.create_template(&who, input).map(|e| e.view())).await?
        }
        EntityKind::PeriodicTask => {
            let input: NewPeriodicTask = body(input)?;
            blocking(move || catalog.create_periodic_task(&who, input).map(|e| e.view())).await?
        }
        EntityKind::History => {
            return Err(AppError::bad_request(
                "history records are created by executing a project, template or periodic task",
            ))
        }
    };
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/{kind}/{id}
pub async fn get(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
) -> Result<Json<Value>, AppError> {
    let target = target(&collection, id)?;
    let catalog = app.armada.catalog.clone();
    let view = blocking(move || catalog.get(&who, target)).await?;
    Ok(Json(view))
}

/// PATCH /api/{kind}/{id}
pub async fn update(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(patch): Json<Patch>,
) -> Result<Json<Value>, AppError> {
    let target = target(&collection, id)?;
    let catalog = app.armada.catalog.clone();
    let view = blocking(move || catalog.update(&who, target, patch)).await?;
    Ok(Json(view))
}

/// DELETE /api/{kind}/{id}
pub async fn delete(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
) -> Result<StatusCode, AppError> {
    let target = target(&collection, id)?;
    let catalog = app.armada.catalog.clone();
    blocking(move || catalog.delete(&who, target)).await?;
    Ok(StatusCode::NO_CONTENT)
}
