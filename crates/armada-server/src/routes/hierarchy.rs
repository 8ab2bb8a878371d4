use armada_core::types::EntityKind;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use super::{blocking, target_of};
use crate::auth::Actor;
use crate::error::AppError;
use crate::state::AppState;

const HOST_CONTAINERS: &[EntityKind] = &[EntityKind::Group, EntityKind::Inventory];

/// Body of every link request.
#[derive(Debug, Deserialize)]
pub struct MemberBody {
    pub id: u64,
}

fn unlinked(removed: bool) -> Result<StatusCode, AppError> {
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("no such member"))
    }
}

/// POST /api/groups/{id}/subgroups
pub async fn add_subgroup(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<MemberBody>,
) -> Result<StatusCode, AppError> {
    target_of(&collection, id, &[EntityKind::Group])?;
    let catalog = app.armada.catalog.clone();
    blocking(move || catalog.add_subgroup(&who, id, body.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/groups/{id}/subgroups/{child}
pub async fn remove_subgroup(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id, child)): Path<(String, u64, u64)>,
) -> Result<StatusCode, AppError> {
    target_of(&collection, id, &[EntityKind::Group])?;
    let catalog = app.armada.catalog.clone();
    unlinked(blocking(move || catalog.remove_subgroup(&who, id, child)).await?)
}

/// POST /api/{groups|inventories}/{id}/hosts
pub async fn add_host(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<MemberBody>,
) -> Result<StatusCode, AppError> {
    let container = target_of(&collection, id, HOST_CONTAINERS)?;
    let catalog = app.armada.catalog.clone();
    blocking(move || catalog.add_host(&who, container, body.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/{groups|inventories}/{id}/hosts/{host}
pub async fn remove_host(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id, host)): Path<(String, u64, u64)>,
) -> Result<StatusCode, AppError> {
    let container = target_of(&collection, id, HOST_CONTAINERS)?;
    let catalog = app.armada.catalog.clone();
    unlinked(blocking(move || catalog.remove_host(&who, container, host)).await?)
}

/// POST /api/inventories/{id}/groups
pub async fn add_group(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<MemberBody>,
) -> Result<StatusCode, AppError> {
    target_of(&collection, id, &[EntityKind::Inventory])?;
    let catalog = app.armada.catalog.clone();
    blocking(move || catalog.add_group(&who, id, body.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/inventories/{id}/groups/{group}
pub async fn remove_group(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id, group)): Path<(String, u64, u64)>,
) -> Result<StatusCode, AppError> {
    target_of(&collection, id, &[EntityKind::Inventory])?;
    let catalog = app.armada.catalog.clone();
    unlinked(blocking(move || catalog.remove_group(&who, id, group)).await?)
}

/// POST /api/projects/{id}/inventories
pub async fn attach_inventory(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<MemberBody>,
) -> Result<StatusCode, AppError> {
    target_of(&collection, id, &[EntityKind::Project])?;
    let catalog = app.armada.catalog.clone();
    blocking(move || catalog.attach_inventory(&who, id, body.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/projects/{id}/inventories/{inventory}
pub async fn detach_inventory(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id, inventory)): Path<(String, u64, u64)>,
) -> Result<StatusCode, AppError> {
    target_of(&collection, id, &[EntityKind::Project])?;
    let catalog = app.armada.catalog.clone();
    unlinked(blocking(move || catalog.detach_inventory(&who, id, inventory)).await?)
}

/// GET /api/{groups|inventories}/{id}/all_hosts
pub async fn all_hosts(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
) -> Result<Json<Value>, AppError> {
    let container = target_of(&collection, id, HOST_CONTAINERS)?;
    let catalog = app.armada.catalog.clone();
    let hosts = blocking(move || catalog.all_hosts(&who, container)).await?;
    Ok(Json(Value::Array(hosts)))
}
