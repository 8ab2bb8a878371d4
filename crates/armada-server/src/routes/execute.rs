use armada_core::dispatch::ExecuteRequest;
use armada_core::history::RunKind;
use armada_core::template::InventorySource;
use armada_core::types::EntityKind;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{blocking, target_of};
use crate::auth::Actor;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunBody {
    /// Playbook path or module name.
    pub target: String,
    /// An inventory id, or inline inventory text.
    pub inventory: Value,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TemplateRunBody {
    #[serde(default)]
    pub option: Option<String>,
}

fn created(history_id: u64) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(json!({ "history_id": history_id })))
}

async fn run_project(
    app: AppState,
    who: armada_core::identity::Identity,
    collection: String,
    id: u64,
    kind: RunKind,
    body: RunBody,
) -> Result<(StatusCode, Json<Value>), AppError> {
    target_of(&collection, id, &[EntityKind::Project])?;
    let req = ExecuteRequest {
        kind,
        target: body.target,
        inventory: InventorySource::parse(&body.inventory)?,
        options: body.options,
    };
    let dispatcher = app.armada.dispatcher.clone();
    let history_id = blocking(move || dispatcher.execute(&who, id, req)).await?;
    Ok(created(history_id))
}

/// POST /api/projects/{id}/execute_playbook
pub async fn execute_playbook(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<RunBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    run_project(app, who, collection, id, RunKind::Playbook, body).await
}

/// POST /api/projects/{id}/execute_module
pub async fn execute_module(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<RunBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    run_project(app, who, collection, id, RunKind::Module, body).await
}

/// POST /api/{templates|periodic_tasks}/{id}/execute
pub async fn execute(
    State(app): State<AppState>,
    Actor(who): Actor,
    Path((collection, id)): Path<(String, u64)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let target = target_of(
        &collection,
        id,
        &[EntityKind::Template, EntityKind::PeriodicTask],
    )?;
    let dispatcher = app.armada.dispatcher.clone();
    let history_id = if target.kind == EntityKind::Template {
        let body: TemplateRunBody = if body.iter().all(u8::is_ascii_whitespace) {
            TemplateRunBody::default()
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| AppError::bad_request(format!("invalid body: {e}")))?
        };
        blocking(move || dispatcher.execute_template(&who, id, body.option.as_deref())).await?
    } else {
        blocking(move || dispatcher.execute_periodic_task(&who, id)).await?
    };
    Ok(created(history_id))
}
