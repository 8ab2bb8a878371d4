pub mod auth;
pub mod engine;
pub mod error;
pub mod routes;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;

use armada_core::config::Config;
use armada_core::hooks::HookRegistry;
use armada_core::Armada;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::{spawn_completion_loop, ProcessEngine};
use crate::state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Entities
        .route(
            "/api/{kind}",
            get(routes::entities::list).post(routes::entities::create),
        )
        .route(
            "/api/{kind}/{id}",
            get(routes::entities::get)
                .patch(routes::entities::update)
                .delete(routes::entities::delete),
        )
        // Permissions
        .route(
            "/api/{kind}/{id}/permissions",
            get(routes::permissions::permissions)
                .put(routes::permissions::permissions)
                .post(routes::permissions::permissions)
                .delete(routes::permissions::permissions),
        )
        .route(
            "/api/{kind}/{id}/owner",
            get(routes::owner::get_owner).put(routes::owner::set_owner),
        )
        // Variables
        .route(
            "/api/{kind}/{id}/variables",
            get(routes::variables::list_variables).post(routes::variables::set_variable),
        )
        .route(
            "/api/{kind}/{id}/variables/{key}",
            delete(routes::variables::remove_variable),
        )
        // Hierarchy
        .route(
            "/api/{kind}/{id}/subgroups",
            post(routes::hierarchy::add_subgroup),
        )
        .route(
            "/api/{kind}/{id}/subgroups/{child}",
            delete(routes::hierarchy::remove_subgroup),
        )
        .route("/api/{kind}/{id}/hosts", post(routes::hierarchy::add_host))
        .route(
            "/api/{kind}/{id}/hosts/{host}",
            delete(routes::hierarchy::remove_host),
        )
        .route("/api/{kind}/{id}/groups", post(routes::hierarchy::add_group))
        .route(
            "/api/{kind}/{id}/groups/{group}",
            delete(routes::hierarchy::remove_group),
        )
        .route(
            "/api/{kind}/{id}/inventories",
            post(routes::hierarchy::attach_inventory),
        )
        .route(
            "/api/{kind}/{id}/inventories/{inventory}",
            delete(routes::hierarchy::detach_inventory),
        )
        .route(
            "/api/{kind}/{id}/all_hosts",
            get(routes::hierarchy::all_hosts),
        )
        // Execution
        .route(
            "/api/{kind}/{id}/execute_playbook",
            post(routes::execute::execute_playbook),
        )
        .route(
            "/api/{kind}/{id}/execute_module",
            post(routes::execute::execute_module),
        )
        .route("/api/{kind}/{id}/execute", post(routes::execute::execute))
        // History
        .route(
            "/api/{kind}/{id}/history",
            get(routes::history::project_history),
        )
        .route("/api/{kind}/{id}/cancel", post(routes::history::cancel))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the store under `root`, start the process engine and recover runs
/// left RUNNING by a previous process.
fn open_state(root: PathBuf, config: &Config) -> anyhow::Result<AppState> {
    let (engine, completions) = ProcessEngine::new(&root, &config.engine);
    let armada = Armada::open(&root, config, Arc::new(engine), HookRegistry::new())?;

    let recovered = armada.dispatcher.recover_interrupted()?;
    if recovered > 0 {
        tracing::warn!(recovered, "marked runs from a previous server as interrupted");
    }
    spawn_completion_loop(completions, armada.dispatcher.clone());

    Ok(AppState::new(root, armada))
}

/// Start the armada API server on the configured bind address.
pub async fn serve(root: PathBuf, config: Config) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    serve_on(root, config, listener).await
}

/// Start the armada API server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when the port is 0
/// and the OS picks a free one).
pub async fn serve_on(
    root: PathBuf,
    config: Config,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let app = build_router(open_state(root, &config)?);

    tracing::info!("armada server listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
