use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use skiff_core::config::Settings;
use skiff_core::error::SkiffError;
use skiff_state::RecordStore;

use crate::handlers;

/// Shared state for the HTTP layer: the record store, process-wide settings,
/// and the flags a spawned monitor worker needs to rebuild the store on its
/// side of the process boundary.
#[derive(Clone)]
pub struct ApiServer {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) settings: Arc<Settings>,
    pub(crate) worker_args: Arc<Vec<String>>,
}

impl ApiServer {
    pub fn new(store: Arc<dyn RecordStore>, settings: Settings, worker_args: Vec<String>) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            worker_args: Arc::new(worker_args),
        }
    }

    pub async fn serve(self, addr: SocketAddr) -> JoinHandle<()> {
        let router = build_router(self);
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .expect("bind address");
            info!(%addr, "api listening");
            axum::serve(listener, router).await.expect("server error");
        })
    }
}

pub fn build_router(api: ApiServer) -> Router {
    let cors = tower_http::cors::CorsLayer::very_permissive();
    Router::new()
        .route(
            "/api/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/api/users/{id}",
            get(handlers::get_user)
                .post(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route(
            "/api/datasets",
            get(handlers::list_datasets).post(handlers::create_dataset),
        )
        .route(
            "/api/datasets/{id}",
            get(handlers::get_dataset)
                .post(handlers::update_dataset)
                .delete(handlers::delete_dataset),
        )
        .route(
            "/api/workflows",
            get(handlers::list_workflows).post(handlers::create_workflow),
        )
        .route(
            "/api/workflows/{id}",
            get(handlers::get_workflow)
                .post(handlers::update_workflow)
                .delete(handlers::delete_workflow),
        )
        .route("/api/workflows/{id}/launch", post(handlers::launch_workflow))
        .route("/api/workflows/{id}/cancel", post(handlers::cancel_workflow))
        .route(
            "/api/workflows/{id}/{attempt}/log",
            get(handlers::attempt_log),
        )
        .route(
            "/api/outputs/{id}/{attempt}",
            delete(handlers::delete_output),
        )
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route("/api/tasks/{id}", get(handlers::get_task))
        .with_state(api)
        .layer(cors)
}

#[derive(Serialize)]
struct Message {
    status: u16,
    message: String,
}

pub(crate) fn message_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(Message {
            status: status.as_u16(),
            message: message.into(),
        }),
    )
        .into_response()
}

/// Map store errors onto responses: storage errors propagate to the caller
/// as-is rather than being massaged per endpoint.
pub(crate) fn store_error(err: SkiffError) -> Response {
    match &err {
        SkiffError::NotFound { .. } => message_response(StatusCode::NOT_FOUND, err.to_string()),
        SkiffError::AlreadyExists { .. } | SkiffError::InvalidTransition { .. } => {
            message_response(StatusCode::CONFLICT, err.to_string())
        }
        _ => {
            error!(error = %err, "request failed");
            message_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
