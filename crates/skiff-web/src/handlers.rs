use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use skiff_core::models::{
    Dataset, InputParam, Role, RunStatePatch, TaskEvent, User, Workflow, NO_PID,
};
use skiff_core::status::{AttemptStatus, WorkflowStatus};
use skiff_core::SkiffError;
use skiff_runtime::ATTEMPT_LOG_FILE;
use skiff_state::ListQuery;

use crate::api::{message_response, store_error, ApiServer};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
pub(crate) struct ListParams {
    user_id: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

impl ListParams {
    fn query(&self) -> ListQuery {
        ListQuery {
            user_id: self.user_id.clone(),
            page: self.page.unwrap_or(0),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}

#[derive(Serialize)]
struct Created {
    #[serde(rename = "_id")]
    id: String,
}

// ---- users ----

#[derive(Deserialize)]
pub(crate) struct CreateUser {
    username: String,
    password_hash: String,
    #[serde(default = "guest_role")]
    role: Role,
}

fn guest_role() -> Role {
    Role::Guest
}

pub(crate) async fn list_users(
    State(api): State<ApiServer>,
    Query(params): Query<ListParams>,
) -> Response {
    match api.store.list_users(&params.query()).await {
        Ok(users) => Json(users).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn create_user(
    State(api): State<ApiServer>,
    Json(body): Json<CreateUser>,
) -> Response {
    let user = User::new(body.username, body.password_hash, body.role);
    let id = user.id.clone();
    match api.store.create_user(user).await {
        Ok(()) => Json(Created { id }).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn get_user(State(api): State<ApiServer>, Path(id): Path<String>) -> Response {
    match api.store.get_user(&id).await {
        Ok(user) => Json(user).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Deserialize)]
pub(crate) struct UpdateUser {
    password_hash: Option<String>,
    role: Option<Role>,
}

pub(crate) async fn update_user(
    State(api): State<ApiServer>,
    Path(id): Path<String>,
    Json(body): Json<UpdateUser>,
) -> Response {
    let mut user = match api.store.get_user(&id).await {
        Ok(user) => user,
        Err(err) => return store_error(err),
    };
    if let Some(password_hash) = body.password_hash {
        user.password_hash = password_hash;
    }
    if let Some(role) = body.role {
        user.role = role;
    }

    match api.store.replace_user(&id, user).await {
        Ok(()) => Json(Created { id }).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn delete_user(State(api): State<ApiServer>, Path(id): Path<String>) -> Response {
    match api.store.delete_user(&id).await {
        Ok(()) => message_response(StatusCode::OK, format!("user {id:?} was deleted")),
        Err(err) => store_error(err),
    }
}

// ---- datasets ----

#[derive(Deserialize)]
pub(crate) struct CreateDataset {
    #[serde(default)]
    user_id: String,
    experiment: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
}

pub(crate) async fn list_datasets(
    State(api): State<ApiServer>,
    Query(params): Query<ListParams>,
) -> Response {
    match api.store.list_datasets(&params.query()).await {
        Ok(datasets) => Json(datasets).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn create_dataset(
    State(api): State<ApiServer>,
    Json(body): Json<CreateDataset>,
) -> Response {
    let mut dataset = Dataset::new(body.user_id, &body.experiment);
    dataset.author = body.author;
    dataset.description = body.description;
    let id = dataset.id.clone();

    if let Err(err) = api.store.create_dataset(dataset).await {
        return store_error(err);
    }
    if let Err(err) = tokio::fs::create_dir_all(api.settings.dataset_dir(&id)).await {
        warn!(dataset = %id, error = %err, "failed to create dataset directory");
    }
    Json(Created { id }).into_response()
}

pub(crate) async fn get_dataset(State(api): State<ApiServer>, Path(id): Path<String>) -> Response {
    match api.store.get_dataset(&id).await {
        Ok(dataset) => Json(dataset).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Deserialize)]
pub(crate) struct UpdateDataset {
    experiment: String,
    author: String,
    description: String,
}

pub(crate) async fn update_dataset(
    State(api): State<ApiServer>,
    Path(id): Path<String>,
    Json(body): Json<UpdateDataset>,
) -> Response {
    let mut dataset = match api.store.get_dataset(&id).await {
        Ok(dataset) => dataset,
        Err(err) => return store_error(err),
    };
    dataset.experiment = body.experiment.to_lowercase();
    dataset.author = body.author;
    dataset.description = body.description;

    match api.store.replace_dataset(&id, dataset).await {
        Ok(()) => Json(Created { id }).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn delete_dataset(
    State(api): State<ApiServer>,
    Path(id): Path<String>,
) -> Response {
    match api.store.delete_dataset(&id).await {
        Ok(()) => {
            let _ = tokio::fs::remove_dir_all(api.settings.dataset_dir(&id)).await;
            message_response(StatusCode::OK, format!("dataset {id:?} was deleted"))
        }
        Err(err) => store_error(err),
    }
}

// ---- workflows ----

#[derive(Deserialize)]
pub(crate) struct CreateWorkflow {
    #[serde(default)]
    user_id: String,
    pipeline: String,
    #[serde(default = "default_revision")]
    revision: String,
    #[serde(default = "default_profiles")]
    profiles: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_profiles() -> String {
    "standard".to_string()
}

pub(crate) async fn list_workflows(
    State(api): State<ApiServer>,
    Query(params): Query<ListParams>,
) -> Response {
    match api.store.list_workflows(&params.query()).await {
        Ok(workflows) => Json(workflows).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn create_workflow(
    State(api): State<ApiServer>,
    Json(body): Json<CreateWorkflow>,
) -> Response {
    let mut workflow = Workflow::new(body.user_id, &body.pipeline, &body.revision, &body.profiles);
    workflow.name = body.name;
    workflow.author = body.author;
    workflow.description = body.description;
    let id = workflow.id.clone();

    if let Err(err) = api.store.create_workflow(workflow).await {
        return store_error(err);
    }
    if let Err(err) = tokio::fs::create_dir_all(api.settings.workflow_dir(&id)).await {
        warn!(workflow = %id, error = %err, "failed to create workflow directory");
    }
    Json(Created { id }).into_response()
}

pub(crate) async fn get_workflow(State(api): State<ApiServer>, Path(id): Path<String>) -> Response {
    match api.store.get_workflow(&id).await {
        Ok(workflow) => Json(workflow).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Deserialize)]
pub(crate) struct UpdateWorkflow {
    pipeline: Option<String>,
    revision: Option<String>,
    profiles: Option<String>,
    name: Option<String>,
    author: Option<String>,
    description: Option<String>,
}

pub(crate) async fn update_workflow(
    State(api): State<ApiServer>,
    Path(id): Path<String>,
    Json(body): Json<UpdateWorkflow>,
) -> Response {
    let mut workflow = match api.store.get_workflow(&id).await {
        Ok(workflow) => workflow,
        Err(err) => return store_error(err),
    };
    if let Some(pipeline) = body.pipeline {
        workflow.pipeline = pipeline.to_lowercase();
    }
    if let Some(revision) = body.revision {
        workflow.revision = revision;
    }
    if let Some(profiles) = body.profiles {
        workflow.profiles = profiles;
    }
    if let Some(name) = body.name {
        workflow.name = name;
    }
    if let Some(author) = body.author {
        workflow.author = author;
    }
    if let Some(description) = body.description {
        workflow.description = description;
    }

    match api.store.replace_workflow(&id, workflow).await {
        Ok(()) => Json(Created { id }).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn delete_workflow(
    State(api): State<ApiServer>,
    Path(id): Path<String>,
) -> Response {
    match api.store.delete_workflow(&id).await {
        Ok(()) => {
            let _ = tokio::fs::remove_dir_all(api.settings.workflow_dir(&id)).await;
            message_response(StatusCode::OK, format!("workflow {id:?} was deleted"))
        }
        Err(err) => store_error(err),
    }
}

// ---- launch / cancel / log ----

#[derive(Deserialize)]
pub(crate) struct LaunchRequest {
    inputs: Vec<InputParam>,
    #[serde(default)]
    resume: bool,
}

/// Launch an attempt: append-and-increment through the store, prepare the
/// output directory, then hand the rest of the lifecycle to a monitor
/// worker process. The already-running check is advisory; two racing
/// launches still get distinct attempt indices from the store.
pub(crate) async fn launch_workflow(
    State(api): State<ApiServer>,
    Path(id): Path<String>,
    Json(body): Json<LaunchRequest>,
) -> Response {
    let workflow = match api.store.get_workflow(&id).await {
        Ok(workflow) => workflow,
        Err(err) => return store_error(err),
    };
    if workflow.status == WorkflowStatus::Running {
        return message_response(
            StatusCode::BAD_REQUEST,
            format!("workflow {id:?} is already running"),
        );
    }

    let attempt = match api.store.append_attempt(&id, body.inputs).await {
        Ok(attempt) => attempt,
        Err(err) => return store_error(err),
    };

    let output_dir = api.settings.attempt_dir(&id, &attempt.output_dir);
    if let Err(err) = tokio::fs::create_dir_all(&output_dir).await {
        return store_error(SkiffError::WriteFile {
            path: output_dir,
            source: err,
        });
    }
    if let Some(config) = &api.settings.runner_config {
        if let Some(file_name) = config.file_name() {
            if let Err(err) = tokio::fs::copy(config, output_dir.join(file_name)).await {
                warn!(workflow = %id, error = %err, "failed to stage runner config");
            }
        }
    }

    match skiff_runtime::spawn_worker(&id, body.resume, &api.worker_args) {
        Ok(_) => message_response(StatusCode::OK, format!("workflow {id:?} was launched")),
        Err(err) => store_error(err),
    }
}

/// Cancel the current attempt synchronously: kill the recorded process
/// tree, then write canceled and reset the pid. If the run reached a
/// different terminal state first, only the pid is reset.
pub(crate) async fn cancel_workflow(
    State(api): State<ApiServer>,
    Path(id): Path<String>,
) -> Response {
    let workflow = match api.store.get_workflow(&id).await {
        Ok(workflow) => workflow,
        Err(err) => return store_error(err),
    };

    skiff_runtime::cancel_workflow(&workflow, &api.settings).await;

    match api.store.update_run_state(&id, RunStatePatch::canceled()).await {
        Ok(_) => message_response(StatusCode::OK, format!("workflow {id:?} was canceled")),
        Err(SkiffError::InvalidTransition { .. }) => {
            match api.store.update_run_state(&id, RunStatePatch::pid(NO_PID)).await {
                Ok(_) => message_response(
                    StatusCode::OK,
                    format!("workflow {id:?} had already finished"),
                ),
                Err(err) => store_error(err),
            }
        }
        Err(err) => store_error(err),
    }
}

#[derive(Serialize)]
struct AttemptLog {
    #[serde(rename = "_id")]
    id: String,
    attempt: u32,
    status: AttemptStatus,
    date_submitted: DateTime<Utc>,
    log: String,
}

pub(crate) async fn attempt_log(
    State(api): State<ApiServer>,
    Path((id, attempt_id)): Path<(String, u32)>,
) -> Response {
    let workflow = match api.store.get_workflow(&id).await {
        Ok(workflow) => workflow,
        Err(err) => return store_error(err),
    };
    let attempt = match workflow.attempt(attempt_id) {
        Ok(attempt) => attempt,
        Err(err) => return store_error(err),
    };

    let log_path = api
        .settings
        .attempt_dir(&id, &attempt.output_dir)
        .join(ATTEMPT_LOG_FILE);
    let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();

    (
        [(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate")],
        Json(AttemptLog {
            id,
            attempt: attempt.id,
            status: attempt.status,
            date_submitted: attempt.date_submitted,
            log,
        }),
    )
        .into_response()
}

pub(crate) async fn delete_output(
    State(api): State<ApiServer>,
    Path((id, attempt_id)): Path<(String, u32)>,
) -> Response {
    let workflow = match api.store.get_workflow(&id).await {
        Ok(workflow) => workflow,
        Err(err) => return store_error(err),
    };
    let output_dir = match workflow.attempt(attempt_id) {
        Ok(attempt) => api.settings.attempt_dir(&id, &attempt.output_dir),
        Err(err) => return store_error(err),
    };

    match api.store.delete_attempt(&id, attempt_id).await {
        Ok(()) => {
            let _ = tokio::fs::remove_dir_all(output_dir).await;
            message_response(
                StatusCode::OK,
                format!("output {attempt_id} of workflow {id:?} was deleted"),
            )
        }
        Err(err) => store_error(err),
    }
}

// ---- tasks ----

#[derive(Deserialize)]
pub(crate) struct CreateTask {
    run_name: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

pub(crate) async fn create_task(
    State(api): State<ApiServer>,
    Json(body): Json<CreateTask>,
) -> Response {
    let task = TaskEvent::new(body.run_name, body.event, body.payload);
    let id = task.id.clone();
    match api.store.create_task(task).await {
        Ok(()) => Json(Created { id }).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn list_tasks(
    State(api): State<ApiServer>,
    Query(params): Query<ListParams>,
) -> Response {
    let query = params.query();
    match api.store.list_tasks(query.page, query.page_size).await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(err) => store_error(err),
    }
}

pub(crate) async fn get_task(State(api): State<ApiServer>, Path(id): Path<String>) -> Response {
    match api.store.get_task(&id).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => store_error(err),
    }
}
