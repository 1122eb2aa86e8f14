use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use skiff_core::config::{ExecutorProfile, Settings};
use skiff_state::{FileStore, RecordStore};
use skiff_web::{build_router, ApiServer};

struct TestApp {
    app: axum::Router,
    store: FileStore,
    settings: Settings,
    dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn setup() -> TestApp {
    let dir = std::env::temp_dir().join(format!("skiff-api-{}", Uuid::new_v4()));
    let store = FileStore::new(dir.join("db.json"));
    let settings = Settings {
        executor: ExecutorProfile::Local,
        workspace_dir: dir.join("workspace"),
        runner_bin: "true".to_string(),
        runner_config: None,
        volume_claim: None,
        export_script: None,
        cancel_script: None,
        cancel_wait: Duration::from_secs(1),
    };
    let app = build_router(ApiServer::new(
        Arc::new(store.clone()),
        settings.clone(),
        vec![],
    ));
    TestApp {
        app,
        store,
        settings,
        dir,
    }
}

async fn request_json(
    app: &axum::Router,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = if let Some(payload) = body {
        builder = builder.header("content-type", "application/json");
        Body::from(payload.to_string())
    } else {
        Body::empty()
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request body"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json")
    };
    (status, json)
}

#[tokio::test]
async fn test_user_endpoints() {
    let test = setup();

    let (status, body) = request_json(
        &test.app,
        Method::POST,
        "/api/users",
        Some(json!({"username": "ada", "password_hash": "h", "role": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["_id"].as_str().expect("id").to_string();

    let (status, body) = request_json(&test.app, Method::GET, &format!("/api/users/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "ada");
    assert_eq!(body["role"], "admin");

    let (status, _) = request_json(
        &test.app,
        Method::POST,
        "/api/users",
        Some(json!({"username": "ada", "password_hash": "h2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = request_json(&test.app, Method::GET, "/api/users/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dataset_crud_and_listing() {
    let test = setup();

    let (status, body) = request_json(
        &test.app,
        Method::POST,
        "/api/datasets",
        Some(json!({"user_id": "u1", "experiment": "RNA-Seq"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["_id"].as_str().expect("id").to_string();
    assert!(test.settings.dataset_dir(&id).is_dir());

    let (status, body) =
        request_json(&test.app, Method::GET, &format!("/api/datasets/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["experiment"], "rna-seq");

    let (status, _) = request_json(
        &test.app,
        Method::POST,
        &format!("/api/datasets/{id}"),
        Some(json!({"experiment": "rna-seq", "author": "ada", "description": "trial"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        request_json(&test.app, Method::GET, "/api/datasets?user_id=u1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("array").len(), 1);
    assert_eq!(body[0]["author"], "ada");

    let (status, body) =
        request_json(&test.app, Method::GET, "/api/datasets?user_id=other", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("array").len(), 0);

    let (status, _) =
        request_json(&test.app, Method::DELETE, &format!("/api/datasets/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!test.settings.dataset_dir(&id).exists());

    let (status, _) =
        request_json(&test.app, Method::GET, &format!("/api/datasets/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_workflow_crud() {
    let test = setup();

    let (status, body) = request_json(
        &test.app,
        Method::POST,
        "/api/workflows",
        Some(json!({"user_id": "u1", "pipeline": "Lab/Variant-Calling"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["_id"].as_str().expect("id").to_string();

    let (status, body) =
        request_json(&test.app, Method::GET, &format!("/api/workflows/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pipeline"], "lab/variant-calling");
    assert_eq!(body["status"], "nascent");
    assert_eq!(body["n_attempts"], 0);
    assert_eq!(body["pid"], -1);

    let (status, _) = request_json(
        &test.app,
        Method::POST,
        &format!("/api/workflows/{id}"),
        Some(json!({"description": "weekly cohort"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) =
        request_json(&test.app, Method::GET, &format!("/api/workflows/{id}"), None).await;
    assert_eq!(body["description"], "weekly cohort");
    assert_eq!(body["pipeline"], "lab/variant-calling");

    let (status, _) =
        request_json(&test.app, Method::DELETE, &format!("/api/workflows/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) =
        request_json(&test.app, Method::GET, &format!("/api/workflows/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_launch_guards() {
    let test = setup();

    let (status, _) = request_json(
        &test.app,
        Method::POST,
        "/api/workflows/missing/launch",
        Some(json!({"inputs": []})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = request_json(
        &test.app,
        Method::POST,
        "/api/workflows",
        Some(json!({"user_id": "u1", "pipeline": "p"})),
    )
    .await;
    let id = body["_id"].as_str().expect("id").to_string();

    // put the workflow into the running state without spawning anything
    test.store.append_attempt(&id, vec![]).await.expect("append");

    let (status, body) = request_json(
        &test.app,
        Method::POST,
        &format!("/api/workflows/{id}/launch"),
        Some(json!({"inputs": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("already running"));
}

#[tokio::test]
async fn test_cancel_running_workflow_without_process() {
    let test = setup();

    let (_, body) = request_json(
        &test.app,
        Method::POST,
        "/api/workflows",
        Some(json!({"user_id": "u1", "pipeline": "p"})),
    )
    .await;
    let id = body["_id"].as_str().expect("id").to_string();
    test.store.append_attempt(&id, vec![]).await.expect("append");

    let (status, _) = request_json(
        &test.app,
        Method::POST,
        &format!("/api/workflows/{id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let workflow = test.store.get_workflow(&id).await.expect("get");
    assert_eq!(workflow.status, skiff_core::WorkflowStatus::Canceled);
    assert_eq!(workflow.attempts[0].status, skiff_core::AttemptStatus::Canceled);
    assert_eq!(workflow.pid, -1);
}

#[tokio::test]
async fn test_cancel_after_natural_finish_only_resets_pid() {
    let test = setup();

    let (_, body) = request_json(
        &test.app,
        Method::POST,
        "/api/workflows",
        Some(json!({"user_id": "u1", "pipeline": "p"})),
    )
    .await;
    let id = body["_id"].as_str().expect("id").to_string();
    test.store.append_attempt(&id, vec![]).await.expect("append");
    test.store
        .update_run_state(
            &id,
            skiff_core::models::RunStatePatch::status(skiff_core::AttemptStatus::Completed),
        )
        .await
        .expect("complete");

    let (status, body) = request_json(
        &test.app,
        Method::POST,
        &format!("/api/workflows/{id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("already finished"));

    let workflow = test.store.get_workflow(&id).await.expect("get");
    assert_eq!(workflow.status, skiff_core::WorkflowStatus::Completed);
    assert_eq!(workflow.pid, -1);
}

#[tokio::test]
async fn test_attempt_log_round_trip() {
    let test = setup();

    let (_, body) = request_json(
        &test.app,
        Method::POST,
        "/api/workflows",
        Some(json!({"user_id": "u1", "pipeline": "p"})),
    )
    .await;
    let id = body["_id"].as_str().expect("id").to_string();
    let attempt = test.store.append_attempt(&id, vec![]).await.expect("append");

    let attempt_dir = test.settings.attempt_dir(&id, &attempt.output_dir);
    std::fs::create_dir_all(&attempt_dir).expect("attempt dir");
    std::fs::write(
        attempt_dir.join(skiff_runtime::ATTEMPT_LOG_FILE),
        "N E X T F L O W\nexecutor > local\n",
    )
    .expect("write log");

    let (status, body) = request_json(
        &test.app,
        Method::GET,
        &format!("/api/workflows/{id}/1/log"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempt"], 1);
    assert_eq!(body["status"], "running");
    assert!(body["log"].as_str().expect("log").contains("executor > local"));

    let (status, _) = request_json(
        &test.app,
        Method::GET,
        &format!("/api/workflows/{id}/9/log"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_output_drops_attempt_and_directory() {
    let test = setup();

    let (_, body) = request_json(
        &test.app,
        Method::POST,
        "/api/workflows",
        Some(json!({"user_id": "u1", "pipeline": "p"})),
    )
    .await;
    let id = body["_id"].as_str().expect("id").to_string();
    let attempt = test.store.append_attempt(&id, vec![]).await.expect("append");
    let attempt_dir = test.settings.attempt_dir(&id, &attempt.output_dir);
    std::fs::create_dir_all(&attempt_dir).expect("attempt dir");

    let (status, _) = request_json(
        &test.app,
        Method::DELETE,
        &format!("/api/outputs/{id}/1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!attempt_dir.exists());

    let workflow = test.store.get_workflow(&id).await.expect("get");
    assert!(workflow.attempts.is_empty());
    assert_eq!(workflow.n_attempts, 1);
}

#[tokio::test]
async fn test_task_event_ingestion() {
    let test = setup();

    let (status, body) = request_json(
        &test.app,
        Method::POST,
        "/api/tasks",
        Some(json!({
            "run_name": "workflow-w1-0001",
            "event": "process_completed",
            "payload": {"trace": {"process": "align"}}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["_id"].as_str().expect("id").to_string();

    let (status, body) = request_json(&test.app, Method::GET, &format!("/api/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"], "process_completed");
    assert_eq!(body["payload"]["trace"]["process"], "align");

    let (status, body) = request_json(&test.app, Method::GET, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("array").len(), 1);
}
