use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use skiff_core::error::{SkiffError, SkiffResult};
use skiff_core::models::{Attempt, Dataset, InputParam, RunStatePatch, TaskEvent, User, Workflow};

use crate::{ListQuery, RecordStore};

/// Whole-database snapshot serialized to a single JSON file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    users: Vec<User>,
    datasets: Vec<Dataset>,
    workflows: Vec<Workflow>,
    tasks: Vec<TaskEvent>,
}

/// File-backed record store.
///
/// Every operation, reads included, takes an exclusive lock on a sibling
/// lock file, reloads the full snapshot from disk, operates in memory, and
/// (for mutations) persists the full snapshot before releasing the lock.
/// The lock is an OS file lock, so operations issued by the monitor worker
/// process are serialized against the serving process as well. O(database)
/// work per call is accepted: records are human-submitted, not
/// high-frequency events.
#[derive(Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut lock_name = path.as_os_str().to_os_string();
        lock_name.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_name),
            path,
        }
    }

    fn lock(&self) -> SkiffResult<fs::File> {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir).ok();
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| SkiffError::WriteFile {
                path: self.lock_path.clone(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| SkiffError::WriteFile {
            path: self.lock_path.clone(),
            source,
        })?;
        Ok(file)
    }

    fn load(&self) -> SkiffResult<Snapshot> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| SkiffError::JsonParse {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "snapshot missing, starting empty");
                Ok(Snapshot::default())
            }
            Err(source) => Err(SkiffError::ReadFile {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, snapshot: &Snapshot) -> SkiffResult<()> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|source| SkiffError::JsonParse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, bytes).map_err(|source| SkiffError::WriteFile {
            path: self.path.clone(),
            source,
        })
    }

    /// Lock, reload, mutate the named workflow in place, persist.
    fn with_workflow<T>(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Workflow) -> SkiffResult<T>,
    ) -> SkiffResult<T> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        let workflow = snapshot
            .workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| SkiffError::not_found("workflow", id))?;
        let value = mutate(workflow)?;
        self.save(&snapshot)?;
        Ok(value)
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn create_user(&self, user: User) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        if snapshot.users.iter().any(|u| u.username == user.username) {
            return Err(SkiffError::AlreadyExists {
                username: user.username,
            });
        }
        snapshot.users.push(user);
        self.save(&snapshot)
    }

    async fn get_user(&self, id: &str) -> SkiffResult<User> {
        let _guard = self.lock()?;
        let snapshot = self.load()?;
        snapshot
            .users
            .into_iter()
            .find(|u| u.id == id)
            .ok_or_else(|| SkiffError::not_found("user", id))
    }

    async fn get_user_by_username(&self, username: &str) -> SkiffResult<User> {
        let _guard = self.lock()?;
        let snapshot = self.load()?;
        snapshot
            .users
            .into_iter()
            .find(|u| u.username == username)
            .ok_or_else(|| SkiffError::not_found("user", username))
    }

    async fn replace_user(&self, id: &str, user: User) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        let slot = snapshot
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| SkiffError::not_found("user", id))?;
        *slot = user;
        self.save(&snapshot)
    }

    async fn delete_user(&self, id: &str) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        let before = snapshot.users.len();
        snapshot.users.retain(|u| u.id != id);
        if snapshot.users.len() == before {
            return Err(SkiffError::not_found("user", id));
        }
        self.save(&snapshot)
    }

    async fn list_users(&self, query: &ListQuery) -> SkiffResult<Vec<User>> {
        let _guard = self.lock()?;
        let mut users = self.load()?.users;
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(query.slice(&users))
    }

    async fn create_dataset(&self, dataset: Dataset) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        snapshot.datasets.push(dataset);
        self.save(&snapshot)
    }

    async fn get_dataset(&self, id: &str) -> SkiffResult<Dataset> {
        let _guard = self.lock()?;
        let snapshot = self.load()?;
        snapshot
            .datasets
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| SkiffError::not_found("dataset", id))
    }

    async fn replace_dataset(&self, id: &str, dataset: Dataset) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        let slot = snapshot
            .datasets
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| SkiffError::not_found("dataset", id))?;
        *slot = dataset;
        self.save(&snapshot)
    }

    async fn delete_dataset(&self, id: &str) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        let before = snapshot.datasets.len();
        snapshot.datasets.retain(|d| d.id != id);
        if snapshot.datasets.len() == before {
            return Err(SkiffError::not_found("dataset", id));
        }
        self.save(&snapshot)
    }

    async fn list_datasets(&self, query: &ListQuery) -> SkiffResult<Vec<Dataset>> {
        let _guard = self.lock()?;
        let mut datasets = self.load()?.datasets;
        if let Some(user_id) = &query.user_id {
            datasets.retain(|d| &d.user_id == user_id);
        }
        datasets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(query.slice(&datasets))
    }

    async fn create_workflow(&self, workflow: Workflow) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        snapshot.workflows.push(workflow);
        self.save(&snapshot)
    }

    async fn get_workflow(&self, id: &str) -> SkiffResult<Workflow> {
        let _guard = self.lock()?;
        let snapshot = self.load()?;
        snapshot
            .workflows
            .into_iter()
            .find(|w| w.id == id)
            .ok_or_else(|| SkiffError::not_found("workflow", id))
    }

    async fn replace_workflow(&self, id: &str, workflow: Workflow) -> SkiffResult<()> {
        self.with_workflow(id, |slot| {
            *slot = workflow;
            Ok(())
        })
    }

    async fn delete_workflow(&self, id: &str) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        let before = snapshot.workflows.len();
        snapshot.workflows.retain(|w| w.id != id);
        if snapshot.workflows.len() == before {
            return Err(SkiffError::not_found("workflow", id));
        }
        self.save(&snapshot)
    }

    async fn list_workflows(&self, query: &ListQuery) -> SkiffResult<Vec<Workflow>> {
        let _guard = self.lock()?;
        let mut workflows = self.load()?.workflows;
        if let Some(user_id) = &query.user_id {
            workflows.retain(|w| &w.user_id == user_id);
        }
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(query.slice(&workflows))
    }

    async fn append_attempt(
        &self,
        workflow_id: &str,
        inputs: Vec<InputParam>,
    ) -> SkiffResult<Attempt> {
        self.with_workflow(workflow_id, |workflow| workflow.begin_attempt(inputs))
    }

    async fn update_run_state(
        &self,
        workflow_id: &str,
        patch: RunStatePatch,
    ) -> SkiffResult<Workflow> {
        self.with_workflow(workflow_id, |workflow| {
            patch.apply(workflow)?;
            Ok(workflow.clone())
        })
    }

    async fn delete_attempt(&self, workflow_id: &str, attempt_id: u32) -> SkiffResult<()> {
        self.with_workflow(workflow_id, |workflow| {
            let before = workflow.attempts.len();
            workflow.attempts.retain(|a| a.id != attempt_id);
            if workflow.attempts.len() == before {
                return Err(SkiffError::not_found("attempt", attempt_id.to_string()));
            }
            Ok(())
        })
    }

    async fn create_task(&self, task: TaskEvent) -> SkiffResult<()> {
        let _guard = self.lock()?;
        let mut snapshot = self.load()?;
        snapshot.tasks.push(task);
        self.save(&snapshot)
    }

    async fn get_task(&self, id: &str) -> SkiffResult<TaskEvent> {
        let _guard = self.lock()?;
        let snapshot = self.load()?;
        snapshot
            .tasks
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| SkiffError::not_found("task", id))
    }

    async fn list_tasks(&self, page: usize, page_size: usize) -> SkiffResult<Vec<TaskEvent>> {
        let _guard = self.lock()?;
        let mut tasks = self.load()?.tasks;
        tasks.sort_by(|a, b| b.utc_time.cmp(&a.utc_time));
        Ok(ListQuery::page(page, page_size).slice(&tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::models::{Role, NO_PID};
    use skiff_core::status::{AttemptStatus, WorkflowStatus};
    use uuid::Uuid;

    fn temp_store() -> (FileStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("skiff-file-store-{}", Uuid::new_v4()));
        (FileStore::new(dir.join("db.json")), dir)
    }

    #[tokio::test]
    async fn test_user_create_get_round_trip() {
        let (store, dir) = temp_store();
        let user = User::new("ada", "hash", Role::Admin);
        store.create_user(user.clone()).await.expect("create user");

        let fetched = store.get_user(&user.id).await.expect("get user");
        assert_eq!(fetched, user);
        let by_name = store.get_user_by_username("ada").await.expect("by username");
        assert_eq!(by_name.id, user.id);

        let mut updated = fetched;
        updated.password_hash = "rehash".to_string();
        store
            .replace_user(&user.id, updated)
            .await
            .expect("replace user");
        let fetched = store.get_user(&user.id).await.expect("get user again");
        assert_eq!(fetched.password_hash, "rehash");

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let (store, dir) = temp_store();
        store
            .create_user(User::new("ada", "h1", Role::Admin))
            .await
            .expect("first create");
        let err = store
            .create_user(User::new("ada", "h2", Role::Guest))
            .await
            .expect_err("duplicate username");
        assert!(matches!(err, SkiffError::AlreadyExists { .. }));

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_get_missing_records_is_not_found() {
        let (store, dir) = temp_store();
        assert!(matches!(
            store.get_workflow("nope").await,
            Err(SkiffError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_dataset("nope").await,
            Err(SkiffError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete_user("nope").await,
            Err(SkiffError::NotFound { .. })
        ));
        assert!(matches!(
            store
                .replace_dataset("nope", Dataset::new("u1", "exp"))
                .await,
            Err(SkiffError::NotFound { .. })
        ));

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_workflow_round_trip_preserves_fields() {
        let (store, dir) = temp_store();
        let workflow = Workflow::new("u1", "Lab/RNA-Seq", "main", "standard");
        store
            .create_workflow(workflow.clone())
            .await
            .expect("create workflow");

        let fetched = store.get_workflow(&workflow.id).await.expect("get workflow");
        assert_eq!(fetched, workflow);
        assert_eq!(fetched.pid, NO_PID);

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_list_workflows_sorts_and_filters() {
        let (store, dir) = temp_store();
        let mut ids = Vec::new();
        for user in ["u1", "u2", "u1"] {
            let workflow = Workflow::new(user, "p", "main", "standard");
            ids.push(workflow.id.clone());
            store.create_workflow(workflow).await.expect("create");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let all = store
            .list_workflows(&ListQuery::page(0, 10))
            .await
            .expect("list all");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, ids[2], "newest first");

        let mine = store
            .list_workflows(&ListQuery::for_user("u1", 0, 10))
            .await
            .expect("list filtered");
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|w| w.user_id == "u1"));

        let second_page = store
            .list_workflows(&ListQuery::page(1, 2))
            .await
            .expect("second page");
        assert_eq!(second_page.len(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_append_attempt_and_run_state_patches() {
        let (store, dir) = temp_store();
        let workflow = Workflow::new("u1", "p", "main", "standard");
        let id = workflow.id.clone();
        store.create_workflow(workflow).await.expect("create");

        let attempt = store.append_attempt(&id, vec![]).await.expect("launch");
        assert_eq!(attempt.id, 1);

        store
            .update_run_state(&id, RunStatePatch::pid(1234))
            .await
            .expect("record pid");
        let updated = store
            .update_run_state(&id, RunStatePatch::status(AttemptStatus::Completed))
            .await
            .expect("complete");

        assert_eq!(updated.status, WorkflowStatus::Completed);
        assert_eq!(updated.attempts[0].status, AttemptStatus::Completed);
        // the terminal write must not reset the recorded pid
        assert_eq!(updated.pid, 1234);

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_delete_attempt_keeps_counter() {
        let (store, dir) = temp_store();
        let workflow = Workflow::new("u1", "p", "main", "standard");
        let id = workflow.id.clone();
        store.create_workflow(workflow).await.expect("create");
        store.append_attempt(&id, vec![]).await.expect("launch 1");
        store
            .update_run_state(&id, RunStatePatch::status(AttemptStatus::Failed))
            .await
            .expect("fail 1");
        store.append_attempt(&id, vec![]).await.expect("launch 2");

        store.delete_attempt(&id, 1).await.expect("delete attempt 1");
        let fetched = store.get_workflow(&id).await.expect("get");
        assert_eq!(fetched.attempts.len(), 1);
        assert_eq!(fetched.attempts[0].id, 2);
        assert_eq!(fetched.n_attempts, 2);

        assert!(matches!(
            store.delete_attempt(&id, 1).await,
            Err(SkiffError::NotFound { .. })
        ));

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_task_events_list_newest_first() {
        let (store, dir) = temp_store();
        for event in ["started", "process_completed", "completed"] {
            store
                .create_task(TaskEvent::new("workflow-x-0001", event, serde_json::json!({})))
                .await
                .expect("create task");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let tasks = store.list_tasks(0, 10).await.expect("list tasks");
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].event, "completed");

        let _ = fs::remove_dir_all(dir);
    }
}
