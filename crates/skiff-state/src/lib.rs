mod file;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub use file::FileStore;

#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use skiff_core::error::{SkiffError, SkiffResult};
use skiff_core::models::{Attempt, Dataset, InputParam, RunStatePatch, TaskEvent, User, Workflow};

/// Paging/filter parameters for list operations. Results are sorted by
/// creation time, newest first, and an empty page is not an error.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub user_id: Option<String>,
    pub page: usize,
    pub page_size: usize,
}

impl ListQuery {
    pub fn page(page: usize, page_size: usize) -> Self {
        Self {
            user_id: None,
            page,
            page_size,
        }
    }

    pub fn for_user(user_id: impl Into<String>, page: usize, page_size: usize) -> Self {
        Self {
            user_id: Some(user_id.into()),
            page,
            page_size,
        }
    }

    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.page * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect()
    }
}

/// Persistence contract over the four record collections.
///
/// Mutations to a workflow's run state go through `append_attempt` and
/// `update_run_state`, which each backend makes atomic on its own terms:
/// the file backend holds its cross-process lock around a full
/// reload-mutate-save cycle, the remote backend leans on per-document
/// operations. Callers must re-fetch rather than cache records across calls.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // users
    async fn create_user(&self, user: User) -> SkiffResult<()>;
    async fn get_user(&self, id: &str) -> SkiffResult<User>;
    async fn get_user_by_username(&self, username: &str) -> SkiffResult<User>;
    async fn replace_user(&self, id: &str, user: User) -> SkiffResult<()>;
    async fn delete_user(&self, id: &str) -> SkiffResult<()>;
    async fn list_users(&self, query: &ListQuery) -> SkiffResult<Vec<User>>;

    // datasets
    async fn create_dataset(&self, dataset: Dataset) -> SkiffResult<()>;
    async fn get_dataset(&self, id: &str) -> SkiffResult<Dataset>;
    async fn replace_dataset(&self, id: &str, dataset: Dataset) -> SkiffResult<()>;
    async fn delete_dataset(&self, id: &str) -> SkiffResult<()>;
    async fn list_datasets(&self, query: &ListQuery) -> SkiffResult<Vec<Dataset>>;

    // workflows
    async fn create_workflow(&self, workflow: Workflow) -> SkiffResult<()>;
    async fn get_workflow(&self, id: &str) -> SkiffResult<Workflow>;
    async fn replace_workflow(&self, id: &str, workflow: Workflow) -> SkiffResult<()>;
    async fn delete_workflow(&self, id: &str) -> SkiffResult<()>;
    async fn list_workflows(&self, query: &ListQuery) -> SkiffResult<Vec<Workflow>>;

    /// Flip the workflow to running and append the next attempt, returning
    /// it. Concurrent calls on the same workflow must yield distinct
    /// attempt ids.
    async fn append_attempt(&self, workflow_id: &str, inputs: Vec<InputParam>)
        -> SkiffResult<Attempt>;

    /// Apply a sparse run-state patch (status and/or pid) to the workflow
    /// and its current attempt, re-reading the authoritative record first.
    async fn update_run_state(
        &self,
        workflow_id: &str,
        patch: RunStatePatch,
    ) -> SkiffResult<Workflow>;

    /// Drop one attempt from a workflow's history. `n_attempts` is left
    /// alone; attempt ids are never reused.
    async fn delete_attempt(&self, workflow_id: &str, attempt_id: u32) -> SkiffResult<()>;

    // tasks
    async fn create_task(&self, task: TaskEvent) -> SkiffResult<()>;
    async fn get_task(&self, id: &str) -> SkiffResult<TaskEvent>;
    async fn list_tasks(&self, page: usize, page_size: usize) -> SkiffResult<Vec<TaskEvent>>;
}

/// Pure-configuration description of a store, safe to hand across a process
/// boundary. The monitor worker rebuilds its own store from this rather
/// than inheriting a live handle or lock from the serving process.
#[derive(Debug, Clone)]
pub enum StoreTarget {
    File(PathBuf),
    #[cfg(feature = "mongodb")]
    Mongo(String),
}

impl StoreTarget {
    pub fn parse(backend: &str, database: &str) -> SkiffResult<Self> {
        match backend {
            "file" => Ok(StoreTarget::File(PathBuf::from(database))),
            #[cfg(feature = "mongodb")]
            "mongo" => Ok(StoreTarget::Mongo(database.to_string())),
            other => Err(SkiffError::Config(format!("unknown backend {other:?}"))),
        }
    }

    pub async fn open(&self) -> SkiffResult<Arc<dyn RecordStore>> {
        match self {
            StoreTarget::File(path) => Ok(Arc::new(FileStore::new(path))),
            #[cfg(feature = "mongodb")]
            StoreTarget::Mongo(uri) => Ok(Arc::new(MongoStore::connect(uri).await?)),
        }
    }

    /// Command-line flags that reconstruct this target in a worker process.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            StoreTarget::File(path) => vec![
                "--backend".to_string(),
                "file".to_string(),
                "--database".to_string(),
                path.display().to_string(),
            ],
            #[cfg(feature = "mongodb")]
            StoreTarget::Mongo(uri) => vec![
                "--backend".to_string(),
                "mongo".to_string(),
                "--database".to_string(),
                uri.clone(),
            ],
        }
    }
}
