use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Client, Collection, Database};
use tracing::info;

use skiff_core::error::{SkiffError, SkiffResult};
use skiff_core::models::{Attempt, Dataset, InputParam, RunStatePatch, TaskEvent, User, Workflow};

use crate::{ListQuery, RecordStore};

/// Remote document-store backend.
///
/// Atomicity is delegated to the store's native single-document operations.
/// The run-state primitives are fetch-mutate-replace, so callers get no
/// cross-field atomicity beyond what one replace provides, unlike the file
/// backend whose whole-snapshot rewrite serializes everything.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str) -> SkiffResult<Self> {
        let client = Client::with_uri_str(uri).await.map_err(SkiffError::store)?;
        info!(uri, "connected to document store");
        Ok(Self {
            db: client.database("skiff"),
        })
    }

    fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    fn datasets(&self) -> Collection<Dataset> {
        self.db.collection("datasets")
    }

    fn workflows(&self) -> Collection<Workflow> {
        self.db.collection("workflows")
    }

    fn tasks(&self) -> Collection<TaskEvent> {
        self.db.collection("tasks")
    }

    async fn fetch_workflow(&self, id: &str) -> SkiffResult<Workflow> {
        self.workflows()
            .find_one(doc! { "_id": id })
            .await
            .map_err(SkiffError::store)?
            .ok_or_else(|| SkiffError::not_found("workflow", id))
    }

    async fn store_workflow(&self, workflow: &Workflow) -> SkiffResult<()> {
        let result = self
            .workflows()
            .replace_one(doc! { "_id": &workflow.id }, workflow)
            .await
            .map_err(SkiffError::store)?;
        if result.matched_count == 0 {
            return Err(SkiffError::not_found("workflow", workflow.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn create_user(&self, user: User) -> SkiffResult<()> {
        let existing = self
            .users()
            .find_one(doc! { "username": &user.username })
            .await
            .map_err(SkiffError::store)?;
        if existing.is_some() {
            return Err(SkiffError::AlreadyExists {
                username: user.username,
            });
        }
        self.users()
            .insert_one(&user)
            .await
            .map_err(SkiffError::store)?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> SkiffResult<User> {
        self.users()
            .find_one(doc! { "_id": id })
            .await
            .map_err(SkiffError::store)?
            .ok_or_else(|| SkiffError::not_found("user", id))
    }

    async fn get_user_by_username(&self, username: &str) -> SkiffResult<User> {
        self.users()
            .find_one(doc! { "username": username })
            .await
            .map_err(SkiffError::store)?
            .ok_or_else(|| SkiffError::not_found("user", username))
    }

    async fn replace_user(&self, id: &str, user: User) -> SkiffResult<()> {
        let result = self
            .users()
            .replace_one(doc! { "_id": id }, &user)
            .await
            .map_err(SkiffError::store)?;
        if result.matched_count == 0 {
            return Err(SkiffError::not_found("user", id));
        }
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> SkiffResult<()> {
        let result = self
            .users()
            .delete_one(doc! { "_id": id })
            .await
            .map_err(SkiffError::store)?;
        if result.deleted_count == 0 {
            return Err(SkiffError::not_found("user", id));
        }
        Ok(())
    }

    async fn list_users(&self, query: &ListQuery) -> SkiffResult<Vec<User>> {
        self.users()
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .skip((query.page * query.page_size) as u64)
            .limit(query.page_size as i64)
            .await
            .map_err(SkiffError::store)?
            .try_collect()
            .await
            .map_err(SkiffError::store)
    }

    async fn create_dataset(&self, dataset: Dataset) -> SkiffResult<()> {
        self.datasets()
            .insert_one(&dataset)
            .await
            .map_err(SkiffError::store)?;
        Ok(())
    }

    async fn get_dataset(&self, id: &str) -> SkiffResult<Dataset> {
        self.datasets()
            .find_one(doc! { "_id": id })
            .await
            .map_err(SkiffError::store)?
            .ok_or_else(|| SkiffError::not_found("dataset", id))
    }

    async fn replace_dataset(&self, id: &str, dataset: Dataset) -> SkiffResult<()> {
        let result = self
            .datasets()
            .replace_one(doc! { "_id": id }, &dataset)
            .await
            .map_err(SkiffError::store)?;
        if result.matched_count == 0 {
            return Err(SkiffError::not_found("dataset", id));
        }
        Ok(())
    }

    async fn delete_dataset(&self, id: &str) -> SkiffResult<()> {
        let result = self
            .datasets()
            .delete_one(doc! { "_id": id })
            .await
            .map_err(SkiffError::store)?;
        if result.deleted_count == 0 {
            return Err(SkiffError::not_found("dataset", id));
        }
        Ok(())
    }

    async fn list_datasets(&self, query: &ListQuery) -> SkiffResult<Vec<Dataset>> {
        let filter = match &query.user_id {
            Some(user_id) => doc! { "user_id": user_id },
            None => doc! {},
        };
        self.datasets()
            .find(filter)
            .sort(doc! { "created_at": -1 })
            .skip((query.page * query.page_size) as u64)
            .limit(query.page_size as i64)
            .await
            .map_err(SkiffError::store)?
            .try_collect()
            .await
            .map_err(SkiffError::store)
    }

    async fn create_workflow(&self, workflow: Workflow) -> SkiffResult<()> {
        self.workflows()
            .insert_one(&workflow)
            .await
            .map_err(SkiffError::store)?;
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> SkiffResult<Workflow> {
        self.fetch_workflow(id).await
    }

    async fn replace_workflow(&self, id: &str, workflow: Workflow) -> SkiffResult<()> {
        let result = self
            .workflows()
            .replace_one(doc! { "_id": id }, &workflow)
            .await
            .map_err(SkiffError::store)?;
        if result.matched_count == 0 {
            return Err(SkiffError::not_found("workflow", id));
        }
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> SkiffResult<()> {
        let result = self
            .workflows()
            .delete_one(doc! { "_id": id })
            .await
            .map_err(SkiffError::store)?;
        if result.deleted_count == 0 {
            return Err(SkiffError::not_found("workflow", id));
        }
        Ok(())
    }

    async fn list_workflows(&self, query: &ListQuery) -> SkiffResult<Vec<Workflow>> {
        let filter = match &query.user_id {
            Some(user_id) => doc! { "user_id": user_id },
            None => doc! {},
        };
        self.workflows()
            .find(filter)
            .sort(doc! { "created_at": -1 })
            .skip((query.page * query.page_size) as u64)
            .limit(query.page_size as i64)
            .await
            .map_err(SkiffError::store)?
            .try_collect()
            .await
            .map_err(SkiffError::store)
    }

    async fn append_attempt(
        &self,
        workflow_id: &str,
        inputs: Vec<InputParam>,
    ) -> SkiffResult<Attempt> {
        let mut workflow = self.fetch_workflow(workflow_id).await?;
        let attempt = workflow.begin_attempt(inputs)?;
        self.store_workflow(&workflow).await?;
        Ok(attempt)
    }

    async fn update_run_state(
        &self,
        workflow_id: &str,
        patch: RunStatePatch,
    ) -> SkiffResult<Workflow> {
        let mut workflow = self.fetch_workflow(workflow_id).await?;
        patch.apply(&mut workflow)?;
        self.store_workflow(&workflow).await?;
        Ok(workflow)
    }

    async fn delete_attempt(&self, workflow_id: &str, attempt_id: u32) -> SkiffResult<()> {
        let mut workflow = self.fetch_workflow(workflow_id).await?;
        let before = workflow.attempts.len();
        workflow.attempts.retain(|a| a.id != attempt_id);
        if workflow.attempts.len() == before {
            return Err(SkiffError::not_found("attempt", attempt_id.to_string()));
        }
        self.store_workflow(&workflow).await
    }

    async fn create_task(&self, task: TaskEvent) -> SkiffResult<()> {
        self.tasks()
            .insert_one(&task)
            .await
            .map_err(SkiffError::store)?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> SkiffResult<TaskEvent> {
        self.tasks()
            .find_one(doc! { "_id": id })
            .await
            .map_err(SkiffError::store)?
            .ok_or_else(|| SkiffError::not_found("task", id))
    }

    async fn list_tasks(&self, page: usize, page_size: usize) -> SkiffResult<Vec<TaskEvent>> {
        self.tasks()
            .find(doc! {})
            .sort(doc! { "utc_time": -1 })
            .skip((page * page_size) as u64)
            .limit(page_size as i64)
            .await
            .map_err(SkiffError::store)?
            .try_collect()
            .await
            .map_err(SkiffError::store)
    }
}
