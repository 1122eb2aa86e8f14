use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{SkiffError, SkiffResult};
use crate::status::{AttemptStatus, WorkflowStatus};

/// Sentinel pid recorded on a workflow with no active runner process.
pub const NO_PID: i32 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Guest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            password_hash: password_hash.into(),
            role,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub experiment: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub n_files: u32,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(user_id: impl Into<String>, experiment: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            experiment: experiment.to_lowercase(),
            author: String::new(),
            description: String::new(),
            n_files: 0,
            created_at: Utc::now(),
        }
    }
}

/// How an input parameter's value is interpreted when the runner command
/// line is built: passed through verbatim, or resolved as a path relative
/// to the dataset root.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InputKind {
    #[serde(rename = "value")]
    Value,
    #[serde(rename = "file-path")]
    FilePath,
    #[serde(rename = "directory-path")]
    DirectoryPath,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputParam {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InputKind,
    pub value: String,
}

/// One execution of a workflow. Attempts are identified by their 1-based
/// sequence number within the workflow; only the most recently appended
/// attempt is ever mutated, older attempts are immutable history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    pub id: u32,
    pub inputs: Vec<InputParam>,
    pub date_submitted: DateTime<Utc>,
    pub status: AttemptStatus,
    pub output_dir: String,
}

impl Attempt {
    pub fn new(id: u32, inputs: Vec<InputParam>) -> Self {
        Self {
            id,
            inputs,
            date_submitted: Utc::now(),
            status: AttemptStatus::Running,
            output_dir: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub pipeline: String,
    pub revision: String,
    pub profiles: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub status: WorkflowStatus,
    pub n_attempts: u32,
    pub attempts: Vec<Attempt>,
    pub pid: i32,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(user_id: impl Into<String>, pipeline: &str, revision: &str, profiles: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            pipeline: pipeline.to_lowercase(),
            revision: revision.to_string(),
            profiles: profiles.to_string(),
            name: String::new(),
            author: String::new(),
            description: String::new(),
            status: WorkflowStatus::Nascent,
            n_attempts: 0,
            attempts: Vec::new(),
            pid: NO_PID,
            created_at: Utc::now(),
        }
    }

    /// Symbolic name of the current run, used both as the runner's run label
    /// and as the target of scheduler-side cancellation.
    pub fn run_name(&self) -> String {
        format!("workflow-{}-{:04}", self.id, self.n_attempts)
    }

    pub fn current_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Flip the workflow to running and append the next attempt. The caller
    /// (a store backend) is responsible for holding its lock around the
    /// surrounding reload/save cycle; that is what makes the
    /// append-and-increment atomic with respect to concurrent launches.
    pub fn begin_attempt(&mut self, inputs: Vec<InputParam>) -> SkiffResult<Attempt> {
        self.status = self.status.transition(WorkflowStatus::Running)?;
        self.n_attempts += 1;
        let attempt = Attempt::new(self.n_attempts, inputs);
        self.attempts.push(attempt.clone());
        Ok(attempt)
    }
}

/// Sparse patch applied to a workflow's run state: the workflow status
/// (mirrored onto the current attempt) and/or the recorded pid. Nothing
/// else is touched, so concurrent unrelated edits are not clobbered.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStatePatch {
    pub status: Option<AttemptStatus>,
    pub pid: Option<i32>,
}

impl RunStatePatch {
    pub fn status(status: AttemptStatus) -> Self {
        Self {
            status: Some(status),
            pid: None,
        }
    }

    pub fn pid(pid: i32) -> Self {
        Self {
            status: None,
            pid: Some(pid),
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: Some(AttemptStatus::Canceled),
            pid: Some(NO_PID),
        }
    }

    /// Apply the patch in memory, validating the status change through the
    /// shared transition function. Both store backends go through here so
    /// the monitor and the cancel path see one state machine.
    pub fn apply(self, workflow: &mut Workflow) -> SkiffResult<()> {
        if let Some(status) = self.status {
            workflow.status = workflow.status.transition(WorkflowStatus::from(status))?;
            if let Some(attempt) = workflow.attempts.last_mut() {
                attempt.status = status;
            }
        }
        if let Some(pid) = self.pid {
            workflow.pid = pid;
        }
        Ok(())
    }
}

/// Trace event posted by the pipeline runner while a run is in flight.
/// The payload shape is owned by the runner; it is stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    #[serde(rename = "_id")]
    pub id: String,
    pub run_name: String,
    pub event: String,
    pub utc_time: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl TaskEvent {
    pub fn new(run_name: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_name: run_name.into(),
            event: event.into(),
            utc_time: Utc::now(),
            payload,
        }
    }
}

impl Workflow {
    /// Look up an attempt by its 1-based id.
    pub fn attempt(&self, attempt_id: u32) -> SkiffResult<&Attempt> {
        self.attempts
            .iter()
            .find(|a| a.id == attempt_id)
            .ok_or_else(|| SkiffError::not_found("attempt", attempt_id.to_string()))
    }
}
