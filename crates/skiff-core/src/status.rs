use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SkiffError, SkiffResult};

/// Lifecycle state of a workflow record.
///
/// `nascent -> running -> {completed, failed, canceled}`. A terminal state
/// may re-enter `running` when the workflow is launched again; `nascent` is
/// never re-entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Nascent,
    Running,
    Completed,
    Failed,
    Canceled,
}

/// Lifecycle state of a single attempt. Attempts are born `running`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Canceled
        )
    }

    /// The single transition function shared by the monitor and the cancel
    /// path. Returns the new status, or `InvalidTransition` for edges the
    /// machine does not allow. Same-state transitions are accepted so that
    /// two writers racing to the same conclusion do not error.
    pub fn transition(self, to: WorkflowStatus) -> SkiffResult<WorkflowStatus> {
        let legal = match (self, to) {
            (from, to) if from == to && from != WorkflowStatus::Nascent => true,
            (WorkflowStatus::Nascent, WorkflowStatus::Running) => true,
            (WorkflowStatus::Running, to) if to.is_terminal() => true,
            (from, WorkflowStatus::Running) if from.is_terminal() => true,
            _ => false,
        };
        if legal {
            Ok(to)
        } else {
            Err(SkiffError::InvalidTransition { from: self, to })
        }
    }
}

impl From<AttemptStatus> for WorkflowStatus {
    fn from(status: AttemptStatus) -> Self {
        match status {
            AttemptStatus::Running => WorkflowStatus::Running,
            AttemptStatus::Completed => WorkflowStatus::Completed,
            AttemptStatus::Failed => WorkflowStatus::Failed,
            AttemptStatus::Canceled => WorkflowStatus::Canceled,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStatus::Nascent => "nascent",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        WorkflowStatus::from(*self).fmt(f)
    }
}
