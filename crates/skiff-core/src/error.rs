use std::path::PathBuf;

use thiserror::Error;

use crate::status::WorkflowStatus;

#[derive(Debug, Error)]
pub enum SkiffError {
    #[error("{kind} {id:?} was not found")]
    NotFound { kind: &'static str, id: String },

    #[error("user {username:?} already exists")]
    AlreadyExists { username: String },

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("workflow {workflow} has no attempts")]
    NoAttempts { workflow: String },

    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("json parse error in {path}: {source}")]
    JsonParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("output export failed: {0}")]
    Export(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SkiffError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SkiffError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Wrap a backend driver error that has no meaningful path to attach.
    pub fn store(err: impl std::fmt::Display) -> Self {
        SkiffError::Store(err.to_string())
    }
}

pub type SkiffResult<T> = Result<T, SkiffError>;
