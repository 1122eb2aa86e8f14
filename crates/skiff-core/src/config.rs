use std::path::PathBuf;
use std::time::Duration;

use crate::error::{SkiffError, SkiffResult};

/// Target execution environment for the external pipeline runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorProfile {
    Local,
    PbsPro,
    K8s,
}

impl ExecutorProfile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "pbspro" => Some(Self::PbsPro),
            "k8s" => Some(Self::K8s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::PbsPro => "pbspro",
            Self::K8s => "k8s",
        }
    }

    /// Whether runs are handed to an external scheduler that needs its own
    /// out-of-band cancellation on top of local process signals.
    pub fn is_scheduled(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

/// Process-wide settings, loaded from environment variables with defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub executor: ExecutorProfile,
    pub workspace_dir: PathBuf,
    /// The external pipeline runner executable.
    pub runner_bin: String,
    /// Optional runner configuration file copied into each attempt directory.
    pub runner_config: Option<PathBuf>,
    /// Volume claim mounted into cluster runs (required for k8s).
    pub volume_claim: Option<String>,
    /// Post-run artifact export helper, invoked on completed attempts only.
    pub export_script: Option<PathBuf>,
    /// Scheduler-side cancellation helper for non-local profiles.
    pub cancel_script: Option<PathBuf>,
    /// Bounded wait for descendant processes to exit during cancellation.
    pub cancel_wait: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executor: std::env::var("SKIFF_EXECUTOR")
                .ok()
                .and_then(|v| ExecutorProfile::parse(&v))
                .unwrap_or(ExecutorProfile::Local),
            workspace_dir: std::env::var("SKIFF_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/workspace")),
            runner_bin: std::env::var("SKIFF_RUNNER").unwrap_or_else(|_| "nextflow".to_string()),
            runner_config: std::env::var("SKIFF_RUNNER_CONFIG").ok().map(PathBuf::from),
            volume_claim: std::env::var("SKIFF_VOLUME_CLAIM").ok(),
            export_script: std::env::var("SKIFF_EXPORT_SCRIPT").ok().map(PathBuf::from),
            cancel_script: std::env::var("SKIFF_CANCEL_SCRIPT").ok().map(PathBuf::from),
            cancel_wait: std::env::var("SKIFF_CANCEL_WAIT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(10)),
        }
    }
}

impl Settings {
    /// Load settings from the environment, rejecting combinations that
    /// cannot work (a k8s profile with no volume claim to mount).
    pub fn from_env() -> SkiffResult<Self> {
        let settings = Self::default();
        if settings.executor == ExecutorProfile::K8s && settings.volume_claim.is_none() {
            return Err(SkiffError::Config(
                "k8s executor requires SKIFF_VOLUME_CLAIM".to_string(),
            ));
        }
        Ok(settings)
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.workspace_dir.join("_datasets")
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.workspace_dir.join("_workflows")
    }

    pub fn traces_dir(&self) -> PathBuf {
        self.workspace_dir.join("_traces")
    }

    pub fn dataset_dir(&self, dataset_id: &str) -> PathBuf {
        self.datasets_dir().join(dataset_id)
    }

    pub fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.workflows_dir().join(workflow_id)
    }

    /// Absolute output directory for one attempt; `output_dir` is the
    /// attempt-relative path stored on the record.
    pub fn attempt_dir(&self, workflow_id: &str, output_dir: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join(output_dir)
    }
}
