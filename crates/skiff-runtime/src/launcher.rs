use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::info;

use skiff_core::config::{ExecutorProfile, Settings};
use skiff_core::error::{SkiffError, SkiffResult};
use skiff_core::models::{Attempt, InputKind, Workflow};

/// Console output of an in-flight run, created inside the attempt's output
/// directory. This fixed name is the only externally readable record of a
/// run before it finishes.
pub const ATTEMPT_LOG_FILE: &str = ".workflow.log";

/// The runner's own log file, passed via its `-log` flag.
pub const RUNNER_LOG_FILE: &str = "runner.log";

/// Live handle on a started runner process.
pub struct RunnerHandle {
    pub pid: u32,
    program: String,
    child: Child,
}

impl RunnerHandle {
    /// Block until the runner exits. Unbounded: pipelines may run for days.
    pub async fn wait(&mut self) -> SkiffResult<ExitStatus> {
        self.child.wait().await.map_err(|source| SkiffError::Launch {
            program: self.program.clone(),
            source,
        })
    }
}

/// Build the runner argument vector for one attempt. The executor profile
/// selects between a plain run and a cluster submission; dataset-relative
/// inputs are resolved to absolute paths under the dataset root.
pub fn build_args(
    workflow: &Workflow,
    attempt: &Attempt,
    settings: &Settings,
    resume: bool,
) -> Vec<String> {
    let output_dir = settings.attempt_dir(&workflow.id, &attempt.output_dir);

    let mut args = vec![
        "-log".to_string(),
        output_dir.join(RUNNER_LOG_FILE).display().to_string(),
    ];
    args.push(match settings.executor {
        ExecutorProfile::K8s => "kuberun".to_string(),
        ExecutorProfile::Local | ExecutorProfile::PbsPro => "run".to_string(),
    });
    args.push(workflow.pipeline.clone());
    args.extend([
        "-ansi-log".to_string(),
        "false".to_string(),
        "-latest".to_string(),
        "-name".to_string(),
        workflow.run_name(),
        "-profile".to_string(),
        workflow.profiles.clone(),
        "-revision".to_string(),
        workflow.revision.clone(),
    ]);
    if settings.executor == ExecutorProfile::K8s {
        if let Some(claim) = &settings.volume_claim {
            args.extend(["-volume-mount".to_string(), claim.clone()]);
        }
    }

    for input in &attempt.inputs {
        let value = match input.kind {
            InputKind::FilePath | InputKind::DirectoryPath => settings
                .datasets_dir()
                .join(&input.value)
                .display()
                .to_string(),
            InputKind::Value => input.value.clone(),
        };
        args.push(input.name.clone());
        args.push(value);
    }

    args.extend([
        "--outdir".to_string(),
        output_dir.display().to_string(),
    ]);
    if resume {
        args.push("-resume".to_string());
    }
    args
}

/// Start the runner as a child process with stdout and stderr redirected to
/// the attempt log file, returning immediately with a pid + wait handle.
///
/// Deliberately writes nothing to the record store: pid persistence is the
/// monitor's job, which keeps launch failures (runner binary missing)
/// distinguishable from monitor failures.
pub fn launch(
    workflow: &Workflow,
    attempt: &Attempt,
    settings: &Settings,
    resume: bool,
) -> SkiffResult<RunnerHandle> {
    let output_dir = settings.attempt_dir(&workflow.id, &attempt.output_dir);
    let log_path = output_dir.join(ATTEMPT_LOG_FILE);
    let log = std::fs::File::create(&log_path).map_err(|source| SkiffError::WriteFile {
        path: log_path.clone(),
        source,
    })?;
    let log_err = log.try_clone().map_err(|source| SkiffError::WriteFile {
        path: log_path,
        source,
    })?;

    let args = build_args(workflow, attempt, settings, resume);
    let child = Command::new(&settings.runner_bin)
        .args(&args)
        .current_dir(&output_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|source| SkiffError::Launch {
            program: settings.runner_bin.clone(),
            source,
        })?;
    let pid = child.id().ok_or_else(|| SkiffError::Launch {
        program: settings.runner_bin.clone(),
        source: std::io::Error::other("runner exited before its pid could be read"),
    })?;

    info!(
        workflow = %workflow.id,
        attempt = attempt.id,
        pid,
        "runner started"
    );

    Ok(RunnerHandle {
        pid,
        program: settings.runner_bin.clone(),
        child,
    })
}
