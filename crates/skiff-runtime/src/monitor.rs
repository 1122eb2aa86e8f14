use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::{error, info, warn};

use skiff_core::config::Settings;
use skiff_core::error::{SkiffError, SkiffResult};
use skiff_core::models::{Attempt, RunStatePatch, Workflow};
use skiff_core::status::AttemptStatus;
use skiff_state::RecordStore;

use crate::launcher;

/// Signal the canceler delivers to the runner's process tree. A child
/// terminated by it is classified as canceled rather than failed.
pub const CANCEL_SIGNAL: i32 = 9;

/// Map a runner exit status to the attempt's terminal state.
pub fn classify_exit(status: ExitStatus) -> AttemptStatus {
    if status.code() == Some(0) {
        AttemptStatus::Completed
    } else if status.signal() == Some(CANCEL_SIGNAL) {
        AttemptStatus::Canceled
    } else {
        AttemptStatus::Failed
    }
}

/// Top-level routine of the monitor worker process.
///
/// Runs in its own OS process so the serving process is never blocked by the
/// runner's lifetime; the caller has already re-opened `store` from pure
/// configuration on this side of the process boundary. Each status write is
/// a read-modify-write against the authoritative record, since the workflow
/// may have been edited since the launching request's copy.
pub async fn monitor_attempt(
    store: &dyn RecordStore,
    settings: &Settings,
    workflow_id: &str,
    resume: bool,
) -> SkiffResult<()> {
    let workflow = store.get_workflow(workflow_id).await?;
    let attempt = workflow
        .current_attempt()
        .cloned()
        .ok_or_else(|| SkiffError::NoAttempts {
            workflow: workflow_id.to_string(),
        })?;

    let mut handle = match launcher::launch(&workflow, &attempt, settings, resume) {
        Ok(handle) => handle,
        Err(err) => {
            error!(workflow = workflow_id, error = %err, "runner failed to start");
            return Err(err);
        }
    };

    store
        .update_run_state(workflow_id, RunStatePatch::pid(handle.pid as i32))
        .await?;
    info!(workflow = workflow_id, pid = handle.pid, "waiting for runner to finish");

    let status = handle.wait().await?;
    let outcome = classify_exit(status);
    info!(workflow = workflow_id, outcome = %outcome, "runner exited");

    // The pid is left at its last recorded value; only the cancel path
    // resets it.
    store
        .update_run_state(workflow_id, RunStatePatch::status(outcome))
        .await?;

    if outcome == AttemptStatus::Completed {
        if let Err(err) = export_outputs(&workflow, &attempt, settings).await {
            warn!(workflow = workflow_id, error = %err, "output export failed");
        }
    }

    Ok(())
}

/// Run the post-run artifact export helper as a blocked subprocess. Its
/// failure never reverts the completed classification already written.
async fn export_outputs(
    workflow: &Workflow,
    attempt: &Attempt,
    settings: &Settings,
) -> SkiffResult<()> {
    let Some(script) = &settings.export_script else {
        return Ok(());
    };
    let output_dir = settings.attempt_dir(&workflow.id, &attempt.output_dir);

    let output = Command::new(script)
        .arg(&workflow.id)
        .arg(attempt.id.to_string())
        .arg(&output_dir)
        .output()
        .await
        .map_err(|source| SkiffError::Launch {
            program: script.display().to_string(),
            source,
        })?;

    if output.status.success() {
        info!(workflow = %workflow.id, attempt = attempt.id, "outputs exported");
        Ok(())
    } else {
        Err(SkiffError::Export(format!(
            "{} exited with {}: {}",
            script.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Spawn the monitor worker for a freshly appended attempt by re-executing
/// the current binary with the hidden `monitor` subcommand. Returns the
/// worker's pid; a detached task reaps it when it exits.
pub fn spawn_worker(workflow_id: &str, resume: bool, store_args: &[String]) -> SkiffResult<u32> {
    let exe = std::env::current_exe().map_err(|source| SkiffError::Launch {
        program: "current executable".to_string(),
        source,
    })?;

    let mut command = Command::new(&exe);
    command.arg("monitor").arg("--id").arg(workflow_id);
    if resume {
        command.arg("--resume");
    }
    command.args(store_args).stdin(Stdio::null());

    let mut child = command.spawn().map_err(|source| SkiffError::Launch {
        program: exe.display().to_string(),
        source,
    })?;
    let pid = child.id().ok_or_else(|| SkiffError::Launch {
        program: exe.display().to_string(),
        source: std::io::Error::other("worker exited before its pid could be read"),
    })?;
    info!(workflow = workflow_id, worker_pid = pid, "monitor worker spawned");

    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    Ok(pid)
}
