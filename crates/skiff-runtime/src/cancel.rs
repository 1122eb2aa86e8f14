use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use skiff_core::config::Settings;
use skiff_core::models::Workflow;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Forcefully terminate the process tree rooted at `root`.
///
/// Descendants are enumerated and killed before the root: once the root is
/// gone, the parent links the enumeration depends on may no longer be
/// queryable, leaving orphaned workers behind. Processes that disappear
/// between enumeration and signaling are not errors (the target may simply
/// have exited), so missing pids are skipped at every step. The wait on
/// descendants is bounded; anything still alive afterwards has already been
/// sent the kill signal.
pub async fn terminate_process_tree(root: u32, wait: Duration) {
    let root = Pid::from_u32(root);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let descendants = collect_descendants(&system, root);
    debug!(root = root.as_u32(), descendants = descendants.len(), "killing process tree");

    for pid in &descendants {
        if let Some(process) = system.process(*pid) {
            process.kill_with(Signal::Kill);
        }
    }

    let deadline = tokio::time::Instant::now() + wait;
    loop {
        system.refresh_processes(ProcessesToUpdate::Some(&descendants), true);
        let alive = descendants
            .iter()
            .filter(|pid| system.process(**pid).is_some())
            .count();
        if alive == 0 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(root = root.as_u32(), alive, "descendants still alive after bounded wait");
            break;
        }
        sleep(POLL_INTERVAL).await;
    }

    system.refresh_processes(ProcessesToUpdate::Some(&[root]), true);
    if let Some(process) = system.process(root) {
        process.kill_with(Signal::Kill);
    }
}

fn collect_descendants(system: &System, root: Pid) -> Vec<Pid> {
    let mut descendants = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) {
                frontier.push(*pid);
                descendants.push(*pid);
            }
        }
    }
    descendants
}

/// Cancel the running attempt of `workflow`: kill the recorded process tree,
/// then issue the out-of-band scheduler cancellation for cluster profiles.
/// Every failure mode here is best-effort and swallowed; the caller is
/// responsible for writing the canceled status and resetting the pid.
pub async fn cancel_workflow(workflow: &Workflow, settings: &Settings) {
    if workflow.pid >= 0 {
        info!(workflow = %workflow.id, pid = workflow.pid, "terminating runner process tree");
        terminate_process_tree(workflow.pid as u32, settings.cancel_wait).await;
    }

    if settings.executor.is_scheduled() {
        let Some(script) = &settings.cancel_script else {
            debug!(workflow = %workflow.id, "no scheduler cancel helper configured");
            return;
        };
        match Command::new(script).arg(workflow.run_name()).output().await {
            Ok(output) if output.status.success() => {
                info!(workflow = %workflow.id, "scheduler run canceled");
            }
            Ok(output) => {
                warn!(
                    workflow = %workflow.id,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "scheduler cancel helper failed"
                );
            }
            Err(err) => {
                warn!(workflow = %workflow.id, error = %err, "scheduler cancel helper did not start");
            }
        }
    }
}
