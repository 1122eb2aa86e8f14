pub mod cancel;
pub mod launcher;
pub mod monitor;

pub use cancel::{cancel_workflow, terminate_process_tree};
pub use launcher::{launch, RunnerHandle, ATTEMPT_LOG_FILE};
pub use monitor::{classify_exit, monitor_attempt, spawn_worker};
