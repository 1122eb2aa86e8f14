use tracing::info;

use skiff_core::config::Settings;

use crate::cli::MonitorArgs;

/// Worker-process entry point. The record store is rebuilt here from the
/// command-line flags alone; nothing is inherited from the serving process.
pub async fn run(args: MonitorArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let store = args.store.target()?.open().await?;

    info!(workflow = %args.id, "monitor worker started");
    skiff_runtime::monitor_attempt(store.as_ref(), &settings, &args.id, args.resume).await?;
    Ok(())
}
