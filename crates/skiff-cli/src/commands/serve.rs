use std::net::SocketAddr;

use tokio::fs;
use tracing::info;

use skiff_core::config::Settings;
use skiff_web::ApiServer;

use crate::cli::ServeArgs;

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    // workspace directories the handlers write into
    fs::create_dir_all(settings.datasets_dir()).await?;
    fs::create_dir_all(settings.workflows_dir()).await?;
    fs::create_dir_all(settings.traces_dir()).await?;

    let target = args.store.target()?;
    let store = target.open().await?;
    info!(
        backend = %args.store.backend,
        executor = settings.executor.as_str(),
        "record store opened"
    );

    let server = ApiServer::new(store, settings, target.to_args());
    let addr: SocketAddr = args.addr.parse()?;
    server.serve(addr).await.await?;
    Ok(())
}
