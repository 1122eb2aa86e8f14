use clap::{Args, Parser, Subcommand};

use skiff_core::error::SkiffResult;
use skiff_state::StoreTarget;

#[derive(Parser)]
#[command(name = "skiff", about = "Launch and supervise external pipeline runs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Supervise the latest attempt of one workflow. This is the entry
    /// point of the worker process spawned on launch, not a user command.
    #[command(hide = true)]
    Monitor(MonitorArgs),
}

#[derive(Args)]
pub struct StoreArgs {
    /// Record store backend (`file` or `mongo`)
    #[arg(long, default_value = "file")]
    pub backend: String,

    /// Snapshot file path (file backend) or connection string (mongo)
    #[arg(long, default_value = "skiff-db.json")]
    pub database: String,
}

impl StoreArgs {
    pub fn target(&self) -> SkiffResult<StoreTarget> {
        StoreTarget::parse(&self.backend, &self.database)
    }
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Address to bind (e.g., 0.0.0.0:8080)
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: String,
}

#[derive(Args)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Workflow id whose latest attempt to supervise
    #[arg(long)]
    pub id: String,

    /// Pass the runner's resume flag
    #[arg(long)]
    pub resume: bool,
}
