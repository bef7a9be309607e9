//! Command-line surface.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::dispatcher::DispatcherConfig;

/// Conditional webhook step for multi-step event pipelines.
#[derive(Debug, Parser)]
#[command(name = "pipeline-webhook")]
#[command(about = "Fires webhooks when pipeline events match a condition")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept pipeline events over HTTP and forward them to their next step.
    Server(ServerArgs),

    /// Read newline-delimited events from stdin and write advanced events to stdout.
    Std(StoreArgs),
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Postgres connection string for shared call tracking. In-memory when unset.
    #[arg(short = 'd', long, env = "DB_URL")]
    pub db_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Seconds to wait for in-flight forwards on shutdown.
    #[arg(long, default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    #[command(flatten)]
    pub store: StoreArgs,
}

impl ServerArgs {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            ..Default::default()
        }
    }
}
