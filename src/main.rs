use std::io::IsTerminal;
use std::net::SocketAddr;

use clap::Parser;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_webhook::cli::{Cli, Command};
use pipeline_webhook::{open_store, run_stdio, server, Dispatcher, DispatcherConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stream mode keeps stdout for events.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_webhook=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Server(args) => {
            let store = open_store(args.store.db_url.as_deref()).await?;
            let dispatcher = Dispatcher::with_store(args.dispatcher_config(), store);

            let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
            let listener = TcpListener::bind(addr).await?;
            info!(%addr, "listening");

            server::serve(listener, dispatcher, server::shutdown_signal()).await?;
        }
        Command::Std(args) => {
            if std::io::stdin().is_terminal() {
                return Err("no input from pipe".into());
            }

            let store = open_store(args.db_url.as_deref()).await?;
            let dispatcher = Dispatcher::with_store(DispatcherConfig::default(), store);

            let written =
                run_stdio(&dispatcher, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                    .await?;
            info!(events = written, "input exhausted");
        }
    }

    Ok(())
}
