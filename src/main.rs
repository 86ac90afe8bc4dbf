mod api;
mod config;
mod errors;
mod filename;
mod google;
mod orchestrator;
mod sheet;
mod state;
mod upload;
mod video;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::state::AppState;

/// Download videos from social and shop pages and store them in Google Drive.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Process pending sheet rows once and print the summary as JSON.
    SyncSheet {
        /// Maximum number of rows to process; 0 means all.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn init_logging() {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filters)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for shutdown signal: {e}");
    }
    log::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let orchestrator = Arc::new(
        state::build_orchestrator(&config).context("Cannot initialize the relay")?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let listener = tokio::net::TcpListener::bind(&config.listen_addr)
                .await
                .with_context(|| format!("Cannot bind {}", config.listen_addr))?;
            log::info!("Listening on {}", config.listen_addr);
            let app = api::router(Arc::new(AppState::new(orchestrator)));
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::SyncSheet { limit } => {
            let summary = orchestrator.process_rows(limit).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
