use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use sparky::constants;
use sparky::relay::CompletionRelay;
use sparky::web_server;

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the Sparky web chat server.
    Start {
        #[arg(long, default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
    },
    /// List the available model catalog.
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Initialize tracing (logging) subscriber
    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,sparky=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => {
            info!("Starting Sparky web server on port {}...", port);

            let relay = Arc::new(CompletionRelay::new());
            let mut web_server_handle = tokio::spawn(async move {
                web_server::start_web_server(port, relay)
                    .await
                    .context("Web server failed")
            });

            // Keep the main task alive until Ctrl-C or server exit
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(Ok(())) => info!("Web server task completed unexpectedly."),
                        Ok(Err(e)) => error!("Web server failed: {:?}", e),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Models => {
            for entry in constants::model_catalog() {
                println!("{} -> {}", entry.label, entry.slug);
            }
        }
    }

    Ok(())
}
