use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gateplane::cli::{self, Cli, Commands};
use gateplane::observability::{init_observability, log_config_info};
use gateplane::{Config, Error, Result, Server, APP_NAME, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    // This must happen before any config is read from environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let mut cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.take().unwrap_or(Commands::Serve) {
        Commands::Check => {
            let statuses = cli::check(&config, &cli.manifest).await?;
            let rendered = serde_json::to_string_pretty(&statuses)
                .map_err(|e| Error::internal(format!("Failed to render statuses: {}", e)))?;
            println!("{}", rendered);
            Ok(())
        }
        Commands::Serve => serve(config, cli.manifest).await,
    }
}

async fn serve(config: Config, manifest: PathBuf) -> Result<()> {
    init_observability(&config.observability)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting gateplane Envoy control plane");
    log_config_info(&config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    let result = Server::new(config, manifest).run(shutdown).await;
    if let Err(e) = &result {
        error!(error = %e, "gateplane stopped with an error");
    }
    result
}
