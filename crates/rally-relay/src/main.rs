//! Rendezvous relay for Rally sessions.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p rally-relay -- --bind 0.0.0.0:7878`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rally_config::{CliArgs, Config, ConfigError};
use rally_net::{RelayServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "rally-relay", about = "Rendezvous relay for Rally sessions")]
struct Cli {
    #[command(flatten)]
    common: CliArgs,
}

/// Resolve the config directory, load the config and apply CLI overrides.
fn load_config(args: &CliArgs) -> Result<(PathBuf, Config), ConfigError> {
    let config_dir = args
        .config
        .clone()
        .or_else(|| Config::default_dir().ok())
        .unwrap_or_else(|| PathBuf::from(".rally"));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(args);
    config.validate()?;
    Ok((config_dir, config))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config_dir, config) = match load_config(&cli.common) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_dir = config_dir.join("logs");
    rally_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let server_config = match ServerConfig::from_config(&config.relay) {
        Ok(server_config) => server_config,
        Err(e) => {
            tracing::error!("Invalid bind address {:?}: {e}", config.relay.bind_address);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        "Starting relay (max {} connections, {} byte frames)",
        server_config.max_connections,
        server_config.frame.max_payload_size
    );

    let server = Arc::new(RelayServer::new(server_config));
    let runner = Arc::clone(&server);
    let mut task = tokio::spawn(async move { runner.run().await });

    let result = tokio::select! {
        result = &mut task => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
            server.shutdown();
            task.await
        }
    };

    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            tracing::error!("Relay failed: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("Relay task panicked: {e}");
            ExitCode::FAILURE
        }
    }
}
