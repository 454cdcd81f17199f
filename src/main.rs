//! LoM transport - engine and admin entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lom_transport::client::request_engine_shutdown;
use lom_transport::config::{ConfigLoader, TransportConfig};
use lom_transport::engine::Engine;
use lom_transport::server::{RpcServer, ServerError, TransportCore};

#[derive(Parser)]
#[command(
    name = "lom-transport",
    about = "Engine and plugin host transport for link fault management",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file; defaults to the standard search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured listening address.
    #[arg(short, long, global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the listener and engine until Ctrl-C or a shutdown request.
    Engine,
    /// Ask a running engine to shut down.
    Shutdown,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

async fn run_engine(config: TransportConfig) -> Result<(), ServerError> {
    let core = Arc::new(TransportCore::from_config(&config));
    let (engine, handle) = Engine::new(&config, Arc::clone(&core));
    let server = RpcServer::new(&config, core).start().await?;

    tracing::info!(address = %server.local_addr(), "Engine listening");

    let ctrl_c = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C, shutting down");
                handle.shutdown();
            }
        })
    };

    engine.run().await;
    server.shutdown();
    ctrl_c.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(address) = cli.address {
        config = config.with_address(address);
    }

    let result = match cli.command {
        Commands::Engine => run_engine(config).await.map_err(|e| e.to_string()),
        Commands::Shutdown => request_engine_shutdown(&config)
            .await
            .map_err(|e| e.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("lom-transport: {e}");
            ExitCode::FAILURE
        }
    }
}
