//! CLI for tiermq: loads configuration and runs the WebSocket broker until
//! interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tiermq::broker::Broker;
use tiermq::config::load_config_from;
use tiermq::transport::WsServer;
use tiermq::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tiermq", version, about = "MQTT-style publish/subscribe broker")]
struct Args {
    /// Extra configuration file layered over config/default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set (overrides configuration)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    let settings = match load_config_from(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("error");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(args.log_level.as_deref().unwrap_or(&settings.logging.level));

    let broker = Arc::new(Broker::new());
    let server = match WsServer::bind(&settings.server.address()).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        _ = server.serve(broker, settings.broker.max_connections) => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    ExitCode::SUCCESS
}
