//! Binary entry point: parses `--config`, initializes logging, and runs
//! the accept loop until terminated.

use std::path::PathBuf;
use std::process::ExitCode;

use castfront::handlers::LoggingHandlers;
use castfront::server::spawn_signal_forwarder;
use castfront::Server;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "castfrontd", about = "Streaming media server connection front-end")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "castfront.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    // A real deployment wires admin/fileserve/source/stats here instead of
    // the logging-only stand-in.
    let handlers = std::sync::Arc::new(LoggingHandlers);

    let server = match Server::bootstrap(&args.config, handlers) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, config = %args.config.display(), "failed to start");
            return ExitCode::FAILURE;
        }
    };

    spawn_signal_forwarder(server.control_sender());
    server.run().await;
    ExitCode::SUCCESS
}
