use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};

use ipk25_chat::{cli::Cli, client};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match client::run(cli).await {
        Ok(end) => {
            info!(?end, "session ended");
            ExitCode::SUCCESS
        }
        Err(err) => {
            warn!("client exited with error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
