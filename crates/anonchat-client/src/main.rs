use clap::Parser;
use tracing::info;

use anonchat_client::cli::Cli;
use anonchat_client::config::ClientConfig;
use anonchat_client::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Parse arguments and initialize tracing (respects RUST_LOG)
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    anonchat_client::init_tracing();

    info!("Starting anonchat client v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration; missing backend settings are fatal
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env()?;
    info!(url = %config.url, channel = %config.channel, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open local state and connect
    // -----------------------------------------------------------------------
    let state = AppState::open(config)?;

    // -----------------------------------------------------------------------
    // 4. Run the command until it finishes or Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        result = anonchat_client::run(cli, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
