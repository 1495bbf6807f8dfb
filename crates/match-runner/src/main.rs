use anyhow::Result;
use clap::Parser;
use match_runner::cli::Cli;
use match_runner::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received; finishing in-flight debates");
                on_signal.cancel();
            }
            Err(e) => warn!("Failed to listen for ctrl-c: {e}"),
        }
    });

    match_runner::run(cli, cancel).await
}
