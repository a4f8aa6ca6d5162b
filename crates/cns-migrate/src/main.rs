use anyhow::Result;
use clap::Parser;
use cns_migrate::cli::Cli;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current volume before stopping");
            signal.cancel();
        }
    });

    let report = cli.run(cancel).await?;
    if report.has_failures() {
        tracing::warn!(
            failed = report.count(cns_migrate::types::OutcomeState::Failed),
            "one or more volumes failed to migrate"
        );
    } else {
        tracing::info!("migration finished");
    }
    Ok(())
}
