use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use propsim::api::{Cli, run_cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries protocol messages; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run_cli(cli).await {
        error!(error = %e, "propsim exited with an error");
        std::process::exit(1);
    }
}
