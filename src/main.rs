//! delve binary entry point.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use delve::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_env("DELVE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(cli::log_directive(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, shutting down");
            on_interrupt.cancel();
        }
    });

    if let Err(e) = cli::run(cli.command, cancel).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
