//! Docker Blob Sync binary

use clap::Parser;
use docker_blob_sync::cli::{Args, Runner};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runner = Runner::new(args);
    if let Err(e) = runner.run().await {
        runner.report(&e);
        process::exit(1);
    }
}
