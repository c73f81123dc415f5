//! Cascade standalone runner
//!
//! Loads a program file, optionally patches memory and seeds input, then runs
//! a single machine or a wired cluster to completion.

use cascade::cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
