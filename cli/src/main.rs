//! Entry point for the `fleet` binary.
use std::process::ExitCode;

use clap::Parser;
use fleet_cli::Cli;
use fleet_cli::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    run_main(cli).await
}
