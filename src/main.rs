mod cli;
mod config;
mod engine;
mod error;
mod model;
mod stats;
mod storage;
mod target;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args).await
}
