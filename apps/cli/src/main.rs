//! judgeloop CLI: judged LLM batch processing and a course recommender.
//!
//! Runs support-case reports through anonymization and classification,
//! each checked by a judge model, and serves course search over a local
//! vector index.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli)?;
    commands::run(cli).await
}
