//! LLM Catcher - diagnose panics and errors with a language model
//!
//! CLI entry point: demo server, trace diagnosis and config inspection.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "llm_catcher=info,catcher_core=info,catcher_llm=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = cli::Cli::parse();
    debug!("llm-catcher v{}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
