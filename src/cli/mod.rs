//! CLI module for LLM Catcher
//!
//! Provides commands:
//! - `serve`: demo HTTP server with the diagnosis middleware
//! - `diagnose`: diagnose a stack trace from a file or stdin
//! - `config`: print the resolved configuration
//! - `demo`: run failing functions under the wrappers and the panic hook

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod config;
pub mod demo;
pub mod diagnose;
pub mod serve;

/// LLM Catcher CLI
#[derive(Parser, Debug)]
#[command(name = "llm-catcher")]
#[command(about = "Diagnose panics and errors with a language model")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the demo server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
    /// Diagnose a stack trace (reads stdin when no file is given)
    Diagnose {
        /// File holding the trace
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Print the diagnosis without the banner
        #[arg(long)]
        plain: bool,
    },
    /// Show the resolved configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the wrapper and panic hook demo
    Demo,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve { port }) => serve::run(port).await,
        Some(Commands::Diagnose { file, plain }) => diagnose::run(file, plain).await,
        Some(Commands::Config { json }) => config::run(json),
        Some(Commands::Demo) => demo::run().await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
