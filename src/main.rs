// ABOUTME: shipline binary: tracing setup, output mode selection and command dispatch.
// ABOUTME: Any error ends the process with exit status 1.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use shipline::config::{self, Config};
use shipline::error::Result;
use shipline::output::{Output, OutputMode};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    if let Err(e) = run(cli, mode).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(&env::current_dir()?),
    }
}

async fn run(cli: Cli, mode: OutputMode) -> Result<()> {
    let output = Output::new(mode);
    match cli.command {
        Commands::Init { app, force } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, app.as_deref(), force)?;
            output.success(&format!("Wrote {}", config::CONFIG_FILENAME));
            Ok(())
        }
        Commands::Run {
            revision,
            tag,
            record,
        } => {
            let config = load_config(cli.config.as_deref())?;
            commands::run(config, revision, tag, record, output).await
        }
        Commands::Status => {
            let config = load_config(cli.config.as_deref())?;
            commands::status(config, output).await
        }
        Commands::Verify => {
            let config = load_config(cli.config.as_deref())?;
            commands::verify(config, output).await
        }
    }
}
