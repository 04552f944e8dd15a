// ABOUTME: clap definition of the shipline command line.
// ABOUTME: Global output flags plus the init, run, status and verify subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shipline")]
#[command(about = "Build, publish and roll out a container image to a single-node Kubernetes host")]
#[command(version)]
pub struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (default: discover shipline.yml in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a template shipline.yml
    Init {
        /// Application name
        #[arg(long)]
        app: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run the pipeline for a source revision
    Run {
        /// Revision to deploy
        #[arg(long, env = "GITHUB_SHA")]
        revision: Option<String>,

        /// Image tag (default: abbreviated revision)
        #[arg(long)]
        tag: Option<String>,

        /// Write the run record as JSON to this file
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// Show the rollout status of the deployment target
    Status,

    /// Run only the health check against the deployed service
    Verify,
}
