// ABOUTME: Crate-level error type returned by configuration loading and the CLI commands.
// ABOUTME: Pipeline stage failures are mapped into RunFailed or RunAborted.

use crate::cluster::ClusterError;
use crate::pipeline::{FailureKind, Stage};
use crate::remote::RemoteError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("missing revision: pass --revision or set GITHUB_SHA")]
    MissingRevision,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pipeline failed at {stage} ({kind}): {reason}")]
    RunFailed {
        stage: Stage,
        kind: FailureKind,
        reason: String,
    },

    #[error("pipeline aborted: {0}")]
    RunAborted(String),

    #[error("service is unhealthy: {0}")]
    Unhealthy(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
