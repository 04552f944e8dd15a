// ABOUTME: Stage failure taxonomy with SNAFU pattern.
// ABOUTME: Every failure carries a kind that decides retry and reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt;

use crate::build::BuildError;
use crate::cluster::ClusterError;
use crate::registry::RegistryError;
use crate::remote::RemoteError;
use crate::rollout::RolloutPhase;

use super::retry::Classify;

/// Failure classification reported with a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Source does not build. Needs a new revision.
    Build,
    /// Credentials rejected by the registry, host or orchestrator.
    Auth,
    /// Transient connectivity problem talking to the registry or orchestrator.
    Network,
    /// Transient failure opening the remote channel.
    Connect,
    /// Replicas cannot pull the artifact with the provisioned credential.
    ImagePullFailure,
    /// Deadline passed without convergence, cause unknown.
    Stalled,
    /// New replicas keep restarting.
    CrashLooping,
    /// Deployed, but the service does not answer correctly.
    Unhealthy,
    /// The orchestrator or the remote host refused a command.
    Rejected,
    /// Another run holds the deployment target.
    Conflict,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Network | FailureKind::Connect)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Build => "build error",
            FailureKind::Auth => "authentication error",
            FailureKind::Network => "network error",
            FailureKind::Connect => "connect error",
            FailureKind::ImagePullFailure => "image pull failure",
            FailureKind::Stalled => "rollout stalled",
            FailureKind::CrashLooping => "crash looping",
            FailureKind::Unhealthy => "unhealthy",
            FailureKind::Rejected => "rejected",
            FailureKind::Conflict => "target busy",
        };
        f.write_str(s)
    }
}

/// Errors that end a stage.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    #[snafu(display("{source}"))]
    Build { source: BuildError },

    #[snafu(display("{source}"))]
    Registry { source: RegistryError },

    #[snafu(display("{source}"))]
    Cluster { source: ClusterError },

    #[snafu(display("{source}"))]
    Remote { source: RemoteError },

    #[snafu(display("credential for {registry} expired at {expired_at}"))]
    CredentialExpired {
        registry: String,
        expired_at: DateTime<Utc>,
    },

    #[snafu(display("{principal} is not authorized to pull {image}"))]
    PullUnauthorized { principal: String, image: String },

    #[snafu(display("`{command}` exited with status {exit_code}: {stderr}"))]
    CommandRejected {
        command: String,
        exit_code: u32,
        stderr: String,
    },

    #[snafu(display("{target} is locked by {holder} (pid {pid}, run {run_id}) since {since}"))]
    LockHeld {
        target: String,
        holder: String,
        pid: u32,
        run_id: String,
        since: DateTime<Utc>,
    },

    #[snafu(display("deploy lock: {message}"))]
    Lock { message: String },

    #[snafu(display("rollout {phase}: {detail}"))]
    Rollout { phase: RolloutPhase, detail: String },

    #[snafu(display("{last_error}"))]
    Unhealthy { last_error: String },
}

impl StageError {
    /// Returns the failure kind for retry decisions and reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Build { .. } => FailureKind::Build,
            StageError::Registry { source } => source.kind(),
            StageError::Cluster { source } => source.kind(),
            StageError::Remote { source } => source.kind(),
            StageError::CredentialExpired { .. } | StageError::PullUnauthorized { .. } => {
                FailureKind::Auth
            }
            StageError::CommandRejected { .. } | StageError::Lock { .. } => FailureKind::Rejected,
            StageError::LockHeld { .. } => FailureKind::Conflict,
            StageError::Rollout { phase, .. } => match phase {
                RolloutPhase::ImagePullFailure => FailureKind::ImagePullFailure,
                RolloutPhase::CrashLooping => FailureKind::CrashLooping,
                _ => FailureKind::Stalled,
            },
            StageError::Unhealthy { .. } => FailureKind::Unhealthy,
        }
    }
}

impl Classify for StageError {
    fn kind(&self) -> FailureKind {
        StageError::kind(self)
    }
}

impl From<BuildError> for StageError {
    fn from(source: BuildError) -> Self {
        StageError::Build { source }
    }
}

impl From<RegistryError> for StageError {
    fn from(source: RegistryError) -> Self {
        StageError::Registry { source }
    }
}

impl From<ClusterError> for StageError {
    fn from(source: ClusterError) -> Self {
        StageError::Cluster { source }
    }
}

impl From<RemoteError> for StageError {
    fn from(source: RemoteError) -> Self {
        StageError::Remote { source }
    }
}
