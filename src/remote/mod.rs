// ABOUTME: Remote execution channel to the orchestration host.
// ABOUTME: Connector and shell traits, endpoint identity and the deploy driver.

mod driver;
mod ssh;

pub use crate::ssh::CommandOutput;
pub use driver::RemoteDeployDriver;
pub use ssh::SshConnector;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::{Classify, FailureKind};
use crate::ssh::PeerVerification;

/// Address and expected identity of the orchestration host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub peer: PeerVerification,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Private credential used to open the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Key file; the SSH agent and default keys are tried when `None`.
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("authentication to {endpoint} failed: {reason}")]
    Auth { endpoint: String, reason: String },

    #[error("host key of {endpoint} rejected ({policy} verification)")]
    HostKeyRejected {
        endpoint: String,
        policy: &'static str,
    },

    /// The session could not start the command. Reconnecting is safe.
    #[error("remote channel unavailable: {0}")]
    Channel(String),

    /// The command may have run. It is never re-run.
    #[error("remote command failed: {0}")]
    Command(String),

    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),
}

impl Classify for RemoteError {
    fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Connect { .. } | RemoteError::Channel(_) => FailureKind::Connect,
            RemoteError::Command(_) | RemoteError::Timeout(_) => FailureKind::Rejected,
            RemoteError::Auth { .. } | RemoteError::HostKeyRejected { .. } => FailureKind::Auth,
        }
    }
}

/// An open channel that runs shell commands on the remote host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError>;
}

/// Opens channels to remote hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Return an open channel to `endpoint`, reusing a live one. A channel
    /// closed since it was handed out is replaced by a fresh connection.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
    ) -> Result<Arc<dyn RemoteShell>, RemoteError>;

    /// Close every channel opened so far. Returns the errors of channels that
    /// did not close cleanly.
    async fn disconnect_all(&self) -> Vec<RemoteError> {
        Vec::new()
    }
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
