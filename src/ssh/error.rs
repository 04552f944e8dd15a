// ABOUTME: Errors raised by the SSH session layer.
// ABOUTME: Dialing, host key policy, key loading, authentication and command execution.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot reach {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("host key of {0} does not satisfy the verification policy")]
    HostKey(String),

    #[error("cannot load key {path}: {reason}")]
    KeyFile { path: PathBuf, reason: String },

    #[error("{user}@{addr} did not accept any offered key")]
    NotAccepted { user: String, addr: String },

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("remote command killed by signal {0}")]
    Signal(String),

    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel closed before the command reported an exit status")]
    ChannelClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
