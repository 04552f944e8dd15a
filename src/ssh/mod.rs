// ABOUTME: SSH client module for the orchestration host.
// ABOUTME: Key or agent authentication with an explicit host key verification policy.

mod client;
mod error;
mod verify;

pub use client::{CommandOutput, Session, SessionConfig};
pub use error::{Error, Result};
pub use verify::PeerVerification;
