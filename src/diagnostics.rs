// ABOUTME: Non-fatal warnings gathered while a pipeline run progresses.
// ABOUTME: Each warning is logged when raised and copied into the run record.

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Diagnostics(Vec<Warning>);

impl Diagnostics {
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.0.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// The target lock file could not be removed. It expires once stale.
    LockRelease,
    Disconnect,
    /// Host key verification is off for the orchestration host.
    InsecurePeer,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    pub fn disconnect(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Disconnect, message)
    }

    pub fn insecure_peer(message: impl Into<String>) -> Self {
        Self::new(WarningKind::InsecurePeer, message)
    }
}
