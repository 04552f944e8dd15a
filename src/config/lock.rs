// ABOUTME: Policy for runs that collide on the same deployment target.
// ABOUTME: Either queue behind the holder or reject the newcomer.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Wait for the running deployment to finish, up to `queue_timeout`.
    #[default]
    Queue,
    /// Abort immediately.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub on_conflict: ConflictPolicy,

    #[serde(default = "default_queue_timeout", with = "humantime_serde")]
    pub queue_timeout: Duration,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_queue_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            on_conflict: ConflictPolicy::default(),
            queue_timeout: default_queue_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}
