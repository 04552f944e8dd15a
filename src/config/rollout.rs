// ABOUTME: Rollout convergence tracking settings.
// ABOUTME: Deadline, poll interval, and the restart count that marks a crash loop.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RolloutConfig {
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_crash_loop_restarts")]
    pub crash_loop_restarts: u32,
}

fn default_deadline() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_crash_loop_restarts() -> u32 {
    3
}

impl Default for RolloutConfig {
    fn default() -> Self {
        RolloutConfig {
            deadline: default_deadline(),
            poll_interval: default_poll_interval(),
            crash_loop_restarts: default_crash_loop_restarts(),
        }
    }
}
