// ABOUTME: Post-deploy HTTP health check configuration.
// ABOUTME: The service is probed at `url` until it answers `expected_status`.

use crate::health::ProbeRequest;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    pub url: String,

    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,
}

fn default_expected_status() -> u16 {
    200
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_deadline() -> Duration {
    Duration::from_secs(120)
}

impl HealthConfig {
    pub fn request(&self) -> ProbeRequest {
        ProbeRequest {
            endpoint: self.url.clone(),
            expected_status: self.expected_status,
            timeout: self.timeout,
            interval: self.interval,
            deadline: self.deadline,
        }
    }
}
