// ABOUTME: Post-deploy health verification against the live service.
// ABOUTME: Polls a probe at a fixed interval until success or an absolute deadline.

mod http;

pub use http::HttpProbe;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One verification: where to probe, what counts as healthy, how long to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub endpoint: String,
    pub expected_status: u16,
    /// Bound on a single probe.
    pub timeout: Duration,
    pub interval: Duration,
    /// Overall deadline measured from the first probe.
    pub deadline: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// A single request against the service returning its status code.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> Result<u16, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { attempts: u32 },
    Unhealthy { attempts: u32, last_error: String },
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            HealthOutcome::Healthy { attempts } | HealthOutcome::Unhealthy { attempts, .. } => {
                *attempts
            }
        }
    }
}

pub struct HealthVerifier {
    probe: Arc<dyn HealthProbe>,
}

impl HealthVerifier {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self { probe }
    }

    /// Probe immediately, then every `interval` while the next probe would
    /// still start before the deadline.
    pub async fn verify(&self, request: &ProbeRequest) -> HealthOutcome {
        let started = Instant::now();
        let deadline = started + request.deadline;
        let mut attempts = 0;

        loop {
            let probe_started = Instant::now();
            attempts += 1;

            let result = tokio::time::timeout(
                request.timeout,
                self.probe.probe(&request.endpoint, request.timeout),
            )
            .await;

            let last_error = match result {
                Ok(Ok(status)) if status == request.expected_status => {
                    tracing::info!(attempts, "{} answered {}", request.endpoint, status);
                    return HealthOutcome::Healthy { attempts };
                }
                Ok(Ok(status)) => format!(
                    "unexpected status {} (expected {})",
                    status, request.expected_status
                ),
                Ok(Err(e)) => e.to_string(),
                Err(_) => ProbeError::Timeout(request.timeout).to_string(),
            };
            tracing::debug!(attempts, "health probe failed: {}", last_error);

            let next = probe_started + request.interval;
            if next > deadline {
                return HealthOutcome::Unhealthy {
                    attempts,
                    last_error,
                };
            }
            tokio::time::sleep_until(next).await;
        }
    }
}
