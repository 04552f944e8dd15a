// ABOUTME: Rollout controller: writes desired state, then observes convergence.
// ABOUTME: Classifies each status snapshot into a rollout phase until a terminal one.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::build::Artifact;
use crate::cluster::{Cluster, DeploymentSpec, DeploymentTarget, ReplicaStatus, RolloutStatus};
use crate::config::{RetryPolicy, RolloutConfig};
use crate::pipeline::{Retried, StageError, with_retry};
use crate::types::Digest;

/// Waiting reasons that mean the artifact cannot be fetched with the
/// provisioned credential.
const IMAGE_PULL_REASONS: [&str; 4] = [
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "RegistryUnavailable",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Desired state written, no replica of the new artifact seen yet.
    Pending,
    /// Some replicas run the new artifact.
    Progressing,
    /// Every replica runs the new artifact and all are ready.
    Converged,
    /// Deadline elapsed before convergence.
    Stalled,
    /// New replicas keep failing readiness and restarting.
    CrashLooping,
    /// New replicas cannot pull the artifact.
    ImagePullFailure,
}

impl RolloutPhase {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RolloutPhase::Pending | RolloutPhase::Progressing)
    }
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RolloutPhase::Pending => "pending",
            RolloutPhase::Progressing => "progressing",
            RolloutPhase::Converged => "converged",
            RolloutPhase::Stalled => "stalled",
            RolloutPhase::CrashLooping => "crash-looping",
            RolloutPhase::ImagePullFailure => "image-pull-failure",
        };
        f.write_str(s)
    }
}

/// Phase of a snapshot with respect to the `artifact` being rolled out.
///
/// Never returns `Stalled`; only the deadline decides that.
pub fn classify(status: &RolloutStatus, artifact: &Digest, crash_loop_restarts: u32) -> RolloutPhase {
    let new: Vec<&ReplicaStatus> = status
        .replicas
        .iter()
        .filter(|r| r.artifact.as_ref() == Some(artifact))
        .collect();

    if new.iter().any(|r| is_pull_failure(r)) {
        return RolloutPhase::ImagePullFailure;
    }
    if new
        .iter()
        .any(|r| !r.ready && r.restart_count >= crash_loop_restarts.max(1))
    {
        return RolloutPhase::CrashLooping;
    }
    if status.is_converged_on(artifact) {
        return RolloutPhase::Converged;
    }
    if new.is_empty() {
        RolloutPhase::Pending
    } else {
        RolloutPhase::Progressing
    }
}

fn is_pull_failure(replica: &ReplicaStatus) -> bool {
    replica
        .waiting_reason
        .as_deref()
        .is_some_and(|reason| IMAGE_PULL_REASONS.contains(&reason))
}

/// Human-readable reason for a failed phase, naming the replica at fault.
fn describe(phase: RolloutPhase, status: Option<&RolloutStatus>, artifact: &Digest) -> String {
    let Some(status) = status else {
        return "no status observed".to_string();
    };
    let culprit = status
        .replicas
        .iter()
        .filter(|r| r.artifact.as_ref() == Some(artifact));
    match phase {
        RolloutPhase::ImagePullFailure => culprit
            .clone()
            .find(|r| is_pull_failure(r))
            .map(|r| {
                format!(
                    "replica {} cannot pull the artifact ({}); re-run secret provisioning",
                    r.name,
                    r.waiting_reason.as_deref().unwrap_or("unknown")
                )
            })
            .unwrap_or_else(|| "image pull failure".to_string()),
        RolloutPhase::CrashLooping => culprit
            .clone()
            .max_by_key(|r| r.restart_count)
            .map(|r| format!("replica {} restarted {} times", r.name, r.restart_count))
            .unwrap_or_else(|| "replicas restarting".to_string()),
        _ => format!(
            "{}/{} replicas ready, artifact {}",
            status.ready_replica_count,
            status.desired_replica_count,
            status
                .observed_artifact
                .as_ref()
                .map(|d| d.short().to_string())
                .unwrap_or_else(|| "mixed".to_string())
        ),
    }
}

pub struct RolloutController {
    cluster: Arc<dyn Cluster>,
    config: RolloutConfig,
    retry: RetryPolicy,
}

impl RolloutController {
    pub fn new(cluster: Arc<dyn Cluster>, config: RolloutConfig, retry: RetryPolicy) -> Self {
        Self {
            cluster,
            config,
            retry,
        }
    }

    /// Write `spec` as the target's desired state and wait for convergence.
    pub async fn roll_out(
        &self,
        target: &mut DeploymentTarget,
        spec: &DeploymentSpec,
        artifact: &Artifact,
    ) -> Retried<RolloutStatus, StageError> {
        let applied = with_retry(&self.retry, "apply", || self.cluster.apply(spec)).await;
        let retries = applied.retries;
        if let Err(e) = applied.result {
            return Retried {
                result: Err(e.into()),
                retries,
            };
        }
        target.set_desired_artifact(artifact.clone());
        tracing::info!("desired state written: {} -> {}", target.app, spec.image);

        Retried {
            result: self.await_convergence(target, &spec.artifact).await,
            retries,
        }
    }

    /// Poll until a terminal phase or the deadline.
    pub async fn await_convergence(
        &self,
        target: &DeploymentTarget,
        artifact: &Digest,
    ) -> Result<RolloutStatus, StageError> {
        let deadline = Instant::now() + self.config.deadline;
        let selector = target.selector();
        let mut last: Option<RolloutStatus> = None;

        loop {
            match self.cluster.get_status(&target.namespace, &selector).await {
                Ok(status) => {
                    let phase = classify(&status, artifact, self.config.crash_loop_restarts);
                    tracing::debug!(
                        %phase,
                        ready = status.ready_replica_count,
                        desired = status.desired_replica_count,
                        "rollout status"
                    );
                    match phase {
                        RolloutPhase::Converged => return Ok(status),
                        RolloutPhase::ImagePullFailure | RolloutPhase::CrashLooping => {
                            return Err(StageError::Rollout {
                                phase,
                                detail: describe(phase, Some(&status), artifact),
                            });
                        }
                        _ => last = Some(status),
                    }
                }
                Err(e) => tracing::warn!("failed to read rollout status: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StageError::Rollout {
                    phase: RolloutPhase::Stalled,
                    detail: format!(
                        "not converged after {:?}: {}",
                        self.config.deadline,
                        describe(RolloutPhase::Stalled, last.as_ref(), artifact)
                    ),
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}
