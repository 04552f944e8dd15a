// ABOUTME: A pipeline run parameterized by its current stage state.
// ABOUTME: Each transition consumes the run and returns the next state on success.

use chrono::{DateTime, Utc};
use std::time::Instant;

use crate::build::{Artifact, ArtifactBuilder};
use crate::cluster::{DeploymentSpec, DeploymentTarget, RolloutStatus};
use crate::diagnostics::{Diagnostics, Warning};
use crate::health::{HealthOutcome, HealthVerifier, ProbeRequest};
use crate::registry::{Credential, Publisher};
use crate::remote::{Endpoint, RemoteDeployDriver};
use crate::rollout::RolloutController;
use crate::secrets::SecretProvisioner;
use crate::types::{Digest, ImageRef, ResourceName, Revision};

use super::error::{FailureKind, StageError};
use super::lock::TargetLock;
use super::record::{Outcome, PipelineRun, Stage, StageResult, StageStatus, run_id};
use super::retry::Retried;
use super::state::{Built, Converged, Deployed, Provisioned, Published, Triggered, Verified};
use crate::config::LockConfig;

/// A failed stage along with what it cost.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: StageError,
    pub retries: u32,
    started_at: DateTime<Utc>,
    duration_ms: u64,
}

/// Result type for transitions; on failure the run comes back in its old state.
pub type TransitionResult<T, S> = Result<Run<T>, (Run<S>, StageFailure)>;

/// Workload shape written by the rollout stage.
#[derive(Debug, Clone)]
pub struct Workload {
    pub replicas: u32,
    pub container_port: u16,
    pub node_port: Option<u16>,
    pub pull_secret: ResourceName,
}

/// A pipeline run in progress, parameterized by its current state.
#[derive(Debug)]
pub struct Run<S> {
    id: String,
    revision: Revision,
    started_at: DateTime<Utc>,
    artifact: Option<Artifact>,
    manifest_digest: Option<Digest>,
    rollout: Option<RolloutStatus>,
    stage_results: Vec<StageResult>,
    diagnostics: Diagnostics,
    lock: Option<TargetLock>,
    state: S,
}

struct StageClock {
    stage: Stage,
    started_at: DateTime<Utc>,
    instant: Instant,
}

impl StageClock {
    fn start(stage: Stage) -> Self {
        tracing::info!("{}: starting", stage);
        Self {
            stage,
            started_at: Utc::now(),
            instant: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.instant.elapsed().as_millis() as u64
    }

    fn succeeded(self, detail: impl Into<String>, retries: u32) -> StageResult {
        let detail = detail.into();
        tracing::info!(retries, "{}: {}", self.stage, detail);
        StageResult {
            stage: self.stage,
            status: StageStatus::Succeeded { detail },
            retries,
            started_at: self.started_at,
            duration_ms: self.elapsed_ms(),
        }
    }

    fn failed(self, error: StageError, retries: u32) -> StageFailure {
        tracing::error!(retries, kind = %error.kind(), "{}: {}", self.stage, error);
        StageFailure {
            stage: self.stage,
            retries,
            started_at: self.started_at,
            duration_ms: self.elapsed_ms(),
            error,
        }
    }
}

impl Run<Triggered> {
    pub fn new(revision: Revision) -> Self {
        let started_at = Utc::now();
        Run {
            id: run_id(started_at, &revision),
            revision,
            started_at,
            artifact: None,
            manifest_digest: None,
            rollout: None,
            stage_results: Vec::new(),
            diagnostics: Diagnostics::default(),
            lock: None,
            state: Triggered,
        }
    }
}

impl<S> Run<S> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn stage_results(&self) -> &[StageResult] {
        &self.stage_results
    }

    pub fn warn(&mut self, warning: Warning) {
        self.diagnostics.warn(warning);
    }

    fn advance<T>(mut self, result: StageResult, state: T) -> Run<T> {
        self.stage_results.push(result);
        Run {
            id: self.id,
            revision: self.revision,
            started_at: self.started_at,
            artifact: self.artifact,
            manifest_digest: self.manifest_digest,
            rollout: self.rollout,
            stage_results: self.stage_results,
            diagnostics: self.diagnostics,
            lock: self.lock,
            state,
        }
    }

    /// Record `failure` as the terminal outcome and release the target lock.
    pub async fn fail(mut self, failure: StageFailure) -> PipelineRun {
        let kind = failure.error.kind();
        let reason = failure.error.to_string();
        self.stage_results.push(StageResult {
            stage: failure.stage,
            status: StageStatus::Failed {
                kind,
                reason: reason.clone(),
            },
            retries: failure.retries,
            started_at: failure.started_at,
            duration_ms: failure.duration_ms,
        });
        let outcome = if kind == FailureKind::Conflict {
            Outcome::Aborted { reason }
        } else {
            Outcome::Failed {
                stage: failure.stage,
                kind,
                reason,
            }
        };
        self.close(outcome).await
    }

    async fn close(mut self, outcome: Outcome) -> PipelineRun {
        if let Some(lock) = self.lock.take() {
            if let Err(e) = lock.release().await {
                self.diagnostics
                    .warn(Warning::lock_release(format!("target lock not released: {}", e)));
            }
        }
        PipelineRun {
            id: self.id,
            revision: self.revision,
            artifact: self.artifact,
            manifest_digest: self.manifest_digest,
            stage_results: self.stage_results,
            rollout: self.rollout,
            outcome,
            started_at: self.started_at,
            finished_at: Utc::now(),
            warnings: self.diagnostics.into_warnings(),
        }
    }
}

/// Split a retried stage result into a success value or a recorded failure.
fn settle<T, E: Into<StageError>>(
    clock: StageClock,
    retried: Retried<T, E>,
) -> Result<(T, StageClock, u32), StageFailure> {
    match retried.result {
        Ok(value) => Ok((value, clock, retried.retries)),
        Err(e) => Err(clock.failed(e.into(), retried.retries)),
    }
}

// =============================================================================
// Triggered -> Built
// =============================================================================

impl Run<Triggered> {
    /// Build the revision into an artifact tagged as `image`. Never retried.
    #[must_use = "run state must be used"]
    pub async fn build(
        mut self,
        builder: &dyn ArtifactBuilder,
        image: &ImageRef,
    ) -> TransitionResult<Built, Triggered> {
        let clock = StageClock::start(Stage::Build);
        match builder.build(&self.revision, image).await {
            Ok(artifact) => {
                let result = clock.succeeded(
                    format!("{} ({})", artifact.image, artifact.content_digest.short()),
                    0,
                );
                self.artifact = Some(artifact.clone());
                Ok(self.advance(result, Built { artifact }))
            }
            Err(e) => Err((self, clock.failed(e.into(), 0))),
        }
    }
}

// =============================================================================
// Built -> Published
// =============================================================================

impl Run<Built> {
    #[must_use = "run state must be used"]
    pub async fn publish(
        mut self,
        publisher: &Publisher,
        credential: &Credential,
    ) -> TransitionResult<Published, Built> {
        let clock = StageClock::start(Stage::Publish);
        let retried = publisher.publish(&self.state.artifact, credential).await;
        match settle(clock, retried) {
            Ok((published, clock, retries)) => {
                let result = clock.succeeded(
                    format!("{}@{}", published.artifact.image, published.manifest_digest.short()),
                    retries,
                );
                self.manifest_digest = Some(published.manifest_digest.clone());
                Ok(self.advance(result, Published { published }))
            }
            Err(failure) => Err((self, failure)),
        }
    }
}

// =============================================================================
// Published -> Provisioned
// =============================================================================

impl Run<Published> {
    #[must_use = "run state must be used"]
    pub async fn provision_secret(
        self,
        provisioner: &SecretProvisioner,
        target: &DeploymentTarget,
        credential: &Credential,
        secret_name: &ResourceName,
    ) -> TransitionResult<Provisioned, Published> {
        let clock = StageClock::start(Stage::ProvisionSecret);
        let image = self.state.published.pinned_image();
        let retried = provisioner
            .provision(target, credential, secret_name, &image)
            .await;
        match settle(clock, retried) {
            Ok(((), clock, retries)) => {
                let result = clock.succeeded(
                    format!("{}/{} for {}", target.namespace, secret_name, credential.registry_host),
                    retries,
                );
                let published = self.state.published.clone();
                Ok(self.advance(result, Provisioned { published }))
            }
            Err(failure) => Err((self, failure)),
        }
    }
}

// =============================================================================
// Provisioned -> Deployed
// =============================================================================

impl Run<Provisioned> {
    /// Open the channel, take the target lock, run the deploy commands.
    #[must_use = "run state must be used"]
    pub async fn deploy(
        mut self,
        driver: &RemoteDeployDriver,
        endpoint: &Endpoint,
        lock_key: &str,
        lock_config: &LockConfig,
    ) -> TransitionResult<Deployed, Provisioned> {
        let clock = StageClock::start(Stage::RemoteDeploy);

        let (shell, clock, mut retries) = match settle(clock, driver.connect(endpoint).await) {
            Ok(connected) => connected,
            Err(failure) => return Err((self, failure)),
        };

        match TargetLock::acquire(shell.clone(), lock_key, &self.id, lock_config).await {
            Ok(lock) => self.lock = Some(lock),
            Err(e) => return Err((self, clock.failed(e, retries))),
        }

        let commands = driver.run_commands(endpoint, shell).await;
        retries += commands.retries;
        if let Err(e) = commands.result {
            return Err((self, clock.failed(e, retries)));
        }

        let result = clock.succeeded(
            format!("{} command(s) on {}", driver.commands().len(), endpoint),
            retries,
        );
        let published = self.state.published.clone();
        Ok(self.advance(result, Deployed { published }))
    }
}

// =============================================================================
// Deployed -> Converged
// =============================================================================

impl Run<Deployed> {
    #[must_use = "run state must be used"]
    pub async fn roll_out(
        self,
        controller: &RolloutController,
        target: &mut DeploymentTarget,
        workload: &Workload,
    ) -> TransitionResult<Converged, Deployed> {
        let clock = StageClock::start(Stage::Rollout);
        let published = &self.state.published;
        let spec = DeploymentSpec {
            namespace: target.namespace.clone(),
            app: target.app.clone(),
            image: published.pinned_image(),
            artifact: published.artifact.content_digest.clone(),
            revision: self.revision.clone(),
            replicas: workload.replicas,
            container_port: workload.container_port,
            node_port: workload.node_port,
            pull_secret: workload.pull_secret.clone(),
        };

        let retried = controller.roll_out(target, &spec, &published.artifact).await;
        match settle(clock, retried) {
            Ok((status, clock, retries)) => {
                let result = clock.succeeded(
                    format!(
                        "{}/{} replicas ready",
                        status.ready_replica_count, status.desired_replica_count
                    ),
                    retries,
                );
                let mut run = self.advance(result, Converged);
                run.rollout = Some(status);
                Ok(run)
            }
            Err(failure) => Err((self, failure)),
        }
    }
}

// =============================================================================
// Converged -> Verified
// =============================================================================

impl Run<Converged> {
    #[must_use = "run state must be used"]
    pub async fn verify_health(
        self,
        verifier: &HealthVerifier,
        request: &ProbeRequest,
    ) -> TransitionResult<Verified, Converged> {
        let clock = StageClock::start(Stage::HealthVerify);
        match verifier.verify(request).await {
            HealthOutcome::Healthy { attempts } => {
                let result = clock.succeeded(
                    format!("{} healthy after {} probe(s)", request.endpoint, attempts),
                    0,
                );
                Ok(self.advance(result, Verified))
            }
            HealthOutcome::Unhealthy {
                attempts,
                last_error,
            } => {
                let error = StageError::Unhealthy {
                    last_error: format!("{} after {} probe(s)", last_error, attempts),
                };
                Err((self, clock.failed(error, 0)))
            }
        }
    }
}

// =============================================================================
// Verified -> PipelineRun
// =============================================================================

impl Run<Verified> {
    /// Close a fully successful run.
    pub async fn finish(self) -> PipelineRun {
        self.close(Outcome::Success).await
    }
}
