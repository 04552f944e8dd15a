// ABOUTME: Pipeline orchestrator: sequences the six stages of one run.
// ABOUTME: Serializes runs per target and always closes with a single outcome.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::build::ArtifactBuilder;
use crate::cluster::{Cluster, DeploymentTarget};
use crate::config::{Config, ConflictPolicy, LockConfig, RetryPolicy, RolloutConfig};
use crate::diagnostics::Warning;
use crate::error::Result;
use crate::health::{HealthProbe, HealthVerifier, ProbeRequest};
use crate::registry::{Credential, Publisher, Registry};
use crate::remote::{Connector, Identity, RemoteDeployDriver};
use crate::rollout::RolloutController;
use crate::secrets::SecretProvisioner;
use crate::ssh::PeerVerification;
use crate::types::{ImageRef, ResourceName, Revision};

use super::record::{Outcome, PipelineRun, run_id};
use super::run::{Run, Workload};

/// Everything a run needs besides the components.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Repository the artifact is published to; the tag is chosen per run.
    pub image: ImageRef,
    /// Fixed tag; defaults to the abbreviated revision.
    pub tag: Option<String>,
    pub credential: Credential,
    pub secret_name: ResourceName,
    pub workload: Workload,
    pub identity: Identity,
    pub deploy_commands: Vec<String>,
    pub retry: RetryPolicy,
    pub rollout: RolloutConfig,
    pub health: ProbeRequest,
    pub lock: LockConfig,
}

impl PipelineSettings {
    /// Resolve settings, including secret material, from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            image: config.image.clone(),
            tag: None,
            credential: config.credential()?,
            secret_name: config.registry.secret_name.clone(),
            workload: Workload {
                replicas: config.replicas,
                container_port: config.container_port,
                node_port: config.node_port,
                pull_secret: config.registry.secret_name.clone(),
            },
            identity: config.target.identity(),
            deploy_commands: config.deploy_commands(),
            retry: config.retry.clone(),
            rollout: config.rollout.clone(),
            health: config.health.request(),
            lock: config.lock.clone(),
        })
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Image reference the artifact of `revision` is built and published as.
    pub fn image_for(&self, revision: &Revision) -> ImageRef {
        match self.tag {
            Some(ref tag) => self.image.with_tag(tag),
            None => self.image.with_tag(&revision_tag(revision)),
        }
    }
}

/// Docker tags allow `[A-Za-z0-9_.-]`; anything else in a ref becomes `-`.
fn revision_tag(revision: &Revision) -> String {
    revision
        .short()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// The external systems a pipeline talks to.
pub struct Components {
    pub builder: Arc<dyn ArtifactBuilder>,
    pub registry: Arc<dyn Registry>,
    pub cluster: Arc<dyn Cluster>,
    pub connector: Arc<dyn Connector>,
    pub probe: Arc<dyn HealthProbe>,
}

pub struct Pipeline {
    builder: Arc<dyn ArtifactBuilder>,
    connector: Arc<dyn Connector>,
    publisher: Publisher,
    provisioner: SecretProvisioner,
    driver: RemoteDeployDriver,
    controller: RolloutController,
    verifier: HealthVerifier,
    target: Mutex<DeploymentTarget>,
    settings: PipelineSettings,
}

/// Unwrap a transition or close the run with its failure.
macro_rules! advance {
    ($transition:expr) => {
        match $transition.await {
            Ok(run) => run,
            Err((run, failure)) => return run.fail(failure).await,
        }
    };
}

impl Pipeline {
    pub fn new(components: Components, target: DeploymentTarget, settings: PipelineSettings) -> Self {
        let retry = settings.retry.clone();
        Self {
            publisher: Publisher::new(components.registry.clone(), retry.clone()),
            provisioner: SecretProvisioner::new(
                components.registry,
                components.cluster.clone(),
                retry.clone(),
            ),
            driver: RemoteDeployDriver::new(
                components.connector.clone(),
                settings.identity.clone(),
                retry.clone(),
                settings.deploy_commands.clone(),
            ),
            controller: RolloutController::new(components.cluster, settings.rollout.clone(), retry),
            verifier: HealthVerifier::new(components.probe),
            builder: components.builder,
            connector: components.connector,
            target: Mutex::new(target),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Snapshot of the deployment target, waiting for a running run to finish.
    pub async fn target(&self) -> DeploymentTarget {
        self.target.lock().await.clone()
    }

    /// Run all stages for `revision`. Never retries the run as a whole.
    pub async fn run(&self, revision: Revision) -> PipelineRun {
        let mut target = match self.claim_target().await {
            Ok(target) => target,
            Err(reason) => {
                tracing::warn!("run for {} aborted: {}", revision, reason);
                return aborted(revision, reason);
            }
        };

        let mut run = self.execute(revision, &mut target).await;

        for error in self.connector.disconnect_all().await {
            let warning = Warning::disconnect(format!("remote channel did not close cleanly: {}", error));
            tracing::warn!("{}", warning.message);
            run.warnings.push(warning);
        }

        match run.outcome {
            Outcome::Success => tracing::info!("run {} succeeded", run.id),
            ref outcome => tracing::error!("run {} {}", run.id, outcome),
        }
        run
    }

    /// In-process guard: one run per target at a time.
    async fn claim_target(&self) -> std::result::Result<MutexGuard<'_, DeploymentTarget>, String> {
        match self.settings.lock.on_conflict {
            ConflictPolicy::Reject => self
                .target
                .try_lock()
                .map_err(|_| "another run is deploying this target".to_string()),
            ConflictPolicy::Queue => {
                tokio::time::timeout(self.settings.lock.queue_timeout, self.target.lock())
                    .await
                    .map_err(|_| {
                        format!(
                            "target still busy after waiting {:?}",
                            self.settings.lock.queue_timeout
                        )
                    })
            }
        }
    }

    async fn execute(&self, revision: Revision, target: &mut DeploymentTarget) -> PipelineRun {
        let settings = &self.settings;
        let image = settings.image_for(&revision);
        let mut run = Run::new(revision);
        tracing::info!("run {} started for {}", run.id(), run.revision());

        if target.orchestrator_endpoint.peer == PeerVerification::Disabled {
            run.warn(Warning::insecure_peer(format!(
                "host key of {} is not verified (verify_peer_identity: disabled)",
                target.orchestrator_endpoint
            )));
        }

        let run = advance!(run.build(self.builder.as_ref(), &image));
        let run = advance!(run.publish(&self.publisher, &settings.credential));
        let run = advance!(run.provision_secret(
            &self.provisioner,
            target,
            &settings.credential,
            &settings.secret_name
        ));
        let lock_key = target.lock_key();
        let run = advance!(run.deploy(
            &self.driver,
            &target.orchestrator_endpoint,
            &lock_key,
            &settings.lock
        ));
        let run = advance!(run.roll_out(&self.controller, target, &settings.workload));
        let run = advance!(run.verify_health(&self.verifier, &settings.health));
        run.finish().await
    }
}

fn aborted(revision: Revision, reason: String) -> PipelineRun {
    let now = Utc::now();
    PipelineRun {
        id: run_id(now, &revision),
        revision,
        artifact: None,
        manifest_digest: None,
        stage_results: Vec::new(),
        rollout: None,
        outcome: Outcome::Aborted { reason },
        started_at: now,
        finished_at: now,
        warnings: Vec::new(),
    }
}
