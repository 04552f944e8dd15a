// ABOUTME: Orchestrator boundary: deployment target, desired state and status snapshots.
// ABOUTME: Defines the Cluster trait implemented over kubectl.

mod kubectl;
mod manifest;

pub use kubectl::Kubectl;
pub use manifest::{ARTIFACT_ANNOTATION, REVISION_ANNOTATION, deployment_manifest, secret_manifest};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::build::Artifact;
use crate::pipeline::{Classify, FailureKind};
use crate::remote::{Endpoint, RemoteError};
use crate::types::{Digest, ImageRef, ResourceName, Revision, SecretString};

/// The remote cluster's intended state for one application.
#[derive(Debug, Clone)]
pub struct DeploymentTarget {
    pub orchestrator_endpoint: Endpoint,
    pub namespace: ResourceName,
    pub app: ResourceName,
    desired_artifact: Option<Artifact>,
}

impl DeploymentTarget {
    pub fn new(orchestrator_endpoint: Endpoint, namespace: ResourceName, app: ResourceName) -> Self {
        Self {
            orchestrator_endpoint,
            namespace,
            app,
            desired_artifact: None,
        }
    }

    /// Last artifact written by the rollout controller in this process.
    pub fn desired_artifact(&self) -> Option<&Artifact> {
        self.desired_artifact.as_ref()
    }

    /// Only the rollout controller records the desired artifact.
    pub(crate) fn set_desired_artifact(&mut self, artifact: Artifact) {
        self.desired_artifact = Some(artifact);
    }

    /// Identifies the target across runs and hosts.
    pub fn lock_key(&self) -> String {
        format!("{}-{}", self.namespace, self.app)
    }

    /// Label selector matching the application's pods.
    pub fn selector(&self) -> String {
        format!("app={}", self.app)
    }
}

/// Desired state written by the rollout controller.
#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    pub namespace: ResourceName,
    pub app: ResourceName,
    /// Image pinned to its registry digest.
    pub image: ImageRef,
    pub artifact: Digest,
    pub revision: Revision,
    pub replicas: u32,
    pub container_port: u16,
    pub node_port: Option<u16>,
    pub pull_secret: ResourceName,
}

/// Registry credential as stored in the target's credential store.
#[derive(Debug, Clone)]
pub struct SecretPayload {
    pub registry_host: String,
    pub principal: String,
    pub secret_material: SecretString,
}

impl SecretPayload {
    /// Contents of a `kubernetes.io/dockerconfigjson` secret.
    pub fn docker_config_json(&self) -> String {
        let auth = BASE64.encode(format!(
            "{}:{}",
            self.principal,
            self.secret_material.expose()
        ));
        let key = self.registry_auth_key();
        serde_json::json!({
            "auths": {
                (key): {
                    "username": self.principal,
                    "password": self.secret_material.expose(),
                    "auth": auth,
                }
            }
        })
        .to_string()
    }

    /// Docker Hub credentials are keyed by its legacy index URL.
    fn registry_auth_key(&self) -> String {
        match self.registry_host.as_str() {
            "docker.io" | "index.docker.io" | "registry-1.docker.io" => {
                "https://index.docker.io/v1/".to_string()
            }
            host => host.to_string(),
        }
    }
}

/// One pod of the application as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaStatus {
    pub name: String,
    /// Artifact digest annotation on the pod, if any.
    pub artifact: Option<Digest>,
    pub ready: bool,
    pub restart_count: u32,
    /// Reason the container is waiting, e.g. `ErrImagePull`.
    pub waiting_reason: Option<String>,
}

/// Point-in-time snapshot of a rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolloutStatus {
    /// Artifact every current replica runs; `None` while replicas disagree.
    pub observed_artifact: Option<Digest>,
    pub ready_replica_count: u32,
    pub desired_replica_count: u32,
    pub last_transition: Option<DateTime<Utc>>,
    pub replicas: Vec<ReplicaStatus>,
}

impl RolloutStatus {
    /// Derive counts and the observed artifact from the replica list.
    pub fn from_replicas(desired_replica_count: u32, replicas: Vec<ReplicaStatus>) -> Self {
        let ready_replica_count = replicas.iter().filter(|r| r.ready).count() as u32;
        Self {
            observed_artifact: common_artifact(&replicas),
            ready_replica_count,
            desired_replica_count,
            last_transition: None,
            replicas,
        }
    }

    pub fn is_converged_on(&self, digest: &Digest) -> bool {
        self.observed_artifact.as_ref() == Some(digest)
            && self.ready_replica_count == self.desired_replica_count
    }
}

pub(crate) fn common_artifact(replicas: &[ReplicaStatus]) -> Option<Digest> {
    let first = replicas.first()?.artifact.clone()?;
    replicas
        .iter()
        .all(|r| r.artifact.as_ref() == Some(&first))
        .then_some(first)
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("orchestrator rejected {what}: {reason}")]
    Rejected { what: String, reason: String },

    #[error("orchestrator denied access: {0}")]
    Forbidden(String),

    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("cannot read orchestrator response: {0}")]
    Decode(String),
}

impl Classify for ClusterError {
    fn kind(&self) -> FailureKind {
        match self {
            ClusterError::Rejected { .. } | ClusterError::Decode(_) => FailureKind::Rejected,
            ClusterError::Forbidden(_) => FailureKind::Auth,
            ClusterError::Unavailable(_) => FailureKind::Network,
            ClusterError::Remote(e) => e.kind(),
        }
    }
}

/// Declarative API of the orchestrator.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Write desired state. Accepted or rejected, nothing in between.
    async fn apply(&self, spec: &DeploymentSpec) -> Result<(), ClusterError>;

    async fn get_status(
        &self,
        namespace: &ResourceName,
        selector: &str,
    ) -> Result<RolloutStatus, ClusterError>;

    /// Create the secret or overwrite it if it exists.
    async fn create_or_update_secret(
        &self,
        namespace: &ResourceName,
        name: &ResourceName,
        payload: &SecretPayload,
    ) -> Result<(), ClusterError>;
}
