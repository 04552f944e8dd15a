// ABOUTME: Registry publisher stage: pushes artifacts and checks pull access.
// ABOUTME: Network failures are retried with backoff; auth failures surface at once.

mod docker;

pub use docker::DockerRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::build::Artifact;
use crate::cluster::SecretPayload;
use crate::config::RetryPolicy;
use crate::pipeline::{Classify, FailureKind, Retried, with_retry};
use crate::types::{Digest, ImageRef, SecretString};

/// Authority to push to and pull from one registry.
#[derive(Debug, Clone)]
pub struct Credential {
    pub registry_host: String,
    pub principal: String,
    pub secret_material: SecretString,
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    /// The form written into the target's credential store.
    pub fn payload(&self) -> SecretPayload {
        SecretPayload {
            registry_host: self.registry_host.clone(),
            principal: self.principal.clone(),
            secret_material: self.secret_material.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry {registry} rejected credentials of {principal}: {reason}")]
    Auth {
        registry: String,
        principal: String,
        reason: String,
    },

    #[error("registry unreachable: {0}")]
    Network(String),

    #[error("unexpected registry response: {0}")]
    Unexpected(String),
}

impl Classify for RegistryError {
    fn kind(&self) -> FailureKind {
        match self {
            RegistryError::Auth { .. } => FailureKind::Auth,
            RegistryError::Network(_) => FailureKind::Network,
            RegistryError::Unexpected(_) => FailureKind::Rejected,
        }
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Upload the artifact under its tag and return the registry's manifest digest.
    /// Pushing a digest that is already stored under the tag succeeds unchanged.
    async fn push(&self, artifact: &Artifact, credential: &Credential) -> Result<Digest, RegistryError>;

    /// Whether `credential` is allowed to pull `image`.
    async fn pull_authorized(&self, image: &ImageRef, credential: &Credential) -> Result<bool, RegistryError>;
}

/// An artifact as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedArtifact {
    pub artifact: Artifact,
    pub manifest_digest: Digest,
}

impl PublishedArtifact {
    /// The image reference replicas are told to run, pinned by digest.
    pub fn pinned_image(&self) -> ImageRef {
        self.artifact.image.with_digest(self.manifest_digest.clone())
    }
}

pub struct Publisher {
    registry: Arc<dyn Registry>,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(registry: Arc<dyn Registry>, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    pub async fn publish(
        &self,
        artifact: &Artifact,
        credential: &Credential,
    ) -> Retried<PublishedArtifact, RegistryError> {
        with_retry(&self.retry, "publish", || self.registry.push(artifact, credential))
            .await
            .map(|manifest_digest| {
                tracing::info!(digest = %manifest_digest, "published {}", artifact.image);
                PublishedArtifact {
                    artifact: artifact.clone(),
                    manifest_digest,
                }
            })
    }
}
