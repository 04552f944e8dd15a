// ABOUTME: Secret provisioner: puts the registry pull credential on the target.
// ABOUTME: Verifies pull access first, then always overwrites the named secret.

use chrono::Utc;
use std::sync::Arc;

use crate::cluster::{Cluster, DeploymentTarget};
use crate::config::RetryPolicy;
use crate::pipeline::{Retried, StageError, with_retry};
use crate::registry::{Credential, Registry};
use crate::types::{ImageRef, ResourceName};

pub struct SecretProvisioner {
    registry: Arc<dyn Registry>,
    cluster: Arc<dyn Cluster>,
    retry: RetryPolicy,
}

impl SecretProvisioner {
    pub fn new(registry: Arc<dyn Registry>, cluster: Arc<dyn Cluster>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            cluster,
            retry,
        }
    }

    /// Ensure `target` holds a pull secret `name` for `credential`.
    ///
    /// Safe to repeat: the secret is overwritten, never reported as existing.
    pub async fn provision(
        &self,
        target: &DeploymentTarget,
        credential: &Credential,
        name: &ResourceName,
        image: &ImageRef,
    ) -> Retried<(), StageError> {
        if let Some(expired_at) = credential.expiry.filter(|_| credential.is_expired_at(Utc::now())) {
            return Retried::once(Err(StageError::CredentialExpired {
                registry: credential.registry_host.clone(),
                expired_at,
            }));
        }

        let check = with_retry(&self.retry, "pull authorization", || {
            self.registry.pull_authorized(image, credential)
        })
        .await;
        let mut retries = check.retries;
        match check.result {
            Ok(true) => {}
            Ok(false) => {
                return Retried {
                    result: Err(StageError::PullUnauthorized {
                        principal: credential.principal.clone(),
                        image: image.to_string(),
                    }),
                    retries,
                };
            }
            Err(e) => {
                return Retried {
                    result: Err(e.into()),
                    retries,
                };
            }
        }

        let payload = credential.payload();
        let written = with_retry(&self.retry, "write secret", || {
            self.cluster
                .create_or_update_secret(&target.namespace, name, &payload)
        })
        .await;
        retries += written.retries;
        if written.result.is_ok() {
            tracing::info!("pull secret {}/{} written", target.namespace, name);
        }
        Retried {
            result: written.result.map_err(StageError::from),
            retries,
        }
    }
}
