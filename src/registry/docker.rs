// ABOUTME: Registry client built on the docker CLI.
// ABOUTME: Logs in with the secret on stdin and classifies failures from stderr.

use async_trait::async_trait;

use super::{Credential, Registry, RegistryError};
use crate::build::Artifact;
use crate::process::{self, ProcessOutput};
use crate::types::{Digest, ImageRef};

const AUTH_PATTERNS: [&str; 5] = [
    "unauthorized",
    "denied",
    "authentication required",
    "incorrect username or password",
    "no basic auth credentials",
];

const MISSING_PATTERNS: [&str; 2] = ["no such manifest", "manifest unknown"];

#[derive(Debug, Clone)]
pub struct DockerRegistry {
    docker: String,
}

impl Default for DockerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRegistry {
    pub fn new() -> Self {
        Self {
            docker: "docker".to_string(),
        }
    }

    async fn docker(&self, args: &[&str], stdin: Option<Vec<u8>>) -> Result<ProcessOutput, RegistryError> {
        process::run(&self.docker, args, &[], stdin)
            .await
            .map_err(|e| RegistryError::Unexpected(format!("failed to run {}: {}", self.docker, e)))
    }

    async fn login(&self, credential: &Credential) -> Result<(), RegistryError> {
        let output = self
            .docker(
                &[
                    "login",
                    credential.registry_host.as_str(),
                    "--username",
                    credential.principal.as_str(),
                    "--password-stdin",
                ],
                Some(credential.secret_material.expose().as_bytes().to_vec()),
            )
            .await?;
        if !output.success() {
            return Err(classify(&output.stderr, credential));
        }
        Ok(())
    }
}

fn classify(stderr: &str, credential: &Credential) -> RegistryError {
    let lower = stderr.to_ascii_lowercase();
    if AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
        RegistryError::Auth {
            registry: credential.registry_host.clone(),
            principal: credential.principal.clone(),
            reason: stderr.trim().to_string(),
        }
    } else {
        RegistryError::Network(stderr.trim().to_string())
    }
}

#[async_trait]
impl Registry for DockerRegistry {
    async fn push(&self, artifact: &Artifact, credential: &Credential) -> Result<Digest, RegistryError> {
        self.login(credential).await?;

        let image = artifact.image.to_string();
        let output = self.docker(&["push", image.as_str()], None).await?;
        if !output.success() {
            return Err(classify(&output.stderr, credential));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Digest::find_in(&stdout).ok_or_else(|| {
            RegistryError::Unexpected(format!("push of {} reported no digest", image))
        })
    }

    async fn pull_authorized(&self, image: &ImageRef, credential: &Credential) -> Result<bool, RegistryError> {
        self.login(credential).await?;

        let image = image.to_string();
        let output = self
            .docker(&["manifest", "inspect", image.as_str()], None)
            .await?;
        if output.success() {
            return Ok(true);
        }

        let lower = output.stderr.to_ascii_lowercase();
        if MISSING_PATTERNS.iter().any(|p| lower.contains(p)) {
            tracing::warn!("{} does not exist in the registry", image);
            return Ok(false);
        }
        match classify(&output.stderr, credential) {
            RegistryError::Auth { reason, .. } => {
                tracing::warn!("{} may not pull {}: {}", credential.principal, image, reason);
                Ok(false)
            }
            other => Err(other),
        }
    }
}
