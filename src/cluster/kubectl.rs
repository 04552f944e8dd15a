// ABOUTME: Cluster implementation that drives kubectl on the orchestration host.
// ABOUTME: Manifests go in through a heredoc; status comes back as JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::manifest::{ARTIFACT_ANNOTATION, deployment_manifest, secret_manifest};
use super::{Cluster, ClusterError, DeploymentSpec, ReplicaStatus, RolloutStatus, SecretPayload};
use crate::remote::{CommandOutput, Connector, Endpoint, Identity, shell_quote};
use crate::types::{Digest, ResourceName};

const HEREDOC_MARKER: &str = "SHIPLINE_EOF";

/// Runs kubectl over the remote channel.
///
/// Every command asks the shared connector for the channel, so the secret
/// provisioner and the rollout controller reuse the deploy session while it
/// is open and get a fresh one after it closed.
pub struct Kubectl {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    identity: Identity,
    program: String,
}

impl Kubectl {
    pub fn new(connector: Arc<dyn Connector>, endpoint: Endpoint, identity: Identity) -> Self {
        Self {
            connector,
            endpoint,
            identity,
            program: "kubectl".to_string(),
        }
    }

    /// Command used to invoke kubectl, e.g. `k3s kubectl`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, ClusterError> {
        let shell = self.connector.connect(&self.endpoint, &self.identity).await?;
        Ok(shell.exec(command).await?)
    }

    /// Apply a manifest fed through stdin. The body is never logged.
    async fn apply_json(&self, what: &str, manifest: &serde_json::Value) -> Result<(), ClusterError> {
        let command = format!(
            "{} apply -f - <<'{marker}'\n{}\n{marker}",
            self.program,
            manifest,
            marker = HEREDOC_MARKER
        );
        tracing::debug!("{} apply ({})", self.program, what);
        let output = self.run(&command).await?;
        if !output.success() {
            return Err(classify_failure(what, &output));
        }
        Ok(())
    }

    async fn get_json(&self, what: &str, namespace: &ResourceName, selector: &str) -> Result<String, ClusterError> {
        let command = format!(
            "{} get {} -n {} -l {} -o json",
            self.program,
            what,
            namespace,
            shell_quote(selector)
        );
        let output = self.run(&command).await?;
        if !output.success() {
            return Err(classify_failure(what, &output));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Cluster for Kubectl {
    async fn apply(&self, spec: &DeploymentSpec) -> Result<(), ClusterError> {
        let what = format!("deployment {}/{}", spec.namespace, spec.app);
        self.apply_json(&what, &deployment_manifest(spec)).await
    }

    async fn get_status(
        &self,
        namespace: &ResourceName,
        selector: &str,
    ) -> Result<RolloutStatus, ClusterError> {
        let deployments = self.get_json("deployments", namespace, selector).await?;
        let pods = self.get_json("pods", namespace, selector).await?;
        parse_status(&deployments, &pods)
    }

    async fn create_or_update_secret(
        &self,
        namespace: &ResourceName,
        name: &ResourceName,
        payload: &SecretPayload,
    ) -> Result<(), ClusterError> {
        let what = format!("secret {}/{}", namespace, name);
        self.apply_json(&what, &secret_manifest(namespace, name, payload))
            .await
    }
}

fn classify_failure(what: &str, output: &CommandOutput) -> ClusterError {
    let stderr = output.stderr.trim().to_string();
    let lower = stderr.to_ascii_lowercase();

    const UNAVAILABLE: [&str; 5] = [
        "connection refused",
        "unable to connect to the server",
        "i/o timeout",
        "tls handshake timeout",
        "the server is currently unable to handle the request",
    ];

    if lower.contains("forbidden") || lower.contains("unauthorized") {
        ClusterError::Forbidden(stderr)
    } else if UNAVAILABLE.iter().any(|p| lower.contains(p)) {
        ClusterError::Unavailable(stderr)
    } else {
        ClusterError::Rejected {
            what: what.to_string(),
            reason: if stderr.is_empty() {
                format!("kubectl exited with status {}", output.exit_code)
            } else {
                stderr
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct KubeDeployment {
    #[serde(default)]
    spec: KubeDeploymentSpec,
    #[serde(default)]
    status: KubeDeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
struct KubeDeploymentSpec {
    replicas: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeDeploymentStatus {
    #[serde(default)]
    conditions: Vec<KubeCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeCondition {
    last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct KubePod {
    metadata: KubePodMetadata,
    #[serde(default)]
    status: KubePodStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubePodMetadata {
    name: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubePodStatus {
    #[serde(default)]
    container_statuses: Vec<KubeContainerStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeContainerStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    restart_count: u32,
    #[serde(default)]
    state: KubeContainerState,
}

#[derive(Debug, Default, Deserialize)]
struct KubeContainerState {
    waiting: Option<KubeWaiting>,
}

#[derive(Debug, Deserialize)]
struct KubeWaiting {
    reason: Option<String>,
}

/// Build a status snapshot from `kubectl get deployments` and `kubectl get pods` output.
pub(crate) fn parse_status(deployments: &str, pods: &str) -> Result<RolloutStatus, ClusterError> {
    let deployments: ItemList<KubeDeployment> =
        serde_json::from_str(deployments).map_err(|e| ClusterError::Decode(e.to_string()))?;
    let pods: ItemList<KubePod> =
        serde_json::from_str(pods).map_err(|e| ClusterError::Decode(e.to_string()))?;

    let deployment = deployments.items.first();

    // Terminating pods are on their way out and do not count as replicas.
    let replicas: Vec<ReplicaStatus> = pods
        .items
        .into_iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .map(|pod| {
            let containers = &pod.status.container_statuses;
            ReplicaStatus {
                artifact: pod
                    .metadata
                    .annotations
                    .get(ARTIFACT_ANNOTATION)
                    .and_then(|d| Digest::parse(d).ok()),
                ready: !containers.is_empty() && containers.iter().all(|c| c.ready),
                restart_count: containers.iter().map(|c| c.restart_count).max().unwrap_or(0),
                waiting_reason: containers
                    .iter()
                    .find_map(|c| c.state.waiting.as_ref().and_then(|w| w.reason.clone())),
                name: pod.metadata.name,
            }
        })
        .collect();

    // The ready count comes from the same pod list as the observed artifact,
    // never from the deployment's readyReplicas.
    let mut status = RolloutStatus::from_replicas(
        deployment.and_then(|d| d.spec.replicas).unwrap_or(0),
        replicas,
    );
    if let Some(deployment) = deployment {
        status.last_transition = deployment
            .status
            .conditions
            .iter()
            .filter_map(|c| c.last_transition_time)
            .max();
    }
    Ok(status)
}
