// ABOUTME: Ready-made settings, targets and a harness wiring fakes into a pipeline.
// ABOUTME: Defaults describe the todo-app on a single VM reachable over SSH.

use std::sync::Arc;
use std::time::Duration;

use shipline::build::Artifact;
use shipline::cluster::{DeploymentSpec, DeploymentTarget};
use shipline::config::{LockConfig, RetryPolicy, RolloutConfig};
use shipline::health::ProbeRequest;
use shipline::pipeline::{Components, Pipeline, PipelineSettings, Workload};
use shipline::registry::Credential;
use shipline::remote::{Endpoint, Identity};
use shipline::ssh::PeerVerification;
use shipline::types::{Digest, ImageRef, ResourceName, Revision, SecretString};

use super::fakes::{FakeBuilder, FakeCluster, FakeConnector, FakeRegistry, ScriptedProbe};

pub const LOCK_KEY: &str = "default-todo-app";

pub fn name(value: &str) -> ResourceName {
    ResourceName::new(value).unwrap()
}

pub fn revision(value: &str) -> Revision {
    Revision::new(value).unwrap()
}

pub fn endpoint() -> Endpoint {
    Endpoint {
        host: "vm.example.com".to_string(),
        port: 22,
        user: "azureuser".to_string(),
        peer: PeerVerification::Enforced { known_hosts: None },
    }
}

pub fn target() -> DeploymentTarget {
    DeploymentTarget::new(endpoint(), name("default"), name("todo-app"))
}

pub fn credential() -> Credential {
    Credential {
        registry_host: "docker.io".to_string(),
        principal: "acme-ci".to_string(),
        secret_material: SecretString::new("dckr_pat_test"),
        expiry: None,
    }
}

pub fn probe_request() -> ProbeRequest {
    ProbeRequest {
        endpoint: "http://vm.example.com:30080/health".to_string(),
        expected_status: 200,
        timeout: Duration::from_secs(3),
        interval: Duration::from_secs(5),
        deadline: Duration::from_secs(120),
    }
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        image: ImageRef::parse("docker.io/acme/todo-app").unwrap(),
        tag: None,
        credential: credential(),
        secret_name: name("reg-cred"),
        workload: Workload {
            replicas: 2,
            container_port: 5000,
            node_port: Some(30080),
            pull_secret: name("reg-cred"),
        },
        identity: Identity::default(),
        deploy_commands: vec![
            "kubectl get namespace default".to_string(),
            "kubectl wait --for=condition=Ready node --all --timeout=120s".to_string(),
        ],
        retry: RetryPolicy::default(),
        rollout: RolloutConfig::default(),
        health: probe_request(),
        lock: LockConfig::default(),
    }
}

/// Artifact the fake builder produces for `rev`.
pub fn artifact(rev: &str) -> Artifact {
    Artifact {
        source_revision: revision(rev),
        content_digest: Digest::of(rev),
        image: ImageRef::parse(&format!("docker.io/acme/todo-app:{}", rev)).unwrap(),
    }
}

pub fn spec(artifact: &Artifact) -> DeploymentSpec {
    let manifest = FakeRegistry::manifest_of(&artifact.content_digest);
    DeploymentSpec {
        namespace: name("default"),
        app: name("todo-app"),
        image: artifact.image.with_digest(manifest),
        artifact: artifact.content_digest.clone(),
        revision: artifact.source_revision.clone(),
        replicas: 2,
        container_port: 5000,
        node_port: Some(30080),
        pull_secret: name("reg-cred"),
    }
}

/// All fakes for one deployment target.
#[derive(Default)]
pub struct Harness {
    pub builder: Arc<FakeBuilder>,
    pub registry: Arc<FakeRegistry>,
    pub cluster: Arc<FakeCluster>,
    pub connector: Arc<FakeConnector>,
    pub probe: Arc<ScriptedProbe>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn components(&self) -> Components {
        Components {
            builder: self.builder.clone(),
            registry: self.registry.clone(),
            cluster: self.cluster.clone(),
            connector: self.connector.clone(),
            probe: self.probe.clone(),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(settings(), target())
    }

    pub fn pipeline_with(&self, settings: PipelineSettings, target: DeploymentTarget) -> Pipeline {
        Pipeline::new(self.components(), target, settings)
    }
}
