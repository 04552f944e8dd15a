// ABOUTME: Configuration types and parsing for shipline.yml.
// ABOUTME: Handles YAML parsing, secret resolution, validation, and scaffolding.

mod env_value;
mod health;
mod lock;
mod retry;
mod rollout;
mod target;

pub use env_value::SecretValue;
pub use health::HealthConfig;
pub use lock::{ConflictPolicy, LockConfig};
pub use retry::RetryPolicy;
pub use rollout::RolloutConfig;
pub use target::{PeerIdentityMode, TargetConfig};

use crate::cluster::DeploymentTarget;
use crate::error::{Error, Result};
use crate::registry::Credential;
use crate::types::{ImageRef, ResourceName};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "shipline.yml";
pub const CONFIG_FILENAME_ALT: &str = "shipline.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".shipline/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: ResourceName,

    #[serde(default = "ResourceName::default_namespace")]
    pub namespace: ResourceName,

    /// Image repository; the tag is chosen per run.
    pub image: ImageRef,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default = "default_container_port")]
    pub container_port: u16,

    #[serde(default)]
    pub node_port: Option<u16>,

    #[serde(default)]
    pub build: BuildConfig,

    pub registry: RegistryConfig,

    #[serde(deserialize_with = "target::deserialize_target")]
    pub target: TargetConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rollout: RolloutConfig,

    pub health: HealthConfig,

    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_context")]
    pub context: PathBuf,

    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            context: default_context(),
            dockerfile: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub principal: String,

    pub secret: SecretValue,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Name of the pull secret written into the target namespace.
    #[serde(default = "ResourceName::default_pull_secret")]
    pub secret_name: ResourceName,
}

fn default_replicas() -> u32 {
    1
}

fn default_container_port() -> u16 {
    5000
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Reject settings that would make the pipeline loop forever or never run.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));

        if self.replicas == 0 {
            return invalid("replicas must be at least 1");
        }
        if self.retry.attempts == 0 {
            return invalid("retry.attempts must be at least 1");
        }
        if self.rollout.poll_interval.is_zero() {
            return invalid("rollout.poll_interval must be greater than zero");
        }
        if self.health.interval.is_zero() {
            return invalid("health.interval must be greater than zero");
        }
        if self.lock.poll_interval.is_zero() {
            return invalid("lock.poll_interval must be greater than zero");
        }
        self.target
            .peer_verification()
            .map_err(Error::InvalidConfig)?;
        Ok(())
    }

    /// Resolve the registry credential. Secret material is read from the
    /// environment at this point, not at parse time.
    pub fn credential(&self) -> Result<Credential> {
        Ok(Credential {
            registry_host: self.image.registry_host().to_string(),
            principal: self.registry.principal.clone(),
            secret_material: self.registry.secret.resolve()?,
            expiry: self.registry.expires_at,
        })
    }

    pub fn deployment_target(&self) -> Result<DeploymentTarget> {
        let endpoint = self.target.endpoint().map_err(Error::InvalidConfig)?;
        Ok(DeploymentTarget::new(
            endpoint,
            self.namespace.clone(),
            self.app.clone(),
        ))
    }

    /// Commands run on the host before the rollout. Without configuration the
    /// namespace is ensured and the node must report Ready.
    pub fn deploy_commands(&self) -> Vec<String> {
        if let Some(ref commands) = self.target.deploy_commands {
            return commands.clone();
        }
        let kubectl = &self.target.kubectl;
        vec![
            format!(
                "{kubectl} get namespace {ns} >/dev/null 2>&1 || {kubectl} create namespace {ns}",
                ns = self.namespace
            ),
            format!("{kubectl} wait --for=condition=Ready node --all --timeout=120s"),
        ]
    }
}

pub fn init_config(dir: &Path, app: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let app = ResourceName::new(app.unwrap_or("todo-app"))
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;

    std::fs::write(&config_path, template_yaml(&app))?;
    Ok(())
}

fn template_yaml(app: &ResourceName) -> String {
    format!(
        r#"app: {app}
namespace: default
image: docker.io/my-user/{app}
replicas: 2
container_port: 5000
node_port: 30080

registry:
  principal: my-user
  secret:
    env: REGISTRY_TOKEN
  secret_name: reg-cred

target:
  host: vm.example.com
  user: azureuser
  identity_key: ~/.ssh/id_ed25519
  # enforced (known_hosts), pinned (host_key_fingerprint) or disabled
  verify_peer_identity: enforced

health:
  url: http://vm.example.com:30080/health
  expected_status: 200
  interval: 5s
  deadline: 2m
"#
    )
}
