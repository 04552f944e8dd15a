// ABOUTME: Orchestration host configuration for the SSH channel.
// ABOUTME: Parses "host", "user@host", "host:port", "user@host:port" or a detailed map.

use crate::remote::{Endpoint, Identity};
use crate::ssh::PeerVerification;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// How the host key of the orchestration host is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerIdentityMode {
    /// Host key must already be in known_hosts.
    #[default]
    Enforced,
    /// Host key must match `host_key_fingerprint`.
    Pinned,
    /// Any host key is accepted. Must be chosen explicitly.
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub identity_key: Option<PathBuf>,
    #[serde(default)]
    pub verify_peer_identity: PeerIdentityMode,
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default)]
    pub deploy_commands: Option<Vec<String>>,
    /// How kubectl is invoked on the host, e.g. `k3s kubectl`.
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

fn default_port() -> u16 {
    22
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

impl TargetConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("target address cannot be empty".to_string());
        }

        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (host, port)
            }
            None => (rest, default_port()),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(TargetConfig {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
            identity_key: None,
            verify_peer_identity: PeerIdentityMode::default(),
            host_key_fingerprint: None,
            known_hosts: None,
            deploy_commands: None,
            kubectl: default_kubectl(),
            command_timeout: default_command_timeout(),
        })
    }

    /// Resolve the peer verification policy. Fails when `pinned` has no fingerprint.
    pub fn peer_verification(&self) -> Result<PeerVerification, String> {
        match self.verify_peer_identity {
            PeerIdentityMode::Enforced => Ok(PeerVerification::Enforced {
                known_hosts: self.known_hosts.clone(),
            }),
            PeerIdentityMode::Pinned => self
                .host_key_fingerprint
                .as_ref()
                .filter(|f| !f.trim().is_empty())
                .map(|f| PeerVerification::Pinned {
                    fingerprint: f.trim().to_string(),
                })
                .ok_or_else(|| {
                    "verify_peer_identity: pinned requires host_key_fingerprint".to_string()
                }),
            PeerIdentityMode::Disabled => Ok(PeerVerification::Disabled),
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, String> {
        let user = self
            .user
            .clone()
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()));
        Ok(Endpoint {
            host: self.host.clone(),
            port: self.port,
            user,
            peer: self.peer_verification()?,
        })
    }

    pub fn identity(&self) -> Identity {
        Identity {
            key_path: self.identity_key.as_deref().map(expand_home),
        }
    }
}

/// Expand a leading `~/` using `$HOME`; other paths are returned unchanged.
fn expand_home(path: &std::path::Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetEntry {
    Simple(String),
    Detailed(TargetConfig),
}

pub(super) fn deserialize_target<'de, D>(deserializer: D) -> Result<TargetConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match TargetEntry::deserialize(deserializer)? {
        TargetEntry::Simple(s) => TargetConfig::parse(&s).map_err(serde::de::Error::custom),
        TargetEntry::Detailed(c) => Ok(c),
    }
}
