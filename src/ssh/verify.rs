// ABOUTME: Host key verification policies for the SSH channel.
// ABOUTME: Enforced (known_hosts), pinned (fingerprint) or explicitly disabled.

use russh::keys::known_hosts::{check_known_hosts, check_known_hosts_path};
use russh::keys::ssh_key::{HashAlg, PublicKey};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerVerification {
    /// The key must be listed in known_hosts (default file when `None`).
    Enforced { known_hosts: Option<PathBuf> },
    /// The key's SHA-256 fingerprint must equal this value.
    Pinned { fingerprint: String },
    /// Accept any key.
    Disabled,
}

impl PeerVerification {
    pub fn name(&self) -> &'static str {
        match self {
            PeerVerification::Enforced { .. } => "enforced",
            PeerVerification::Pinned { .. } => "pinned",
            PeerVerification::Disabled => "disabled",
        }
    }

    /// Decide whether to trust `key` presented by `host:port`.
    pub fn accepts(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        match self {
            PeerVerification::Enforced { known_hosts } => {
                let result = match known_hosts {
                    Some(path) => check_known_hosts_path(host, port, key, path),
                    None => check_known_hosts(host, port, key),
                };
                match result {
                    Ok(known) => known,
                    Err(e) => {
                        tracing::warn!("known_hosts check failed for {}:{}: {}", host, port, e);
                        false
                    }
                }
            }
            PeerVerification::Pinned { fingerprint } => {
                let actual = key.fingerprint(HashAlg::Sha256).to_string();
                fingerprint_matches(fingerprint, &actual)
            }
            PeerVerification::Disabled => {
                tracing::warn!(
                    "host key verification disabled: accepting key for {}:{} without checking",
                    host,
                    port
                );
                true
            }
        }
    }
}

/// Compare fingerprints, tolerating a missing "SHA256:" prefix on the pinned value.
fn fingerprint_matches(pinned: &str, actual: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches("SHA256:").to_string();
    !pinned.trim().is_empty() && strip(pinned) == strip(actual)
}
