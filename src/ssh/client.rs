// ABOUTME: russh session to the orchestration host.
// ABOUTME: Public key authentication and one-shot command execution with a timeout.

use super::error::{Error, Result};
use super::verify::PeerVerification;
use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Keys tried in `~/.ssh` when neither a key file nor an agent key is accepted.
const DEFAULT_KEYS: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Explicit key file. When set, no other key is offered.
    pub key_path: Option<PathBuf>,
    pub peer: PeerVerification,
    /// Upper bound on a single remote command.
    pub command_timeout: Duration,
}

impl SessionConfig {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Result of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Applies the host key policy during the handshake.
pub(crate) struct HostKeyCheck {
    host: String,
    port: u16,
    peer: PeerVerification,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.peer.accepts(&self.host, self.port, server_public_key))
    }
}

pub struct Session {
    addr: String,
    command_timeout: Duration,
    handle: Handle<HostKeyCheck>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.addr)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Dial, verify the host key and authenticate.
    ///
    /// An explicit key file is loaded before dialing so a bad path fails fast.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let explicit_key = match config.key_path {
            Some(ref path) => Some(load_key(path)?),
            None => None,
        };

        let russh_config = client::Config {
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        let check = HostKeyCheck {
            host: config.host.clone(),
            port: config.port,
            peer: config.peer.clone(),
        };

        let addr = config.addr();
        let mut handle = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            check,
        )
        .await
        .map_err(|e| match e {
            russh::Error::UnknownKey => Error::HostKey(addr.clone()),
            e => Error::Dial {
                addr: addr.clone(),
                reason: e.to_string(),
            },
        })?;

        let accepted = match explicit_key {
            Some(key) => offer_key(&mut handle, &config.user, key).await?,
            None => offer_agent_keys(&mut handle, &config.user).await
                || offer_default_keys(&mut handle, &config.user).await?,
        };
        if !accepted {
            return Err(Error::NotAccepted {
                user: config.user,
                addr,
            });
        }

        tracing::debug!("SSH session to {} authenticated", addr);
        Ok(Self {
            addr,
            command_timeout: config.command_timeout,
            handle,
        })
    }

    /// Run `command` in a fresh channel and collect its output.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput> {
        tokio::time::timeout(self.command_timeout, self.run(command))
            .await
            .map_err(|_| Error::Timeout(self.command_timeout))?
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Exec(format!("cannot open channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Exec(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        let mut eof = false;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Err(Error::Signal(format!("{:?}", signal_name)));
                }
                ChannelMsg::Eof => eof = true,
                ChannelMsg::Close => break,
                _ => {}
            }
            if eof && exit_code.is_some() {
                break;
            }
        }

        Ok(CommandOutput {
            exit_code: exit_code.ok_or(Error::ChannelClosed)?,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// True once the transport is gone, e.g. after `disconnect` or a dropped connection.
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

fn load_key(path: &Path) -> Result<Arc<ssh_key::PrivateKey>> {
    load_secret_key(path, None)
        .map(Arc::new)
        .map_err(|e| Error::KeyFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

async fn offer_key(
    handle: &mut Handle<HostKeyCheck>,
    user: &str,
    key: Arc<ssh_key::PrivateKey>,
) -> Result<bool> {
    let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
    let result = handle
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
        .await?;
    Ok(result.success())
}

/// Offer every agent identity. An absent agent counts as no identities.
async fn offer_agent_keys(handle: &mut Handle<HostKeyCheck>, user: &str) -> bool {
    let Ok(mut agent) = AgentClient::connect_env().await else {
        return false;
    };
    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            tracing::debug!("SSH agent did not list identities: {}", e);
            return false;
        }
    };
    for key in identities {
        let accepted = handle
            .authenticate_publickey_with(user, key, None, &mut agent)
            .await
            .is_ok_and(|result| result.success());
        if accepted {
            return true;
        }
    }
    false
}

async fn offer_default_keys(handle: &mut Handle<HostKeyCheck>, user: &str) -> Result<bool> {
    let Some(home) = std::env::var_os("HOME") else {
        return Ok(false);
    };
    for name in DEFAULT_KEYS {
        let path = Path::new(&home).join(".ssh").join(name);
        let Ok(key) = load_secret_key(&path, None) else {
            continue;
        };
        if offer_key(handle, user, Arc::new(key)).await? {
            tracing::debug!("authenticated with {}", path.display());
            return Ok(true);
        }
    }
    Ok(false)
}
