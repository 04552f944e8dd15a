// ABOUTME: SSH-backed connector for the orchestration host.
// ABOUTME: Caches one session per endpoint so every stage reuses the same channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CommandOutput, Connector, Endpoint, Identity, RemoteError, RemoteShell};
use crate::ssh::{self, Session, SessionConfig};

pub struct SshConnector {
    command_timeout: Duration,
    sessions: Mutex<HashMap<Endpoint, Arc<SshShell>>>,
}

impl SshConnector {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            command_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for SshConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnector")
            .field("command_timeout", &self.command_timeout)
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
    ) -> Result<Arc<dyn RemoteShell>, RemoteError> {
        if let Some(shell) = self.sessions.lock().get(endpoint).cloned() {
            if !shell.session.is_closed() {
                return Ok(shell);
            }
            tracing::debug!("SSH session to {} closed, reconnecting", endpoint);
        }

        let config = SessionConfig {
            host: endpoint.host.clone(),
            port: endpoint.port,
            user: endpoint.user.clone(),
            key_path: identity.key_path.clone(),
            peer: endpoint.peer.clone(),
            command_timeout: self.command_timeout,
        };

        tracing::debug!("opening SSH session to {}", endpoint);
        let session = Session::connect(config)
            .await
            .map_err(|e| map_error(endpoint, e))?;

        let shell = Arc::new(SshShell {
            endpoint: endpoint.clone(),
            session,
        });
        // A concurrent connect may have won; keep its session while it is open.
        let mut sessions = self.sessions.lock();
        let cached = sessions
            .get(endpoint)
            .filter(|cached| !cached.session.is_closed())
            .cloned();
        let shell = match cached {
            Some(cached) => cached,
            None => {
                sessions.insert(endpoint.clone(), shell.clone());
                shell
            }
        };
        Ok(shell)
    }

    async fn disconnect_all(&self) -> Vec<RemoteError> {
        let shells: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        let mut errors = Vec::new();
        for shell in shells {
            if let Err(e) = shell.session.disconnect().await {
                errors.push(map_error(&shell.endpoint, e));
            }
        }
        errors
    }
}

struct SshShell {
    endpoint: Endpoint,
    session: Session,
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.session
            .exec(command)
            .await
            .map_err(|e| map_error(&self.endpoint, e))
    }
}

fn map_error(endpoint: &Endpoint, error: ssh::Error) -> RemoteError {
    let endpoint_name = endpoint.to_string();
    match error {
        ssh::Error::NotAccepted { .. } | ssh::Error::KeyFile { .. } => RemoteError::Auth {
            endpoint: endpoint_name,
            reason: error.to_string(),
        },
        ssh::Error::HostKey(_) => RemoteError::HostKeyRejected {
            endpoint: endpoint_name,
            policy: endpoint.peer.name(),
        },
        ssh::Error::Timeout(timeout) => RemoteError::Timeout(timeout),
        ssh::Error::Exec(_) => RemoteError::Channel(error.to_string()),
        ssh::Error::Signal(_) | ssh::Error::ChannelClosed => RemoteError::Command(error.to_string()),
        ssh::Error::Dial { .. } | ssh::Error::Protocol(_) => RemoteError::Connect {
            endpoint: endpoint_name,
            reason: error.to_string(),
        },
    }
}
