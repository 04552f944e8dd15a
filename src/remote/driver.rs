// ABOUTME: Remote deploy driver: opens the trusted channel and runs deploy commands.
// ABOUTME: Connection failures are retried; a non-zero exit status is a rejection.

use std::sync::Arc;

use super::{Connector, Endpoint, Identity, RemoteError, RemoteShell};
use crate::config::RetryPolicy;
use crate::pipeline::{Retried, StageError, with_retry};

pub struct RemoteDeployDriver {
    connector: Arc<dyn Connector>,
    identity: Identity,
    retry: RetryPolicy,
    commands: Vec<String>,
}

impl RemoteDeployDriver {
    pub fn new(
        connector: Arc<dyn Connector>,
        identity: Identity,
        retry: RetryPolicy,
        commands: Vec<String>,
    ) -> Self {
        Self {
            connector,
            identity,
            retry,
            commands,
        }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Open (or reuse) the channel to `endpoint`.
    pub async fn connect(&self, endpoint: &Endpoint) -> Retried<Arc<dyn RemoteShell>, RemoteError> {
        with_retry(&self.retry, "connect", || {
            self.connector.connect(endpoint, &self.identity)
        })
        .await
    }

    /// Run every deploy command in order, stopping at the first failure.
    ///
    /// The first attempt of each command uses `shell`. A command whose channel
    /// could not start it is retried on a channel from the connector. A command
    /// that timed out or was cut off is never run again.
    pub async fn run_commands(
        &self,
        endpoint: &Endpoint,
        shell: Arc<dyn RemoteShell>,
    ) -> Retried<(), StageError> {
        let mut retries = 0;
        for command in &self.commands {
            tracing::info!("remote: {}", command);
            let mut attempt = 0;
            let retried = with_retry(&self.retry, "remote command", || {
                attempt += 1;
                let first = attempt == 1;
                let shell = shell.clone();
                async move {
                    let shell = if first {
                        shell
                    } else {
                        self.connector.connect(endpoint, &self.identity).await?
                    };
                    shell.exec(command).await
                }
            })
            .await;
            retries += retried.retries;

            let output = match retried.result {
                Ok(output) => output,
                Err(e) => {
                    return Retried {
                        result: Err(e.into()),
                        retries,
                    };
                }
            };

            if !output.success() {
                return Retried {
                    result: Err(StageError::CommandRejected {
                        command: command.clone(),
                        exit_code: output.exit_code,
                        stderr: output.stderr.trim().to_string(),
                    }),
                    retries,
                };
            }
            if !output.stdout.trim().is_empty() {
                tracing::debug!("{}", output.stdout.trim());
            }
        }
        Retried {
            result: Ok(()),
            retries,
        }
    }
}
