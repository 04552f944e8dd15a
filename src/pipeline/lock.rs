// ABOUTME: Target lock so only one run at a time writes a deployment target.
// ABOUTME: Atomic noclobber file on the orchestration host, in ~/.local/state/shipline/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::{ConflictPolicy, LockConfig};
use crate::remote::{RemoteShell, shell_quote};

use super::error::StageError;

/// Base directory for shipline state files (XDG Base Directory compliant).
const STATE_DIR: &str = ".local/state/shipline";

/// Information about who holds a target lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine running the holder.
    pub holder: String,
    pub pid: u32,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Lock key of the target, `<namespace>-<app>`.
    pub target: String,
}

impl LockInfo {
    pub fn new(target: &str, run_id: &str) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            target: target.to_string(),
        }
    }

    /// Locks older than an hour belong to runs that died without cleaning up.
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_hours() >= 1
    }

    /// Uses $HOME for shell expansion compatibility.
    pub fn lock_path(target: &str) -> String {
        format!("$HOME/{}/{}.lock", STATE_DIR, target)
    }
}

enum Attempt {
    Acquired,
    /// Held by someone else; `None` when the file is unreadable.
    Held(Option<LockInfo>),
}

/// A held target lock. Must be released explicitly with [`TargetLock::release`].
pub struct TargetLock {
    shell: Arc<dyn RemoteShell>,
    info: LockInfo,
}

impl std::fmt::Debug for TargetLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetLock").field("info", &self.info).finish()
    }
}

impl TargetLock {
    /// Acquire the lock for `target`, queueing or rejecting per `config`.
    ///
    /// Stale or unreadable locks are broken with a warning, once per attempt.
    pub async fn acquire(
        shell: Arc<dyn RemoteShell>,
        target: &str,
        run_id: &str,
        config: &LockConfig,
    ) -> Result<Self, StageError> {
        ensure_state_dir(shell.as_ref()).await?;

        let info = LockInfo::new(target, run_id);
        let path = LockInfo::lock_path(target);
        let json = serde_json::to_string(&info).map_err(|e| StageError::Lock {
            message: format!("failed to serialize lock: {}", e),
        })?;
        let deadline = Instant::now() + config.queue_timeout;
        let mut just_broke = false;

        loop {
            let existing = match try_create(shell.as_ref(), &path, &json).await? {
                Attempt::Acquired => {
                    tracing::debug!("acquired target lock {}", path);
                    return Ok(Self { shell, info });
                }
                Attempt::Held(existing) => existing,
            };

            if !just_broke {
                let reason = match existing {
                    None => Some("unreadable".to_string()),
                    Some(ref held) if held.is_stale() => Some(format!(
                        "stale (held by {} pid {} since {})",
                        held.holder, held.pid, held.started_at
                    )),
                    Some(_) => None,
                };
                if let Some(reason) = reason {
                    tracing::warn!("breaking {} target lock for {}", reason, target);
                    remove(shell.as_ref(), &path).await?;
                    just_broke = true;
                    continue;
                }
            }
            just_broke = false;

            let held_error = || match existing.clone() {
                Some(held) => StageError::LockHeld {
                    target: target.to_string(),
                    holder: held.holder,
                    pid: held.pid,
                    run_id: held.run_id,
                    since: held.started_at,
                },
                None => StageError::Lock {
                    message: format!("{} is locked by another process", target),
                },
            };

            let now = Instant::now();
            if config.on_conflict == ConflictPolicy::Reject || now >= deadline {
                return Err(held_error());
            }
            if let Some(ref held) = existing {
                tracing::info!(
                    "{} is locked by run {} on {}; waiting",
                    target,
                    held.run_id,
                    held.holder
                );
            }
            tokio::time::sleep(config.poll_interval.min(deadline - now)).await;
        }
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Remove the lock file if it still belongs to this run.
    pub async fn release(self) -> Result<(), StageError> {
        let path = LockInfo::lock_path(&self.info.target);
        match read(self.shell.as_ref(), &path).await? {
            Some(current) if current.run_id != self.info.run_id => {
                return Err(StageError::Lock {
                    message: format!(
                        "lock for {} was taken over by run {}; leaving it in place",
                        self.info.target, current.run_id
                    ),
                });
            }
            _ => {}
        }
        remove(self.shell.as_ref(), &path).await
    }
}

async fn ensure_state_dir(shell: &dyn RemoteShell) -> Result<(), StageError> {
    let output = shell
        .exec(&format!("mkdir -p \"$HOME/{}\"", STATE_DIR))
        .await?;
    if !output.success() {
        return Err(StageError::Lock {
            message: format!("failed to create state directory: {}", output.stderr.trim()),
        });
    }
    Ok(())
}

/// `set -C` makes `>` fail if the file exists, so creation is atomic.
async fn try_create(shell: &dyn RemoteShell, path: &str, json: &str) -> Result<Attempt, StageError> {
    let command = format!("(set -C; echo {} > \"{}\") 2>/dev/null", shell_quote(json), path);
    if shell.exec(&command).await?.success() {
        return Ok(Attempt::Acquired);
    }
    Ok(Attempt::Held(read(shell, path).await?))
}

async fn read(shell: &dyn RemoteShell, path: &str) -> Result<Option<LockInfo>, StageError> {
    let output = shell.exec(&format!("cat \"{}\"", path)).await?;
    if !output.success() {
        return Ok(None);
    }
    Ok(serde_json::from_str(output.stdout.trim()).ok())
}

async fn remove(shell: &dyn RemoteShell, path: &str) -> Result<(), StageError> {
    let output = shell.exec(&format!("rm -f \"{}\"", path)).await?;
    if !output.success() {
        return Err(StageError::Lock {
            message: format!("failed to remove {}: {}", path, output.stderr.trim()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_info_creates_with_current_host_and_pid() {
        let info = LockInfo::new("default-todo-app", "run-1");

        assert_eq!(info.target, "default-todo-app");
        assert_eq!(info.run_id, "run-1");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn lock_path_uses_state_dir() {
        assert_eq!(
            LockInfo::lock_path("default-todo-app"),
            "$HOME/.local/state/shipline/default-todo-app.lock"
        );
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        assert!(!LockInfo::new("t", "r").is_stale());
    }

    #[test]
    fn old_lock_is_stale() {
        let mut info = LockInfo::new("t", "r");
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale());
    }
}
