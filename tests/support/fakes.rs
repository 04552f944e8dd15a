// ABOUTME: In-memory stand-ins for the builder, registry, cluster, SSH host and probe.
// ABOUTME: Each fake records what it was asked to do and replays a scripted behavior.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use shipline::build::{Artifact, ArtifactBuilder, BuildError};
use shipline::cluster::{
    Cluster, ClusterError, DeploymentSpec, ReplicaStatus, RolloutStatus, SecretPayload,
};
use shipline::health::{HealthProbe, ProbeError};
use shipline::pipeline::LockInfo;
use shipline::registry::{Credential, Registry, RegistryError};
use shipline::remote::{CommandOutput, Connector, Endpoint, Identity, RemoteError, RemoteShell};
use shipline::types::{Digest, ImageRef, ResourceName, Revision};

// =============================================================================
// Builder
// =============================================================================

/// Builds instantly; the content digest is derived from the revision.
#[derive(Default)]
pub struct FakeBuilder {
    calls: AtomicU32,
    failure: Mutex<Option<String>>,
}

impl FakeBuilder {
    pub fn fail_with(&self, stderr: &str) {
        *self.failure.lock() = Some(stderr.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactBuilder for FakeBuilder {
    async fn build(&self, revision: &Revision, image: &ImageRef) -> Result<Artifact, BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stderr) = self.failure.lock().clone() {
            return Err(BuildError::Failed {
                program: "docker build".to_string(),
                code: Some(1),
                stderr,
            });
        }
        Ok(Artifact {
            source_revision: revision.clone(),
            content_digest: Digest::of(revision.as_str()),
            image: image.clone(),
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushReply {
    Stored,
    Unreachable,
    Unauthorized,
}

/// Stores tags in memory; the manifest digest depends only on the content.
#[derive(Default)]
pub struct FakeRegistry {
    replies: Mutex<VecDeque<PushReply>>,
    pushes: AtomicU32,
    pull_checks: AtomicU32,
    pull_denied: AtomicBool,
    tags: Mutex<HashMap<String, Digest>>,
}

impl FakeRegistry {
    /// Replies for the next pushes; once used up every push is stored.
    pub fn script_pushes(&self, replies: impl IntoIterator<Item = PushReply>) {
        self.replies.lock().extend(replies);
    }

    pub fn deny_pull(&self) {
        self.pull_denied.store(true, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> u32 {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn pull_checks(&self) -> u32 {
        self.pull_checks.load(Ordering::SeqCst)
    }

    pub fn manifest_for(&self, image: &str) -> Option<Digest> {
        self.tags.lock().get(image).cloned()
    }

    pub fn manifest_of(content: &Digest) -> Digest {
        Digest::of(format!("manifest for {}", content))
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn push(&self, artifact: &Artifact, credential: &Credential) -> Result<Digest, RegistryError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().pop_front().unwrap_or(PushReply::Stored);
        match reply {
            PushReply::Stored => {
                let manifest = Self::manifest_of(&artifact.content_digest);
                self.tags
                    .lock()
                    .insert(artifact.image.to_string(), manifest.clone());
                Ok(manifest)
            }
            PushReply::Unreachable => Err(RegistryError::Network(
                "dial tcp: connection reset by peer".to_string(),
            )),
            PushReply::Unauthorized => Err(RegistryError::Auth {
                registry: credential.registry_host.clone(),
                principal: credential.principal.clone(),
                reason: "unauthorized: incorrect username or password".to_string(),
            }),
        }
    }

    async fn pull_authorized(&self, _image: &ImageRef, _credential: &Credential) -> Result<bool, RegistryError> {
        self.pull_checks.fetch_add(1, Ordering::SeqCst);
        Ok(!self.pull_denied.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// What the cluster reports on a status read, relative to the last applied spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// Only replicas of the previous release.
    Pending,
    /// One new replica, not ready yet.
    Progressing,
    /// Every replica runs the new artifact and is ready.
    Converged,
    /// One new replica stuck pulling its image.
    ImagePull,
    /// One new replica restarting with the given count.
    CrashLoop(u32),
    /// The API server cannot be reached.
    Unavailable,
}

pub struct FakeCluster {
    applied: Mutex<Vec<DeploymentSpec>>,
    apply_calls: AtomicU32,
    reject_apply: AtomicBool,
    script: Mutex<VecDeque<Observed>>,
    last: Mutex<Observed>,
    status_calls: AtomicU32,
    secrets: Mutex<HashMap<String, String>>,
    secret_attempts: AtomicU32,
    secret_failures: AtomicU32,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            apply_calls: AtomicU32::new(0),
            reject_apply: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Observed::Converged),
            status_calls: AtomicU32::new(0),
            secrets: Mutex::new(HashMap::new()),
            secret_attempts: AtomicU32::new(0),
            secret_failures: AtomicU32::new(0),
        }
    }
}

impl FakeCluster {
    /// Status reads replay `steps` in order; the last one repeats.
    pub fn script(&self, steps: impl IntoIterator<Item = Observed>) {
        self.script.lock().extend(steps);
    }

    pub fn reject_apply(&self) {
        self.reject_apply.store(true, Ordering::SeqCst);
    }

    /// The next `count` secret writes fail as if the API server were down.
    pub fn fail_secret_writes(&self, count: u32) {
        self.secret_failures.store(count, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<DeploymentSpec> {
        self.applied.lock().clone()
    }

    pub fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn secret_attempts(&self) -> u32 {
        self.secret_attempts.load(Ordering::SeqCst)
    }

    /// Stored `.dockerconfigjson` contents keyed by `namespace/name`.
    pub fn secrets(&self) -> HashMap<String, String> {
        self.secrets.lock().clone()
    }

    pub fn previous_release() -> Digest {
        Digest::of("previous release")
    }

    fn status_of(observed: Observed, spec: &DeploymentSpec) -> RolloutStatus {
        let old = Self::previous_release();
        let replica = |i: u32, artifact: &Digest, ready: bool| ReplicaStatus {
            name: format!("{}-{}", spec.app, i),
            artifact: Some(artifact.clone()),
            ready,
            restart_count: 0,
            waiting_reason: None,
        };
        let with_first = |first: ReplicaStatus| {
            let mut replicas = vec![first];
            replicas.extend((1..spec.replicas).map(|i| replica(i, &old, true)));
            replicas
        };

        let replicas = match observed {
            Observed::Pending => (0..spec.replicas).map(|i| replica(i, &old, true)).collect(),
            Observed::Progressing => with_first(replica(0, &spec.artifact, false)),
            Observed::Converged => (0..spec.replicas)
                .map(|i| replica(i, &spec.artifact, true))
                .collect(),
            Observed::ImagePull => with_first(ReplicaStatus {
                waiting_reason: Some("ImagePullBackOff".to_string()),
                ..replica(0, &spec.artifact, false)
            }),
            Observed::CrashLoop(restarts) => with_first(ReplicaStatus {
                restart_count: restarts,
                waiting_reason: Some("CrashLoopBackOff".to_string()),
                ..replica(0, &spec.artifact, false)
            }),
            Observed::Unavailable => unreachable!("handled by the caller"),
        };
        RolloutStatus::from_replicas(spec.replicas, replicas)
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn apply(&self, spec: &DeploymentSpec) -> Result<(), ClusterError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_apply.load(Ordering::SeqCst) {
            return Err(ClusterError::Rejected {
                what: format!("deployment {}", spec.app),
                reason: "admission webhook denied the request".to_string(),
            });
        }
        self.applied.lock().push(spec.clone());
        Ok(())
    }

    async fn get_status(&self, _namespace: &ResourceName, _selector: &str) -> Result<RolloutStatus, ClusterError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let observed = {
            let mut last = self.last.lock();
            if let Some(next) = self.script.lock().pop_front() {
                *last = next;
            }
            *last
        };
        if observed == Observed::Unavailable {
            return Err(ClusterError::Unavailable(
                "The connection to the server was refused".to_string(),
            ));
        }
        match self.applied.lock().last() {
            Some(spec) => Ok(Self::status_of(observed, spec)),
            None => Ok(RolloutStatus::from_replicas(0, Vec::new())),
        }
    }

    async fn create_or_update_secret(
        &self,
        namespace: &ResourceName,
        name: &ResourceName,
        payload: &SecretPayload,
    ) -> Result<(), ClusterError> {
        self.secret_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .secret_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClusterError::Unavailable("connection refused".to_string()));
        }
        self.secrets
            .lock()
            .insert(format!("{}/{}", namespace, name), payload.docker_config_json());
        Ok(())
    }
}

// =============================================================================
// SSH host
// =============================================================================

/// A remote host with a tiny file system for lock files.
///
/// Understands the exact commands the target lock issues; every other
/// command succeeds unless a rejection matches it.
#[derive(Default)]
pub struct FakeShell {
    files: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    rejections: Mutex<Vec<(String, u32, String)>>,
    exec_failures: AtomicU32,
    timeouts: Mutex<Vec<String>>,
    fail_removal: AtomicBool,
}

impl FakeShell {
    /// Commands containing `pattern` exit with `exit_code` and `stderr`.
    pub fn reject(&self, pattern: &str, exit_code: u32, stderr: &str) {
        self.rejections
            .lock()
            .push((pattern.to_string(), exit_code, stderr.to_string()));
    }

    /// The next `count` deploy commands cannot be started on the channel.
    pub fn fail_execs(&self, count: u32) {
        self.exec_failures.store(count, Ordering::SeqCst);
    }

    /// Commands containing `pattern` run past the command timeout.
    pub fn time_out(&self, pattern: &str) {
        self.timeouts.lock().push(pattern.to_string());
    }

    /// `rm` of lock files fails.
    pub fn fail_removal(&self) {
        self.fail_removal.store(true, Ordering::SeqCst);
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.files.lock().insert(path.to_string(), content.to_string());
    }

    /// Place a lock as if another run held it.
    pub fn put_lock(&self, info: &LockInfo) {
        let json = serde_json::to_string(info).unwrap();
        self.put_file(&LockInfo::lock_path(&info.target), &json);
    }

    pub fn lock(&self, target: &str) -> Option<LockInfo> {
        let files = self.files.lock();
        let content = files.get(&LockInfo::lock_path(target))?;
        serde_json::from_str(content).ok()
    }

    pub fn remove_lock(&self, target: &str) {
        self.files.lock().remove(&LockInfo::lock_path(target));
    }

    pub fn lock_files(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Commands that are not part of the lock protocol.
    pub fn deploy_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !is_lock_command(c))
            .collect()
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn exit(code: u32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn run_lock_command(&self, command: &str) -> CommandOutput {
        if command.starts_with("mkdir -p ") {
            return Self::ok("");
        }
        if let Some(rest) = command.strip_prefix("(set -C; echo ") {
            let Some((quoted, tail)) = rest.rsplit_once(" > \"") else {
                return Self::exit(2, "syntax error");
            };
            let path = tail.trim_end_matches("\") 2>/dev/null");
            let content = unquote(quoted);
            let mut files = self.files.lock();
            if files.contains_key(path) {
                return Self::exit(1, "");
            }
            files.insert(path.to_string(), content);
            return Self::ok("");
        }
        if let Some(path) = quoted_path(command, "cat \"") {
            return match self.files.lock().get(path) {
                Some(content) => Self::ok(&format!("{}\n", content)),
                None => Self::exit(1, &format!("cat: {}: No such file or directory", path)),
            };
        }
        if let Some(path) = quoted_path(command, "rm -f \"") {
            if self.fail_removal.load(Ordering::SeqCst) {
                return Self::exit(1, &format!("rm: cannot remove '{}': Permission denied", path));
            }
            self.files.lock().remove(path);
            return Self::ok("");
        }
        Self::exit(127, "unknown lock command")
    }
}

fn is_lock_command(command: &str) -> bool {
    command.starts_with("mkdir -p ")
        || command.starts_with("(set -C; ")
        || command.starts_with("cat \"")
        || command.starts_with("rm -f \"")
}

fn quoted_path<'a>(command: &'a str, prefix: &str) -> Option<&'a str> {
    command.strip_prefix(prefix)?.strip_suffix('"')
}

fn unquote(quoted: &str) -> String {
    quoted
        .trim_start_matches('\'')
        .trim_end_matches('\'')
        .replace("'\\''", "'")
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.commands.lock().push(command.to_string());
        if is_lock_command(command) {
            return Ok(self.run_lock_command(command));
        }

        let failing = self
            .exec_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::Channel("channel open refused by peer".to_string()));
        }
        if self.timeouts.lock().iter().any(|p| command.contains(p.as_str())) {
            return Err(RemoteError::Timeout(Duration::from_secs(60)));
        }

        let rejection = self
            .rejections
            .lock()
            .iter()
            .find(|(pattern, _, _)| command.contains(pattern.as_str()))
            .cloned();
        Ok(match rejection {
            Some((_, code, stderr)) => Self::exit(code, &stderr),
            None => Self::ok(""),
        })
    }
}

/// One connection to the [`FakeShell`]. Stops working once disconnected.
struct FakeSession {
    shell: Arc<FakeShell>,
    open: AtomicBool,
}

#[async_trait]
impl RemoteShell for FakeSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RemoteError::Channel("session closed".to_string()));
        }
        self.shell.exec(command).await
    }
}

/// Connects every session to the same [`FakeShell`], like one host would.
/// `disconnect_all` closes the sessions handed out so far.
#[derive(Default)]
pub struct FakeConnector {
    pub shell: Arc<FakeShell>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    connects: AtomicU32,
    disconnects: AtomicU32,
    connect_failures: AtomicU32,
    auth_failure: AtomicBool,
    disconnect_failure: AtomicBool,
}

impl FakeConnector {
    /// The next `count` connection attempts are refused.
    pub fn fail_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn reject_key(&self) {
        self.auth_failure.store(true, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self) {
        self.disconnect_failure.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &Endpoint, _identity: &Identity) -> Result<Arc<dyn RemoteShell>, RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.auth_failure.load(Ordering::SeqCst) {
            return Err(RemoteError::Auth {
                endpoint: endpoint.to_string(),
                reason: "publickey rejected".to_string(),
            });
        }
        let refused = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RemoteError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let session = Arc::new(FakeSession {
            shell: self.shell.clone(),
            open: AtomicBool::new(true),
        });
        self.sessions.lock().push(session.clone());
        Ok(session)
    }

    async fn disconnect_all(&self) -> Vec<RemoteError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        for session in self.sessions.lock().drain(..) {
            session.open.store(false, Ordering::SeqCst);
        }
        if self.disconnect_failure.load(Ordering::SeqCst) {
            vec![RemoteError::Command("disconnect: broken pipe".to_string())]
        } else {
            Vec::new()
        }
    }
}

// =============================================================================
// Health probe
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReply {
    Status(u16),
    Refused,
    /// Never answers.
    Hang,
}

/// Replays scripted answers; the last one repeats.
pub struct ScriptedProbe {
    replies: Mutex<VecDeque<ProbeReply>>,
    last: Mutex<ProbeReply>,
    started: Mutex<Vec<Instant>>,
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self::new([ProbeReply::Status(200)])
    }
}

impl ScriptedProbe {
    pub fn new(replies: impl IntoIterator<Item = ProbeReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(ProbeReply::Refused),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, replies: impl IntoIterator<Item = ProbeReply>) {
        let mut queue = self.replies.lock();
        queue.clear();
        queue.extend(replies);
    }

    pub fn calls(&self) -> u32 {
        self.started.lock().len() as u32
    }

    /// When each probe started, on the tokio clock.
    pub fn started(&self) -> Vec<Instant> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &str, _timeout: Duration) -> Result<u16, ProbeError> {
        self.started.lock().push(Instant::now());
        let reply = {
            let mut last = self.last.lock();
            if let Some(next) = self.replies.lock().pop_front() {
                *last = next;
            }
            *last
        };
        match reply {
            ProbeReply::Status(code) => Ok(code),
            ProbeReply::Refused => Err(ProbeError::Connect(format!("{}: connection refused", endpoint))),
            ProbeReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProbeError::Http("no answer".to_string()))
            }
        }
    }
}
