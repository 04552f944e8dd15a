// ABOUTME: The append-only record of one pipeline run.
// ABOUTME: Stage results in execution order plus the single terminal outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::FailureKind;
use crate::build::Artifact;
use crate::cluster::RolloutStatus;
use crate::diagnostics::Warning;
use crate::types::{Digest, Revision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Build,
    Publish,
    ProvisionSecret,
    RemoteDeploy,
    Rollout,
    HealthVerify,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Build,
        Stage::Publish,
        Stage::ProvisionSecret,
        Stage::RemoteDeploy,
        Stage::Rollout,
        Stage::HealthVerify,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Publish => "publish",
            Stage::ProvisionSecret => "provision-secret",
            Stage::RemoteDeploy => "remote-deploy",
            Stage::Rollout => "rollout",
            Stage::HealthVerify => "health-verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded { detail: String },
    Failed { kind: FailureKind, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
    /// Retries spent inside the stage, not counting the first attempt.
    pub retries: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, StageStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed {
        stage: Stage,
        kind: FailureKind,
        reason: String,
    },
    /// The run never got the deployment target.
    Aborted { reason: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failed {
                stage,
                kind: FailureKind::Unhealthy,
                reason,
            } => write!(f, "failed at {stage}: converged but unhealthy: {reason}"),
            Outcome::Failed {
                stage,
                kind: FailureKind::Stalled,
                reason,
            } => write!(f, "failed at {stage}: never converged: {reason}"),
            Outcome::Failed {
                stage,
                kind,
                reason,
            } => write!(f, "failed at {stage} ({kind}): {reason}"),
            Outcome::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: String,
    pub revision: Revision,
    pub artifact: Option<Artifact>,
    /// Digest the registry stored the artifact under.
    pub manifest_digest: Option<Digest>,
    pub stage_results: Vec<StageResult>,
    /// Converged rollout snapshot; absent when the run stopped before convergence.
    pub rollout: Option<RolloutStatus>,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub warnings: Vec<Warning>,
}

impl PipelineRun {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn stages_run(&self) -> Vec<Stage> {
        self.stage_results.iter().map(|r| r.stage).collect()
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage == stage)
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self.outcome {
            Outcome::Failed { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

pub(crate) fn run_id(started_at: DateTime<Utc>, revision: &Revision) -> String {
    format!(
        "{}-{}",
        started_at.format("%Y%m%dT%H%M%SZ"),
        revision.short().replace('/', "-")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stage_names_are_kebab_case() {
        let names: Vec<_> = Stage::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            [
                "build",
                "publish",
                "provision-secret",
                "remote-deploy",
                "rollout",
                "health-verify"
            ]
        );
        assert_eq!(
            serde_json::to_string(&Stage::ProvisionSecret).unwrap(),
            "\"provision-secret\""
        );
    }

    #[test]
    fn run_id_uses_start_time_and_revision() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let rev = Revision::new("abc123").unwrap();
        assert_eq!(run_id(at, &rev), "20261019T083000Z-abc123");
    }

    #[test]
    fn outcomes_read_differently() {
        let unhealthy = Outcome::Failed {
            stage: Stage::HealthVerify,
            kind: FailureKind::Unhealthy,
            reason: "unexpected status 500".to_string(),
        };
        let stalled = Outcome::Failed {
            stage: Stage::Rollout,
            kind: FailureKind::Stalled,
            reason: "0/2 ready".to_string(),
        };
        let auth = Outcome::Failed {
            stage: Stage::Publish,
            kind: FailureKind::Auth,
            reason: "denied".to_string(),
        };
        assert!(unhealthy.to_string().contains("converged but unhealthy"));
        assert!(stalled.to_string().contains("never converged"));
        assert!(auth.to_string().contains("authentication error"));
    }

    #[test]
    fn outcome_json_is_tagged() {
        let json = serde_json::to_value(Outcome::Failed {
            stage: Stage::Publish,
            kind: FailureKind::Auth,
            reason: "denied".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["stage"], "publish");
        assert_eq!(json["kind"], "auth");
    }
}
