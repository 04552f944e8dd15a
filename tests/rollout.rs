// ABOUTME: Rollout controller tests against a scripted cluster.
// ABOUTME: Convergence, terminal failure phases, deadlines and tolerated status errors.

mod support;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use shipline::config::{RetryPolicy, RolloutConfig};
use shipline::pipeline::{FailureKind, StageError};
use shipline::rollout::{RolloutController, RolloutPhase};
use support::fakes::{FakeCluster, Observed};
use support::fixtures::{artifact, spec, target};

fn controller(cluster: &Arc<FakeCluster>) -> RolloutController {
    RolloutController::new(
        cluster.clone(),
        RolloutConfig {
            deadline: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            crash_loop_restarts: 3,
        },
        RetryPolicy::default(),
    )
}

fn phase_of(error: &StageError) -> RolloutPhase {
    match error {
        StageError::Rollout { phase, .. } => *phase,
        other => panic!("expected a rollout error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn converges_after_progress() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.script([Observed::Pending, Observed::Progressing, Observed::Converged]);
    let artifact = artifact("abc123");
    let mut target = target();
    let started = Instant::now();

    let retried = controller(&cluster)
        .roll_out(&mut target, &spec(&artifact), &artifact)
        .await;

    let status = retried.result.unwrap();
    assert_eq!(status.observed_artifact, Some(artifact.content_digest.clone()));
    assert_eq!(status.ready_replica_count, 2);
    assert_eq!(cluster.status_calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(target.desired_artifact(), Some(&artifact));
}

#[tokio::test(start_paused = true)]
async fn rejected_apply_leaves_target_untouched() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.reject_apply();
    let artifact = artifact("abc123");
    let mut target = target();

    let retried = controller(&cluster)
        .roll_out(&mut target, &spec(&artifact), &artifact)
        .await;

    let error = retried.result.unwrap_err();
    assert_eq!(error.kind(), FailureKind::Rejected);
    assert_eq!(retried.retries, 0);
    assert_eq!(cluster.apply_calls(), 1);
    assert_eq!(cluster.status_calls(), 0);
    assert!(target.desired_artifact().is_none());
}

#[tokio::test(start_paused = true)]
async fn image_pull_failure_ends_immediately() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.script([Observed::ImagePull]);
    let artifact = artifact("abc123");
    let mut target = target();
    let started = Instant::now();

    let retried = controller(&cluster)
        .roll_out(&mut target, &spec(&artifact), &artifact)
        .await;

    let error = retried.result.unwrap_err();
    assert_eq!(phase_of(&error), RolloutPhase::ImagePullFailure);
    assert_eq!(error.kind(), FailureKind::ImagePullFailure);
    assert!(error.to_string().contains("todo-app-0"), "{error}");
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn stalls_at_the_deadline() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.script([Observed::Progressing]);
    let artifact = artifact("abc123");
    let mut target = target();
    let started = Instant::now();

    let retried = controller(&cluster)
        .roll_out(&mut target, &spec(&artifact), &artifact)
        .await;

    let error = retried.result.unwrap_err();
    assert_eq!(phase_of(&error), RolloutPhase::Stalled);
    assert_eq!(error.kind(), FailureKind::Stalled);
    assert!(error.to_string().contains("1/2 replicas ready"), "{error}");
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    // one read per poll interval plus the read at the deadline
    assert_eq!(cluster.status_calls(), 13);
}

#[tokio::test(start_paused = true)]
async fn restarts_past_threshold_are_a_crash_loop() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.script([
        Observed::CrashLoop(1),
        Observed::CrashLoop(2),
        Observed::CrashLoop(3),
    ]);
    let artifact = artifact("abc123");
    let mut target = target();

    let retried = controller(&cluster)
        .roll_out(&mut target, &spec(&artifact), &artifact)
        .await;

    let error = retried.result.unwrap_err();
    assert_eq!(phase_of(&error), RolloutPhase::CrashLooping);
    assert!(error.to_string().contains("restarted 3 times"), "{error}");
    assert_eq!(cluster.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn status_read_errors_are_tolerated() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.script([
        Observed::Unavailable,
        Observed::Unavailable,
        Observed::Converged,
    ]);
    let artifact = artifact("abc123");
    let mut target = target();

    let retried = controller(&cluster)
        .roll_out(&mut target, &spec(&artifact), &artifact)
        .await;

    assert!(retried.result.is_ok());
    assert_eq!(cluster.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn unreachable_cluster_stalls_without_status() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.script([Observed::Unavailable]);
    let artifact = artifact("abc123");
    let mut target = target();

    let retried = controller(&cluster)
        .roll_out(&mut target, &spec(&artifact), &artifact)
        .await;

    let error = retried.result.unwrap_err();
    assert_eq!(phase_of(&error), RolloutPhase::Stalled);
    assert!(error.to_string().contains("no status observed"), "{error}");
}
