// ABOUTME: Status command implementation.
// ABOUTME: Prints a rollout status snapshot of the deployment target.

use super::wiring;
use shipline::cluster::Cluster;
use shipline::config::Config;
use shipline::error::Result;
use shipline::output::Output;
use shipline::remote::Connector;

pub async fn status(config: Config, output: Output) -> Result<()> {
    let target = config.deployment_target()?;
    let connector = wiring::connector(&config);
    let kubectl = wiring::kubectl(&config, &target, connector.clone());

    let status = kubectl
        .get_status(&target.namespace, &target.selector())
        .await;
    for error in connector.disconnect_all().await {
        output.warning(&format!("SSH disconnect failed: {}", error));
    }
    let status = status?;

    output.document(&status);
    output.progress(&format!(
        "{}/{}: {}/{} replicas ready",
        target.namespace, target.app, status.ready_replica_count, status.desired_replica_count
    ));
    match status.observed_artifact {
        Some(ref digest) => output.progress(&format!("artifact: {}", digest)),
        None => output.progress("artifact: mixed or unknown"),
    }
    for replica in &status.replicas {
        output.progress(&format!(
            "  {} ready={} restarts={}{}",
            replica.name,
            replica.ready,
            replica.restart_count,
            replica
                .waiting_reason
                .as_ref()
                .map(|r| format!(" waiting={}", r))
                .unwrap_or_default()
        ));
    }
    if output.mode() == shipline::output::OutputMode::Quiet {
        output.success(&format!(
            "{}/{}",
            status.ready_replica_count, status.desired_replica_count
        ));
    }
    Ok(())
}
