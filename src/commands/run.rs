// ABOUTME: Run command implementation.
// ABOUTME: Executes one pipeline run for a revision and reports its outcome.

use std::path::PathBuf;

use super::wiring;
use shipline::config::Config;
use shipline::error::{Error, Result};
use shipline::output::Output;
use shipline::pipeline::{Outcome, Pipeline, PipelineSettings};
use shipline::types::Revision;

pub async fn run(
    config: Config,
    revision: Option<String>,
    tag: Option<String>,
    record: Option<PathBuf>,
    mut output: Output,
) -> Result<()> {
    let revision = revision
        .filter(|r| !r.trim().is_empty())
        .ok_or(Error::MissingRevision)?;
    let revision =
        Revision::new(&revision).map_err(|e| Error::InvalidConfig(format!("revision: {}", e)))?;

    let mut settings = PipelineSettings::from_config(&config)?;
    if let Some(tag) = tag {
        settings = settings.tag(tag);
    }
    let target = config.deployment_target()?;

    output.start_timer();
    output.progress(&format!(
        "Deploying {} {} to {} ({})",
        config.app,
        revision,
        target.orchestrator_endpoint,
        target.namespace
    ));

    let pipeline = Pipeline::new(wiring::components(&config, &target), target, settings);
    let run = pipeline.run(revision).await;

    if let Some(path) = record {
        std::fs::write(&path, serde_json::to_string_pretty(&run)?)?;
    }
    output.report(&run);

    match run.outcome {
        Outcome::Success => {
            output.success(&format!("Run {} succeeded", run.id));
            Ok(())
        }
        Outcome::Failed {
            stage,
            kind,
            reason,
        } => Err(Error::RunFailed {
            stage,
            kind,
            reason,
        }),
        Outcome::Aborted { reason } => Err(Error::RunAborted(reason)),
    }
}
