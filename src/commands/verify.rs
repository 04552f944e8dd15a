// ABOUTME: Verify command implementation.
// ABOUTME: Runs only the health verifier against the configured endpoint.

use std::sync::Arc;

use shipline::config::Config;
use shipline::error::{Error, Result};
use shipline::health::{HealthOutcome, HealthVerifier, HttpProbe};
use shipline::output::Output;

pub async fn verify(config: Config, mut output: Output) -> Result<()> {
    let request = config.health.request();
    output.start_timer();
    output.progress(&format!("Probing {}...", request.endpoint));

    let verifier = HealthVerifier::new(Arc::new(HttpProbe::new()));
    match verifier.verify(&request).await {
        HealthOutcome::Healthy { attempts } => {
            output.success(&format!(
                "{} is healthy ({} probe(s))",
                request.endpoint, attempts
            ));
            Ok(())
        }
        HealthOutcome::Unhealthy {
            attempts,
            last_error,
        } => Err(Error::Unhealthy(format!(
            "{} after {} probe(s)",
            last_error, attempts
        ))),
    }
}
