// ABOUTME: Builds the production components from configuration.
// ABOUTME: docker for build and publish, SSH plus kubectl for the cluster, hyper for health.

use std::sync::Arc;

use shipline::build::DockerBuilder;
use shipline::cluster::{DeploymentTarget, Kubectl};
use shipline::config::Config;
use shipline::health::HttpProbe;
use shipline::pipeline::Components;
use shipline::registry::DockerRegistry;
use shipline::remote::SshConnector;

pub fn connector(config: &Config) -> Arc<SshConnector> {
    Arc::new(SshConnector::new(config.target.command_timeout))
}

pub fn kubectl(config: &Config, target: &DeploymentTarget, connector: Arc<SshConnector>) -> Kubectl {
    Kubectl::new(
        connector,
        target.orchestrator_endpoint.clone(),
        config.target.identity(),
    )
    .program(config.target.kubectl.clone())
}

pub fn components(config: &Config, target: &DeploymentTarget) -> Components {
    let connector = connector(config);

    let mut builder = DockerBuilder::new(&config.build.context);
    if let Some(ref dockerfile) = config.build.dockerfile {
        builder = builder.dockerfile(dockerfile);
    }

    Components {
        builder: Arc::new(builder),
        registry: Arc::new(DockerRegistry::new()),
        cluster: Arc::new(kubectl(config, target, connector.clone())),
        connector,
        probe: Arc::new(HttpProbe::new()),
    }
}
