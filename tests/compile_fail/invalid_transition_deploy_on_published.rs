// ABOUTME: Compile-fail test verifying remote deploy requires a provisioned secret.
// ABOUTME: This test should fail to compile, validating state transitions.

use shipline::config::LockConfig;
use shipline::pipeline::{Published, Run};
use shipline::remote::{Endpoint, RemoteDeployDriver};

fn skip_secret(run: Run<Published>, driver: &RemoteDeployDriver, endpoint: &Endpoint) {
    // ERROR: no method `deploy` on Run<Published>
    let _ = run.deploy(driver, endpoint, "default-todo-app", &LockConfig::default());
}

fn main() {}
