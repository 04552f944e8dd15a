// ABOUTME: Run state marker types for the type state pattern.
// ABOUTME: Each state carries what the previous stages produced.

use crate::build::Artifact;
use crate::registry::PublishedArtifact;

/// A revision arrived; nothing has run.
/// Available actions: `build()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Triggered;

/// Artifact built locally.
/// Available actions: `publish()`
#[derive(Debug, Clone)]
pub struct Built {
    pub(crate) artifact: Artifact,
}

/// Artifact stored in the registry.
/// Available actions: `provision_secret()`
#[derive(Debug, Clone)]
pub struct Published {
    pub(crate) published: PublishedArtifact,
}

/// Pull secret present on the target.
/// Available actions: `deploy()`
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub(crate) published: PublishedArtifact,
}

/// Target locked and deploy commands accepted.
/// Available actions: `roll_out()`
#[derive(Debug, Clone)]
pub struct Deployed {
    pub(crate) published: PublishedArtifact,
}

/// Every replica runs the artifact and is ready.
/// Available actions: `verify_health()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Converged;

/// The service answered its health check.
/// Available actions: `finish()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Verified;
