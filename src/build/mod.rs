// ABOUTME: Artifact builder stage: turns a source revision into an image.
// ABOUTME: Defines the Artifact record and the builder trait.

mod docker;

pub use docker::DockerBuilder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::{Classify, FailureKind};
use crate::types::{Digest, ImageRef, Revision};

/// An immutable, content-addressed deployable image.
///
/// Artifacts are never mutated; a newer build supersedes an older one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub source_revision: Revision,
    pub content_digest: Digest,
    /// Local image reference, including the tag it will be published under.
    pub image: ImageRef,
}

impl Artifact {
    pub fn tag(&self) -> Option<&str> {
        self.image.tag()
    }
}

/// Errors from building an artifact. All of them are fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("revision {revision} not found: {reason}")]
    RevisionNotFound { revision: String, reason: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not determine image digest: {0}")]
    Digest(String),
}

impl Classify for BuildError {
    fn kind(&self) -> FailureKind {
        FailureKind::Build
    }
}

/// Produces an artifact from a source revision.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Build `revision` and tag the result as `image`.
    async fn build(&self, revision: &Revision, image: &ImageRef) -> Result<Artifact, BuildError>;
}
