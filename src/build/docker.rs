// ABOUTME: Docker-based artifact builder.
// ABOUTME: Builds the exact tree of a git revision and reads back the image id.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{Artifact, ArtifactBuilder, BuildError};
use crate::process::{self, ProcessOutput};
use crate::types::{Digest, ImageRef, Revision};

/// Builds images with the docker CLI from `git archive` output.
///
/// The build context is the committed tree of the revision, never the
/// working copy, so two builds of one revision see identical input. The
/// commit time is passed as `SOURCE_DATE_EPOCH`. The resulting image id can
/// still differ between builds when the Dockerfile pulls a moving base tag or
/// writes timestamps of its own.
#[derive(Debug, Clone)]
pub struct DockerBuilder {
    context: PathBuf,
    dockerfile: Option<PathBuf>,
    docker: String,
}

impl DockerBuilder {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            dockerfile: None,
            docker: "docker".to_string(),
        }
    }

    /// Command used in place of `docker`, e.g. `podman`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.docker = program.into();
        self
    }

    /// Dockerfile path inside the revision's tree.
    pub fn dockerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.dockerfile = Some(path.into());
        self
    }

    async fn git(&self, args: &[&str]) -> Result<ProcessOutput, BuildError> {
        let context = self.context.to_string_lossy();
        let mut full = vec!["-C", context.as_ref()];
        full.extend_from_slice(args);
        process::run("git", &full, &[], None)
            .await
            .map_err(|source| BuildError::Spawn {
                program: "git".to_string(),
                source,
            })
    }

    async fn docker(
        &self,
        args: &[&str],
        envs: &[(&str, &str)],
        stdin: Option<Vec<u8>>,
    ) -> Result<ProcessOutput, BuildError> {
        let output = process::run(&self.docker, args, envs, stdin)
            .await
            .map_err(|source| BuildError::Spawn {
                program: self.docker.clone(),
                source,
            })?;
        if !output.success() {
            return Err(BuildError::Failed {
                program: format!("{} {}", self.docker, args.first().unwrap_or(&"")),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Resolve the revision to a full commit id.
    async fn resolve_commit(&self, revision: &Revision) -> Result<String, BuildError> {
        let spec = format!("{}^{{commit}}", revision);
        let output = self.git(&["rev-parse", "--verify", "--quiet", &spec]).await?;
        if !output.success() {
            return Err(BuildError::RevisionNotFound {
                revision: revision.to_string(),
                reason: if output.stderr.is_empty() {
                    "unknown revision".to_string()
                } else {
                    output.stderr
                },
            });
        }
        Ok(output.stdout_text())
    }

    async fn commit_epoch(&self, commit: &str) -> Result<String, BuildError> {
        let output = self.git(&["show", "-s", "--format=%ct", commit]).await?;
        if !output.success() {
            return Err(BuildError::Failed {
                program: "git show".to_string(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout_text())
    }

    async fn archive(&self, commit: &str) -> Result<Vec<u8>, BuildError> {
        let output = self.git(&["archive", "--format=tar", commit]).await?;
        if !output.success() {
            return Err(BuildError::Failed {
                program: "git archive".to_string(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ArtifactBuilder for DockerBuilder {
    async fn build(&self, revision: &Revision, image: &ImageRef) -> Result<Artifact, BuildError> {
        let commit = self.resolve_commit(revision).await?;
        let epoch = self.commit_epoch(&commit).await?;
        let context = self.archive(&commit).await?;
        tracing::info!(
            revision = %revision,
            commit = %commit,
            context_digest = %Digest::of(&context),
            "building {}",
            image
        );

        let tag = image.to_string();
        let revision_label = format!("org.opencontainers.image.revision={}", commit);
        let epoch_arg = format!("SOURCE_DATE_EPOCH={}", epoch);
        let dockerfile = self
            .dockerfile
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let mut args = vec![
            "build",
            "--tag",
            tag.as_str(),
            "--label",
            revision_label.as_str(),
            "--build-arg",
            epoch_arg.as_str(),
        ];
        if let Some(ref dockerfile) = dockerfile {
            args.extend(["--file", dockerfile.as_str()]);
        }
        args.push("-");

        self.docker(&args, &[("SOURCE_DATE_EPOCH", epoch.as_str())], Some(context))
            .await?;

        let inspect = self
            .docker(&["image", "inspect", "--format", "{{.Id}}", tag.as_str()], &[], None)
            .await?;
        let content_digest = Digest::parse(&inspect.stdout_text())
            .map_err(|e| BuildError::Digest(e.to_string()))?;

        tracing::info!(digest = %content_digest, "built {}", image);

        Ok(Artifact {
            source_revision: revision.clone(),
            content_digest,
            image: image.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_revision_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let init = process::run(
            "git",
            &["init", "--quiet", dir.path().to_str().unwrap()],
            &[],
            None,
        )
        .await;
        if !matches!(init, Ok(ref out) if out.success()) {
            // git not installed in this environment
            return;
        }

        let builder = DockerBuilder::new(dir.path());
        let revision = Revision::new("does-not-exist").unwrap();
        let image = ImageRef::parse("localhost/todo-app:v1").unwrap();
        let err = builder.build(&revision, &image).await.unwrap_err();
        assert!(matches!(err, BuildError::RevisionNotFound { .. }));
    }
}
