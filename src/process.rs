// ABOUTME: Local process execution for the docker and git CLIs.
// ABOUTME: Captures stdout/stderr and feeds optional stdin without blocking on pipes.

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Output of a finished local command.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// Run `program` with `args`, writing `stdin` to it when given.
pub async fn run(
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
    stdin: Option<Vec<u8>>,
) -> std::io::Result<ProcessOutput> {
    tracing::debug!("running {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .envs(envs.iter().copied())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Feed stdin from a separate task so a chatty child cannot deadlock us.
    let writer = match (stdin, child.stdin.take()) {
        (Some(data), Some(mut pipe)) => Some(tokio::spawn(async move {
            let result = pipe.write_all(&data).await;
            drop(pipe);
            result
        })),
        _ => None,
    };

    let output = child.wait_with_output().await?;

    if let Some(writer) = writer {
        match writer.await {
            Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
            Err(e) => return Err(std::io::Error::other(e)),
            _ => {}
        }
    }

    Ok(ProcessOutput {
        exit_code: output.status.code(),
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
