//! Command execution with a caller-side deadline.
//!
//! The deadline is enforced here regardless of what the provider does with
//! its own timeout hint: past `timeout_ms` the call is abandoned and reported
//! with exit code `-1`. Nothing is signalled into the sandbox process.

use super::{SandboxClient, SandboxError};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Exit code reported for commands that timed out or never ran.
pub const FAILED_EXIT_CODE: i64 = -1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Provider failure that prevented the command from producing output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.error.is_none()
    }
}

pub async fn run_with_timeout(
    client: &dyn SandboxClient,
    sandbox_id: &str,
    command: &str,
    workdir: &str,
    timeout_ms: u64,
) -> CommandOutcome {
    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        client.run_command(sandbox_id, command, workdir, timeout_ms),
    )
    .await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let failed = |timed_out: bool, error: String| CommandOutcome {
        exit_code: FAILED_EXIT_CODE,
        stdout: String::new(),
        stderr: String::new(),
        timed_out,
        duration_ms,
        error: Some(error),
    };

    match result {
        Err(_) | Ok(Err(SandboxError::Timeout(_))) => {
            tracing::warn!("Command timed out after {timeout_ms}ms in sandbox {sandbox_id}: {command}");
            failed(true, format!("Command timed out after {timeout_ms}ms"))
        }
        Ok(Err(e)) => failed(false, e.to_string()),
        Ok(Ok(output)) => CommandOutcome {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
            duration_ms,
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::local::LocalSandboxClient;
    use tempfile::TempDir;

    #[tokio::test]
    async fn completed_command_keeps_exit_code() {
        let tmp = TempDir::new().unwrap();
        let client = LocalSandboxClient::new(tmp.path()).unwrap();
        let id = client.create_sandbox("t", 60_000).await.unwrap();

        let outcome = run_with_timeout(&client, &id, "echo out; exit 2", "/home/user/project", 5_000).await;
        assert_eq!(outcome.exit_code, 2);
        assert_eq!(outcome.stdout.trim(), "out");
        assert!(!outcome.timed_out);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn slow_command_is_abandoned_at_deadline() {
        let tmp = TempDir::new().unwrap();
        let client = LocalSandboxClient::new(tmp.path()).unwrap();
        let id = client.create_sandbox("t", 60_000).await.unwrap();

        let outcome = run_with_timeout(&client, &id, "sleep 5", "/home/user/project", 100).await;
        assert_eq!(outcome.exit_code, FAILED_EXIT_CODE);
        assert!(outcome.timed_out);
        assert!(outcome.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn missing_sandbox_is_reported_not_timed_out() {
        let tmp = TempDir::new().unwrap();
        let client = LocalSandboxClient::new(tmp.path()).unwrap();

        let outcome = run_with_timeout(&client, "nope", "true", "/home/user/project", 1_000).await;
        assert_eq!(outcome.exit_code, FAILED_EXIT_CODE);
        assert!(!outcome.timed_out);
        assert!(outcome.error.is_some());
    }
}
