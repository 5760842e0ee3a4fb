//! Sandbox abstraction layer.
//!
//! Defines the [`SandboxClient`] trait and [`CommandOutput`] type that all
//! sandbox providers must implement. Currently two providers exist:
//!
//! - [`e2b::E2bSandboxClient`]: E2B cloud MicroVM (requires `E2B_API_KEY`)
//! - [`local::LocalSandboxClient`]: one directory per sandbox on the local disk
//!
//! Providers are stateless with respect to projects: every call names the
//! sandbox it targets. Which sandbox belongs to which project is tracked by
//! [`registry::SandboxRegistry`] and driven by [`lifecycle::SandboxManager`].

pub mod e2b;
pub mod exec;
pub mod lifecycle;
pub mod local;
pub mod registry;

use crate::config::{Config, SandboxProvider};
use async_trait::async_trait;
use std::sync::Arc;

pub use exec::{run_with_timeout, CommandOutcome};
pub use lifecycle::SandboxManager;
pub use registry::{SandboxHandle, SandboxRegistry};

/// Output from a command executed inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Failure modes of a sandbox provider call.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("No active sandbox. Call sandbox_create first.")]
    NoSandbox,
    #[error("Sandbox not found: {0}")]
    NotFound(String),
    #[error("Sandbox {0} is paused")]
    Paused(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Invalid sandbox path: {0}")]
    InvalidPath(String),
    #[error("Command timed out after {0}ms")]
    Timeout(u64),
    #[error("Sandbox API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Sandbox request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

/// Provider-agnostic sandbox interface.
///
/// Paths passed to file operations are absolute sandbox paths
/// (e.g. `/home/user/project/app/page.tsx`).
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Provision a new sandbox. Returns the sandbox ID.
    async fn create_sandbox(&self, template: &str, timeout_ms: u64) -> SandboxResult<String>;

    /// Pause a running sandbox. Pausing an already-paused sandbox succeeds.
    async fn pause_sandbox(&self, sandbox_id: &str) -> SandboxResult<()>;

    /// Resume a paused sandbox. Resuming a running sandbox succeeds.
    async fn resume_sandbox(&self, sandbox_id: &str, timeout_ms: u64) -> SandboxResult<()>;

    /// Terminate a sandbox and discard its filesystem.
    async fn kill_sandbox(&self, sandbox_id: &str) -> SandboxResult<()>;

    /// Run a shell command inside the sandbox.
    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> SandboxResult<CommandOutput>;

    /// Write content to a file path, creating parent directories.
    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> SandboxResult<()>;

    /// Read a file and return its content as a string.
    async fn read_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<String>;

    /// Remove a file.
    async fn remove_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<()>;

    /// Recursively list every regular file under `root`. Directories whose
    /// name appears in `prune` are not descended into.
    async fn list_files(
        &self,
        sandbox_id: &str,
        root: &str,
        prune: &[String],
    ) -> SandboxResult<Vec<String>>;
}

/// Build the provider selected in config.
pub fn create_client(config: &Config) -> anyhow::Result<Arc<dyn SandboxClient>> {
    match config.sandbox.provider {
        SandboxProvider::E2b => {
            let key = config.sandbox.e2b_api_key.clone().unwrap_or_default();
            let client =
                e2b::E2bSandboxClient::new(key).with_base_url(&config.sandbox.e2b_base_url);
            tracing::info!("Using E2B sandbox provider ({})", config.sandbox.e2b_base_url);
            Ok(Arc::new(client))
        }
        SandboxProvider::Local => {
            let root = config.local_root();
            let client = local::LocalSandboxClient::new(&root)?;
            tracing::info!("Using local sandbox provider at {}", root.display());
            Ok(Arc::new(client))
        }
    }
}
