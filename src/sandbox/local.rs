//! Local sandbox provider: one directory per sandbox on the host disk.
//!
//! No external service is needed. Each sandbox lives at `<root>/<sandbox_id>/`
//! and absolute sandbox paths are mapped beneath it, so `/home/user/project`
//! becomes `<root>/<sandbox_id>/home/user/project`. Commands run through
//! `sh -c` with the mapped workdir as the current directory.
//!
//! Pausing only flips a flag: a paused sandbox rejects file and command
//! operations until it is resumed, and its directory is left untouched.

use super::{CommandOutput, SandboxClient, SandboxError, SandboxResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use walkdir::WalkDir;

pub struct LocalSandboxClient {
    root: PathBuf,
    /// sandbox_id -> paused
    states: DashMap<String, bool>,
}

impl LocalSandboxClient {
    pub fn new(root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)?;
        let states = DashMap::new();
        // Sandboxes left over from a previous process are resumable.
        for entry in std::fs::read_dir(root)?.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    states.insert(name.to_string(), true);
                }
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            states,
        })
    }

    fn sandbox_dir(&self, sandbox_id: &str) -> PathBuf {
        self.root.join(sandbox_id)
    }

    fn ensure_running(&self, sandbox_id: &str) -> SandboxResult<()> {
        match self.states.get(sandbox_id).map(|s| *s) {
            None => Err(SandboxError::NotFound(sandbox_id.to_string())),
            Some(true) => Err(SandboxError::Paused(sandbox_id.to_string())),
            Some(false) => Ok(()),
        }
    }

    /// Map an absolute sandbox path onto the host, rejecting traversal.
    fn host_path(&self, sandbox_id: &str, path: &str) -> SandboxResult<PathBuf> {
        let mut host = self.sandbox_dir(sandbox_id);
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => host.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidPath(path.to_string()))
                }
            }
        }
        Ok(host)
    }
}

#[async_trait]
impl SandboxClient for LocalSandboxClient {
    async fn create_sandbox(&self, _template: &str, _timeout_ms: u64) -> SandboxResult<String> {
        let sandbox_id = format!("local-{}", uuid::Uuid::new_v4().simple());
        tokio::fs::create_dir_all(self.sandbox_dir(&sandbox_id)).await?;
        self.states.insert(sandbox_id.clone(), false);
        Ok(sandbox_id)
    }

    async fn pause_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        match self.states.get_mut(sandbox_id) {
            Some(mut paused) => {
                *paused = true;
                Ok(())
            }
            None => Err(SandboxError::NotFound(sandbox_id.to_string())),
        }
    }

    async fn resume_sandbox(&self, sandbox_id: &str, _timeout_ms: u64) -> SandboxResult<()> {
        match self.states.get_mut(sandbox_id) {
            Some(mut paused) => {
                *paused = false;
                Ok(())
            }
            None => Err(SandboxError::NotFound(sandbox_id.to_string())),
        }
    }

    async fn kill_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        if self.states.remove(sandbox_id).is_some() {
            let dir = self.sandbox_dir(sandbox_id);
            if dir.exists() {
                tokio::fs::remove_dir_all(dir).await?;
            }
        }
        Ok(())
    }

    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> SandboxResult<CommandOutput> {
        self.ensure_running(sandbox_id)?;
        let cwd = self.host_path(sandbox_id, workdir)?;
        tokio::fs::create_dir_all(&cwd).await?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(Duration::from_millis(timeout_ms), child).await {
            Err(_elapsed) => Err(SandboxError::Timeout(timeout_ms)),
            Ok(Err(e)) => Err(SandboxError::Io(e)),
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            }),
        }
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> SandboxResult<()> {
        self.ensure_running(sandbox_id)?;
        let host = self.host_path(sandbox_id, path)?;
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(host, content).await?;
        Ok(())
    }

    async fn read_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<String> {
        self.ensure_running(sandbox_id)?;
        let host = self.host_path(sandbox_id, path)?;
        match tokio::fs::read(&host).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    async fn remove_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<()> {
        self.ensure_running(sandbox_id)?;
        let host = self.host_path(sandbox_id, path)?;
        match tokio::fs::remove_file(&host).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    async fn list_files(
        &self,
        sandbox_id: &str,
        root: &str,
        prune: &[String],
    ) -> SandboxResult<Vec<String>> {
        self.ensure_running(sandbox_id)?;
        let host_root = self.host_path(sandbox_id, root)?;
        if !host_root.exists() {
            return Ok(Vec::new());
        }

        let prune = prune.to_vec();
        let sandbox_base = self.sandbox_dir(sandbox_id);
        let walk = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let entries = WalkDir::new(&host_root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    !(e.file_type().is_dir()
                        && e.depth() > 0
                        && e.file_name()
                            .to_str()
                            .is_some_and(|name| prune.iter().any(|p| p == name)))
                });
            for entry in entries.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&sandbox_base) {
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    files.push(format!("/{rel}"));
                }
            }
            files.sort();
            files
        });

        walk.await
            .map_err(|e| SandboxError::Other(format!("File listing task failed: {e}")))
    }
}
