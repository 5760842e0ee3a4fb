//! File synchronization between the durable file map and a sandbox.
//!
//! Reconciliation is explicit and one-directional per call:
//!
//! - [`SyncEngine::push`] writes files to the sandbox and, under
//!   [`WriteStrategy::DualWrite`], commits exactly the files whose sandbox
//!   write succeeded. The database is never written ahead of the sandbox.
//! - [`SyncEngine::pull`] reads the sandbox tree back and replaces the whole
//!   durable file map, bumping the project version.
//!
//! Both directions apply the same [`ExclusionPolicy`], so binary content never
//! reaches the file map. Sandbox I/O runs in bounded concurrent batches and a
//! failure on one file never affects the others.

pub mod paths;
pub mod policy;

use crate::config::{Config, WriteStrategy};
use crate::sandbox::{SandboxClient, SandboxError};
use crate::store::{FileEntry, FileMap, ProjectStore};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use policy::{ContentCheck, ExclusionPolicy};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    /// Created/updated are relative to the store of record for the strategy:
    /// the durable map under `DualWrite`, the sandbox under `SandboxOnly`.
    pub files_created: usize,
    pub files_updated: usize,
    /// Relative paths written to the sandbox.
    pub written: Vec<String>,
    pub failed: Vec<FileFailure>,
    /// Paths rejected by the exclusion policy or carrying binary content.
    pub skipped: Vec<String>,
    /// Whether the written files were committed to the durable map.
    pub committed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub files_synced: usize,
    /// Files found in the sandbox after path exclusion.
    pub total_files: usize,
    /// Files dropped as binary (by extension or content).
    pub skipped: usize,
    pub skipped_paths: Vec<String>,
    pub failed: Vec<FileFailure>,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub removed_from_sandbox: bool,
    pub removed_from_store: bool,
}

pub struct SyncEngine {
    client: Arc<dyn SandboxClient>,
    store: Arc<dyn ProjectStore>,
    policy: ExclusionPolicy,
    workdir: String,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(
        client: Arc<dyn SandboxClient>,
        store: Arc<dyn ProjectStore>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            store,
            policy: ExclusionPolicy::from_config(&config.sync),
            workdir: config.sandbox.workdir.clone(),
            batch_size: config.sync.batch_size.max(1),
        }
    }

    pub fn policy(&self) -> &ExclusionPolicy {
        &self.policy
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Write `files` (relative paths, complete contents) to the sandbox.
    ///
    /// Duplicate paths collapse to the last entry. Under `DualWrite` the
    /// successfully written files are committed to the durable map after
    /// every sandbox write has settled.
    pub async fn push(
        &self,
        project_id: &str,
        sandbox_id: &str,
        files: &[FileEntry],
        strategy: WriteStrategy,
    ) -> Result<PushReport, SyncError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| SyncError::ProjectNotFound(project_id.to_string()))?;

        let mut report = PushReport::default();
        let mut pending: BTreeMap<String, String> = BTreeMap::new();
        for file in files {
            let path = match paths::normalize(&self.workdir, &file.path) {
                Ok(p) => p,
                Err(e) => {
                    report.failed.push(FileFailure {
                        path: file.path.clone(),
                        error: e,
                    });
                    continue;
                }
            };
            if self.policy.is_excluded(&path) || self.policy.is_binary_path(&path) {
                tracing::debug!("Skipping excluded path on push: {path}");
                report.skipped.push(path);
                continue;
            }
            match self.policy.check_content(&file.content) {
                ContentCheck::Text(content) => {
                    pending.insert(path, content);
                }
                ContentCheck::Binary => {
                    tracing::debug!("Skipping binary content on push: {path}");
                    report.skipped.push(path);
                }
            }
        }

        let entries: Vec<FileEntry> = pending
            .into_iter()
            .map(|(path, content)| FileEntry { path, content })
            .collect();
        let existing: BTreeSet<String> = match strategy {
            WriteStrategy::DualWrite => entries
                .iter()
                .filter(|e| project.files.contains_key(&e.path))
                .map(|e| e.path.clone())
                .collect(),
            WriteStrategy::SandboxOnly => self.present_in_sandbox(sandbox_id, &entries).await,
        };
        let (written, failed) = self.write_batches(sandbox_id, &entries).await;
        report.failed.extend(failed);

        for entry in &written {
            if existing.contains(&entry.path) {
                report.files_updated += 1;
            } else {
                report.files_created += 1;
            }
        }
        report.written = written.iter().map(|e| e.path.clone()).collect();

        if strategy == WriteStrategy::DualWrite && !written.is_empty() {
            self.store.upsert_files(project_id, &written).await?;
            report.committed = true;
        }

        tracing::info!(
            "Pushed {} file(s) to sandbox {sandbox_id} for project {project_id} ({} failed, {} skipped, committed: {})",
            report.written.len(),
            report.failed.len(),
            report.skipped.len(),
            report.committed
        );
        Ok(report)
    }

    /// Write the durable map into a freshly provisioned sandbox. The database
    /// is not touched.
    pub async fn restore(&self, sandbox_id: &str, files: &FileMap) -> (usize, Vec<FileFailure>) {
        let entries: Vec<FileEntry> = files
            .iter()
            .filter(|(path, _)| !self.policy.is_excluded(path))
            .map(|(path, content)| FileEntry::new(path.clone(), content.clone()))
            .collect();
        let (written, failed) = self.write_batches(sandbox_id, &entries).await;
        tracing::info!(
            "Restored {} file(s) into sandbox {sandbox_id} ({} failed)",
            written.len(),
            failed.len()
        );
        (written.len(), failed)
    }

    /// Replace the durable map with the sandbox's current text files.
    pub async fn pull(&self, project_id: &str, sandbox_id: &str) -> Result<PullReport, SyncError> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(SyncError::ProjectNotFound(project_id.to_string()));
        }

        let listed = self
            .client
            .list_files(sandbox_id, &self.workdir, self.policy.pruned_dirs())
            .await?;

        let mut report = PullReport::default();
        let mut candidates = Vec::new();
        for absolute in listed {
            let Some(path) = paths::to_relative(&self.workdir, &absolute) else {
                continue;
            };
            if self.policy.is_excluded(&path) {
                continue;
            }
            report.total_files += 1;
            if self.policy.is_binary_path(&path) {
                report.skipped_paths.push(path);
                continue;
            }
            candidates.push(path);
        }

        let mut files = FileMap::new();
        for batch in candidates.chunks(self.batch_size) {
            let reads = batch.iter().map(|path| async move {
                let absolute = paths::to_sandbox(&self.workdir, path);
                (path, self.client.read_file(sandbox_id, &absolute).await)
            });
            for (path, result) in join_all(reads).await {
                match result {
                    // The sandbox itself went away or was paused mid-pull; a
                    // partial read set must not replace the map.
                    Err(e @ (SandboxError::NotFound(_) | SandboxError::Paused(_))) => {
                        return Err(e.into());
                    }
                    Ok(content) => match self.policy.check_content(&content) {
                        ContentCheck::Text(text) => {
                            files.insert(path.clone(), text);
                        }
                        ContentCheck::Binary => {
                            tracing::debug!("Skipping binary-in-disguise file on pull: {path}");
                            report.skipped_paths.push(path.clone());
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to read {path} from sandbox {sandbox_id}: {e}");
                        report.failed.push(FileFailure {
                            path: path.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report.files_synced = files.len();
        report.skipped = report.skipped_paths.len();
        report.version = self.store.replace_files(project_id, &files).await?;

        tracing::info!(
            "Synced {}/{} file(s) from sandbox {sandbox_id} into project {project_id} (skipped {}, failed {}, version {})",
            report.files_synced,
            report.total_files,
            report.skipped,
            report.failed.len(),
            report.version
        );
        Ok(report)
    }

    /// Delete one relative path from the sandbox and, under `DualWrite`, from
    /// the durable map. A file missing from the sandbox is not an error.
    pub async fn remove(
        &self,
        project_id: &str,
        sandbox_id: &str,
        path: &str,
        strategy: WriteStrategy,
    ) -> Result<RemoveOutcome, SyncError> {
        let absolute = paths::to_sandbox(&self.workdir, path);
        let removed_from_sandbox = match self.client.remove_file(sandbox_id, &absolute).await {
            Ok(()) => true,
            Err(SandboxError::FileNotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };

        let removed_from_store = if strategy == WriteStrategy::DualWrite {
            self.store.remove_file(project_id, path).await?
        } else {
            false
        };

        Ok(RemoveOutcome {
            removed_from_sandbox,
            removed_from_store,
        })
    }

    /// Paths among `entries` that already exist in the sandbox.
    async fn present_in_sandbox(&self, sandbox_id: &str, entries: &[FileEntry]) -> BTreeSet<String> {
        let mut present = BTreeSet::new();
        for batch in entries.chunks(self.batch_size) {
            let reads = batch.iter().map(|entry| async move {
                let absolute = paths::to_sandbox(&self.workdir, &entry.path);
                (entry, self.client.read_file(sandbox_id, &absolute).await.is_ok())
            });
            for (entry, exists) in join_all(reads).await {
                if exists {
                    present.insert(entry.path.clone());
                }
            }
        }
        present
    }

    async fn write_batches(
        &self,
        sandbox_id: &str,
        entries: &[FileEntry],
    ) -> (Vec<FileEntry>, Vec<FileFailure>) {
        let mut written = Vec::new();
        let mut failed = Vec::new();

        for batch in entries.chunks(self.batch_size) {
            let writes = batch.iter().map(|entry| async move {
                let absolute = paths::to_sandbox(&self.workdir, &entry.path);
                (
                    entry,
                    self.client
                        .write_file(sandbox_id, &absolute, &entry.content)
                        .await,
                )
            });
            for (entry, result) in join_all(writes).await {
                match result {
                    Ok(()) => written.push(entry.clone()),
                    Err(e) => {
                        tracing::warn!("Failed to write {} to sandbox {sandbox_id}: {e}", entry.path);
                        failed.push(FileFailure {
                            path: entry.path.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        (written, failed)
    }
}
