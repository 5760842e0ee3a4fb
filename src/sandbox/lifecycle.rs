//! Sandbox lifecycle: provision, resume, pause, reset, idle pausing.
//!
//! Every transition for a project runs under that project's async mutex, so
//! concurrent callers for the same project see at most one provisioning and
//! share its result. Locks for different projects are independent.

use super::registry::{SandboxHandle, SandboxRegistry};
use super::{SandboxClient, SandboxError, SandboxResult};
use crate::config::SandboxConfig;
use crate::store::{FileMap, Project, ProjectStore};
use crate::sync::SyncEngine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct SandboxManager {
    client: Arc<dyn SandboxClient>,
    store: Arc<dyn ProjectStore>,
    sync: Arc<SyncEngine>,
    registry: Arc<SandboxRegistry>,
    config: SandboxConfig,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl SandboxManager {
    pub fn new(
        client: Arc<dyn SandboxClient>,
        store: Arc<dyn ProjectStore>,
        sync: Arc<SyncEngine>,
        registry: Arc<SandboxRegistry>,
        config: SandboxConfig,
    ) -> Self {
        Self {
            client,
            store,
            sync,
            registry,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn SandboxClient> {
        &self.client
    }

    fn project_lock(&self, project_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value()
            .clone()
    }

    /// Return a running sandbox for the project, provisioning one if needed.
    ///
    /// A fresh sandbox for a project with a non-empty file map is populated
    /// from the durable map before it is handed out. Files that failed to
    /// restore are listed in [`SandboxHandle::restore_failed`] and retried on
    /// the next call.
    pub async fn get_or_create(&self, project_id: &str) -> SandboxResult<SandboxHandle> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        match self.resume_known(project_id).await {
            Ok(handle) if !handle.restore_failed.is_empty() => {
                return self.retry_restore(project_id, handle).await;
            }
            Ok(handle) => return Ok(handle),
            Err(SandboxError::NoSandbox) | Err(SandboxError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.provision(project_id).await
    }

    /// Return the project's sandbox, resuming it if paused. Never provisions.
    pub async fn acquire(&self, project_id: &str) -> SandboxResult<SandboxHandle> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        match self.resume_known(project_id).await {
            Err(SandboxError::NotFound(sandbox_id)) => {
                tracing::warn!("Sandbox {sandbox_id} for project {project_id} no longer exists");
                Err(SandboxError::NoSandbox)
            }
            other => other,
        }
    }

    /// Kill the current sandbox (if any) and provision a fresh one.
    pub async fn reset(&self, project_id: &str) -> SandboxResult<SandboxHandle> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        if let Some(sandbox_id) = self.known_sandbox_id(project_id).await? {
            if let Err(e) = self.client.kill_sandbox(&sandbox_id).await {
                tracing::warn!("Failed to kill sandbox {sandbox_id} during reset: {e}");
            }
        }
        self.registry.remove(project_id);
        self.provision(project_id).await
    }

    /// Pause a sandbox by ID. Returns whether it is paused afterwards;
    /// pausing an already-paused sandbox succeeds.
    pub async fn pause(&self, sandbox_id: &str) -> bool {
        let project_id = self.registry.project_for_sandbox(sandbox_id);
        let lock = project_id.as_deref().map(|p| self.project_lock(p));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        self.pause_locked(project_id.as_deref(), sandbox_id).await
    }

    /// Must be called with the project lock held, if the sandbox has a project.
    async fn pause_locked(&self, project_id: Option<&str>, sandbox_id: &str) -> bool {
        if let Some(project_id) = project_id {
            if self.registry.get(project_id).is_some_and(|h| h.is_paused) {
                return true;
            }
        }

        match self.client.pause_sandbox(sandbox_id).await {
            Ok(()) => {
                if let Some(project_id) = project_id {
                    self.registry.set_paused(project_id, true);
                }
                tracing::info!("Paused sandbox {sandbox_id}");
                true
            }
            Err(e) => {
                tracing::warn!("Failed to pause sandbox {sandbox_id}: {e}");
                false
            }
        }
    }

    /// Pause every running sandbox idle for longer than the configured window
    /// at `now`. Sandboxes with a tool call in flight are skipped. Returns how
    /// many were paused.
    pub async fn pause_idle_at(&self, now: DateTime<Utc>) -> usize {
        let idle_secs = i64::try_from(self.config.idle_pause_secs).unwrap_or(i64::MAX);
        let mut paused = 0;
        for candidate in self.registry.idle_since(now, idle_secs) {
            let lock = self.project_lock(&candidate.project_id);
            let _guard = lock.lock().await;

            // A call may have started or finished since the scan.
            let still_idle = self.registry.get(&candidate.project_id).is_some_and(|h| {
                h.sandbox_id == candidate.sandbox_id && self.registry.is_idle(&h, now, idle_secs)
            });
            if !still_idle {
                continue;
            }
            tracing::debug!(
                "Sandbox {} for project {} idle since {}",
                candidate.sandbox_id,
                candidate.project_id,
                candidate.last_used_at
            );
            if self
                .pause_locked(Some(&candidate.project_id), &candidate.sandbox_id)
                .await
            {
                paused += 1;
            }
        }
        paused
    }

    /// Run the idle policy periodically until `cancel` fires.
    pub fn spawn_idle_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.idle_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let paused = manager.pause_idle_at(Utc::now()).await;
                        if paused > 0 {
                            tracing::info!("Idle monitor paused {paused} sandbox(es)");
                        }
                    }
                }
            }
            tracing::debug!("Idle monitor stopped");
        })
    }

    /// A handle unused for longer than the provider lifetime may have been
    /// reclaimed; it is confirmed with a resume before reuse.
    fn outlived(&self, handle: &SandboxHandle) -> bool {
        let lifetime = i64::try_from(self.config.lifetime_ms).unwrap_or(i64::MAX);
        (Utc::now() - handle.last_used_at).num_milliseconds() >= lifetime
    }

    async fn load_project(&self, project_id: &str) -> SandboxResult<Project> {
        self.store
            .get_project(project_id)
            .await
            .map_err(|e| SandboxError::Other(format!("Failed to load project: {e}")))?
            .ok_or_else(|| SandboxError::Other(format!("Project not found: {project_id}")))
    }

    /// Write `files` into the project's sandbox and record what is still
    /// missing on the handle. Must be called with the project lock held.
    async fn restore_into(
        &self,
        project_id: &str,
        mut handle: SandboxHandle,
        files: &FileMap,
    ) -> SandboxHandle {
        let (_, failed) = self.sync.restore(&handle.sandbox_id, files).await;
        for failure in &failed {
            tracing::warn!(
                "Restore of {} into sandbox {} failed: {}",
                failure.path,
                handle.sandbox_id,
                failure.error
            );
        }
        let missing: Vec<String> = failed.into_iter().map(|f| f.path).collect();
        self.registry.set_restore_failed(project_id, missing.clone());
        handle.restore_failed = missing;
        handle
    }

    /// Must be called with the project lock held.
    async fn retry_restore(
        &self,
        project_id: &str,
        handle: SandboxHandle,
    ) -> SandboxResult<SandboxHandle> {
        let project = self.load_project(project_id).await?;
        // Paths deleted from the map since the failure no longer need restoring.
        let pending: FileMap = handle
            .restore_failed
            .iter()
            .filter_map(|path| project.files.get(path).map(|c| (path.clone(), c.clone())))
            .collect();
        tracing::info!(
            "Retrying restore of {} file(s) into sandbox {}",
            pending.len(),
            handle.sandbox_id
        );
        Ok(self.restore_into(project_id, handle, &pending).await)
    }

    /// Sandbox ID from the registry, falling back to the persisted record.
    async fn known_sandbox_id(&self, project_id: &str) -> SandboxResult<Option<String>> {
        if let Some(handle) = self.registry.get(project_id) {
            return Ok(Some(handle.sandbox_id));
        }
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(|e| SandboxError::Other(format!("Failed to load project: {e}")))?;
        Ok(project.and_then(|p| p.sandbox_id))
    }

    /// Must be called with the project lock held.
    async fn resume_known(&self, project_id: &str) -> SandboxResult<SandboxHandle> {
        if let Some(handle) = self.registry.get(project_id) {
            if !handle.is_paused && !self.outlived(&handle) {
                return self.registry.touch(project_id).ok_or(SandboxError::NoSandbox);
            }
        }

        let Some(sandbox_id) = self.known_sandbox_id(project_id).await? else {
            return Err(SandboxError::NoSandbox);
        };

        match self
            .client
            .resume_sandbox(&sandbox_id, self.config.lifetime_ms)
            .await
        {
            Ok(()) => {
                tracing::info!("Resumed sandbox {sandbox_id} for project {project_id}");
                Ok(self.registry.insert_running(project_id, &sandbox_id))
            }
            Err(SandboxError::NotFound(id)) => {
                self.registry.remove(project_id);
                if let Err(e) = self.store.set_sandbox_id(project_id, None).await {
                    tracing::warn!("Failed to clear sandbox id for project {project_id}: {e}");
                }
                Err(SandboxError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Must be called with the project lock held.
    async fn provision(&self, project_id: &str) -> SandboxResult<SandboxHandle> {
        let project = self.load_project(project_id).await?;

        let sandbox_id = self
            .client
            .create_sandbox(&self.config.template, self.config.lifetime_ms)
            .await?;
        tracing::info!("Provisioned sandbox {sandbox_id} for project {project_id}");

        if let Err(e) = self.store.set_sandbox_id(project_id, Some(&sandbox_id)).await {
            tracing::warn!("Failed to persist sandbox id for project {project_id}: {e}");
        }

        let handle = self.registry.insert_running(project_id, &sandbox_id);
        if project.files.is_empty() {
            return Ok(handle);
        }
        Ok(self.restore_into(project_id, handle, &project.files).await)
    }
}
