//! In-memory registry of live sandbox handles, keyed by project ID.
//!
//! The registry is constructed once and shared through an `Arc`; it carries
//! no lifecycle logic of its own. [`super::SandboxManager`] writes handles;
//! tool calls only mark a project in use through [`SandboxRegistry::begin_use`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxHandle {
    pub project_id: String,
    pub sandbox_id: String,
    pub is_paused: bool,
    pub last_used_at: DateTime<Utc>,
    /// Saved files that could not be written into this sandbox when it was
    /// provisioned. Until empty, the sandbox tree is not a full copy of the
    /// durable map.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restore_failed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SandboxRegistry {
    handles: DashMap<String, SandboxHandle>,
    /// Tool calls currently running per project.
    in_use: DashMap<String, usize>,
}

/// Marks a project busy until dropped; the drop counts as the last use.
#[must_use]
pub struct InUse<'a> {
    registry: &'a SandboxRegistry,
    project_id: String,
}

impl Drop for InUse<'_> {
    fn drop(&mut self) {
        if let Some(mut count) = self.registry.in_use.get_mut(&self.project_id) {
            *count = count.saturating_sub(1);
        }
        self.registry
            .in_use
            .remove_if(&self.project_id, |_, count| *count == 0);
        if let Some(mut h) = self.registry.handles.get_mut(&self.project_id) {
            h.last_used_at = Utc::now();
        }
    }
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project_id: &str) -> Option<SandboxHandle> {
        self.handles.get(project_id).map(|h| h.value().clone())
    }

    /// Register a running sandbox for a project, replacing any previous
    /// handle. Pending restore failures carry over when the sandbox is the same.
    pub fn insert_running(&self, project_id: &str, sandbox_id: &str) -> SandboxHandle {
        let restore_failed = self
            .handles
            .get(project_id)
            .filter(|h| h.sandbox_id == sandbox_id)
            .map(|h| h.restore_failed.clone())
            .unwrap_or_default();
        let handle = SandboxHandle {
            project_id: project_id.to_string(),
            sandbox_id: sandbox_id.to_string(),
            is_paused: false,
            last_used_at: Utc::now(),
            restore_failed,
        };
        self.handles.insert(project_id.to_string(), handle.clone());
        handle
    }

    pub fn remove(&self, project_id: &str) -> Option<SandboxHandle> {
        self.handles.remove(project_id).map(|(_, h)| h)
    }

    /// Mark the handle running and bump `last_used_at`.
    pub fn touch(&self, project_id: &str) -> Option<SandboxHandle> {
        self.handles.get_mut(project_id).map(|mut h| {
            h.is_paused = false;
            h.last_used_at = Utc::now();
            h.value().clone()
        })
    }

    pub fn set_paused(&self, project_id: &str, paused: bool) {
        if let Some(mut h) = self.handles.get_mut(project_id) {
            h.is_paused = paused;
        }
    }

    pub fn set_restore_failed(&self, project_id: &str, paths: Vec<String>) {
        if let Some(mut h) = self.handles.get_mut(project_id) {
            h.restore_failed = paths;
        }
    }

    /// Drop `paths` from the pending restore list once the sandbox holds
    /// them again (rewritten) or the map no longer does (deleted).
    pub fn mark_restored(&self, project_id: &str, paths: &[String]) {
        if let Some(mut h) = self.handles.get_mut(project_id) {
            h.restore_failed.retain(|p| !paths.contains(p));
        }
    }

    pub fn project_for_sandbox(&self, sandbox_id: &str) -> Option<String> {
        self.handles
            .iter()
            .find(|entry| entry.sandbox_id == sandbox_id)
            .map(|entry| entry.key().clone())
    }

    pub fn begin_use(&self, project_id: &str) -> InUse<'_> {
        *self.in_use.entry(project_id.to_string()).or_insert(0) += 1;
        InUse {
            registry: self,
            project_id: project_id.to_string(),
        }
    }

    pub fn is_in_use(&self, project_id: &str) -> bool {
        self.in_use.get(project_id).is_some_and(|count| *count > 0)
    }

    /// Running, not in use, and unused for at least `idle_secs` at `now`.
    pub fn is_idle(&self, handle: &SandboxHandle, now: DateTime<Utc>, idle_secs: i64) -> bool {
        !handle.is_paused
            && !self.is_in_use(&handle.project_id)
            && (now - handle.last_used_at).num_seconds() >= idle_secs
    }

    pub fn idle_since(&self, now: DateTime<Utc>, idle_secs: i64) -> Vec<SandboxHandle> {
        let snapshot: Vec<SandboxHandle> = self.handles.iter().map(|h| h.value().clone()).collect();
        snapshot
            .into_iter()
            .filter(|h| self.is_idle(h, now, idle_secs))
            .collect()
    }

    /// Test hook for simulating idleness.
    #[cfg(test)]
    pub(crate) fn set_last_used(&self, project_id: &str, at: DateTime<Utc>) {
        if let Some(mut h) = self.handles.get_mut(project_id) {
            h.last_used_at = at;
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
