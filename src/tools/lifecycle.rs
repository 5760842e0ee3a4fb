//! `sandbox_create` and `sandbox_pause`: explicit sandbox lifecycle control.

use super::traits::{Tool, ToolResult};
use super::{
    parse_args, restore_incomplete, sandbox_failure, ProjectScope, TOOL_SANDBOX_CREATE,
    TOOL_SANDBOX_PAUSE,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateArgs {
    #[serde(default)]
    reset: bool,
}

pub struct SandboxCreateTool {
    scope: Arc<ProjectScope>,
}

impl SandboxCreateTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for SandboxCreateTool {
    fn name(&self) -> &str {
        TOOL_SANDBOX_CREATE
    }

    fn description(&self) -> &str {
        "Get a running sandbox for this project. Resumes a paused sandbox, or provisions a new one \
         and restores the saved project files into it. Call this before generating files or \
         running commands. If some saved files could not be restored the call fails and lists \
         them; call it again to retry. Pass reset: true to discard the current sandbox and start fresh."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "reset": {
                    "type": "boolean",
                    "description": "Kill the current sandbox and provision a new one. Default: false."
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: CreateArgs = match parse_args(TOOL_SANDBOX_CREATE, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        if let Err(failure) = self.scope.project().await? {
            return Ok(failure);
        }

        let manager = &self.scope.services.sandboxes;
        let result = if args.reset {
            manager.reset(&self.scope.project_id).await
        } else {
            manager.get_or_create(&self.scope.project_id).await
        };

        match result {
            Ok(handle) if !handle.restore_failed.is_empty() => Ok(restore_incomplete(&handle)),
            Ok(handle) => Ok(ToolResult::success(
                format!("Sandbox ready: {}", handle.sandbox_id),
                json!({
                    "sandboxId": handle.sandbox_id,
                    "isPaused": handle.is_paused,
                    "reset": args.reset,
                }),
            )),
            Err(e) => Ok(ToolResult::failure(format!("Failed to provision sandbox: {e}"))),
        }
    }
}

pub struct SandboxPauseTool {
    scope: Arc<ProjectScope>,
}

impl SandboxPauseTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for SandboxPauseTool {
    fn name(&self) -> &str {
        TOOL_SANDBOX_PAUSE
    }

    fn description(&self) -> &str {
        "Pause this project's sandbox. Files are kept; the sandbox resumes automatically on next use."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let manager = &self.scope.services.sandboxes;
        let Some(handle) = manager.registry().get(&self.scope.project_id) else {
            return Ok(sandbox_failure(crate::sandbox::SandboxError::NoSandbox));
        };

        if manager.pause(&handle.sandbox_id).await {
            Ok(ToolResult::success(
                format!("Sandbox paused: {}", handle.sandbox_id),
                json!({ "sandboxId": handle.sandbox_id, "paused": true }),
            ))
        } else {
            Ok(ToolResult::failure(format!("Failed to pause sandbox {}", handle.sandbox_id))
                .with_data(json!({ "sandboxId": handle.sandbox_id, "paused": false })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::harness;
    use super::super::{TOOL_RUN_COMMAND, TOOL_SANDBOX_CREATE, TOOL_SANDBOX_PAUSE};
    use serde_json::json;

    #[tokio::test]
    async fn create_is_idempotent() {
        let h = harness().await;
        let first = h.call(TOOL_SANDBOX_CREATE, json!({})).await;
        let second = h.call(TOOL_SANDBOX_CREATE, json!({})).await;
        assert!(first.result.success);
        assert_eq!(first.result.data["sandboxId"], second.result.data["sandboxId"]);
    }

    #[tokio::test]
    async fn reset_yields_new_sandbox() {
        let h = harness().await.with_sandbox().await;
        let before = h.services.sandboxes.registry().get("p1").unwrap().sandbox_id;
        let record = h.call(TOOL_SANDBOX_CREATE, json!({"reset": true})).await;
        assert!(record.result.success);
        assert_ne!(record.result.data["sandboxId"], json!(before));
    }

    #[tokio::test]
    async fn pause_then_command_resumes() {
        let h = harness().await.with_sandbox().await;
        let paused = h.call(TOOL_SANDBOX_PAUSE, json!({})).await;
        assert!(paused.result.success);
        let again = h.call(TOOL_SANDBOX_PAUSE, json!({})).await;
        assert!(again.result.success);

        let record = h.call(TOOL_RUN_COMMAND, json!({"command": "echo hi"})).await;
        assert!(record.result.success, "{:?}", record.result);
        assert!(!h.services.sandboxes.registry().get("p1").unwrap().is_paused);
    }

    #[tokio::test]
    async fn pause_without_sandbox_fails() {
        let h = harness().await;
        let record = h.call(TOOL_SANDBOX_PAUSE, json!({})).await;
        assert!(!record.result.success);
    }
}
