//! Tool execution layer: the fixed catalog of operations the agent calls.
//!
//! Tools are bound to one project through a [`ProjectScope`] and share the
//! process-wide [`ToolServices`]. [`ToolExecutor`] dispatches calls by name
//! and wraps each one in a [`ToolCallRecord`] carrying the stream events the
//! call emitted.

pub mod command;
pub mod files;
pub mod lifecycle;
pub mod project;
pub mod scaffold;
pub mod search;
pub mod traits;

pub use command::{InstallPackagesTool, RunCommandTool};
pub use files::{DeleteFileTool, GenerateFilesTool, ListFilesTool, ReadFileTool, SyncFilesToDbTool};
pub use lifecycle::{SandboxCreateTool, SandboxPauseTool};
pub use project::{GetProjectStructureTool, ValidateProjectTool};
pub use scaffold::InitProjectTool;
pub use search::SearchFilesTool;
pub use traits::{Tool, ToolResult, ToolSpec};

use crate::config::Config;
use crate::sandbox::{self, SandboxClient, SandboxError, SandboxHandle, SandboxManager, SandboxRegistry};
use crate::store::{Project, ProjectStore, SqliteProjectStore};
use crate::stream::{ProgressEmitter, RecordingEmitter, StreamEvent};
use crate::sync::{SyncEngine, SyncError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Bumped whenever a tool is added, removed or changes its input schema.
pub const TOOL_CATALOG_VERSION: u32 = 3;

pub const TOOL_SANDBOX_CREATE: &str = "sandbox_create";
pub const TOOL_SANDBOX_PAUSE: &str = "sandbox_pause";
pub const TOOL_LIST_FILES: &str = "list_files";
pub const TOOL_READ_FILE: &str = "read_file";
pub const TOOL_GENERATE_FILES: &str = "generate_files";
pub const TOOL_DELETE_FILE: &str = "delete_file";
pub const TOOL_RUN_COMMAND: &str = "run_command";
pub const TOOL_INSTALL_PACKAGES: &str = "install_packages";
pub const TOOL_SEARCH_FILES: &str = "search_files";
pub const TOOL_GET_PROJECT_STRUCTURE: &str = "get_project_structure";
pub const TOOL_VALIDATE_PROJECT: &str = "validate_project";
pub const TOOL_SYNC_FILES_TO_DB: &str = "sync_files_to_db";
pub const TOOL_INIT_PROJECT: &str = "init_project";

/// Process-wide collaborators shared by every project's tools.
pub struct ToolServices {
    pub config: Config,
    pub store: Arc<dyn ProjectStore>,
    pub client: Arc<dyn SandboxClient>,
    pub sync: Arc<SyncEngine>,
    pub sandboxes: Arc<SandboxManager>,
}

impl ToolServices {
    pub fn new(config: Config, client: Arc<dyn SandboxClient>, store: Arc<dyn ProjectStore>) -> Self {
        let sync = Arc::new(SyncEngine::new(client.clone(), store.clone(), &config));
        let sandboxes = Arc::new(SandboxManager::new(
            client.clone(),
            store.clone(),
            sync.clone(),
            Arc::new(SandboxRegistry::new()),
            config.sandbox.clone(),
        ));
        Self {
            config,
            store,
            client,
            sync,
            sandboxes,
        }
    }

    /// Open the SQLite store and the configured sandbox provider.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteProjectStore::open(&config.db_path())?);
        let client = sandbox::create_client(&config)?;
        Ok(Self::new(config, client, store))
    }
}

/// Everything a tool needs to act on one project.
pub struct ProjectScope {
    pub project_id: String,
    pub services: Arc<ToolServices>,
    pub emitter: Arc<RecordingEmitter>,
}

impl ProjectScope {
    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub fn workdir(&self) -> &str {
        &self.services.config.sandbox.workdir
    }

    /// Load the project, or a not-found failure for the agent.
    pub async fn project(&self) -> anyhow::Result<Result<Project, ToolResult>> {
        Ok(self
            .services
            .store
            .get_project(&self.project_id)
            .await?
            .ok_or_else(|| ToolResult::failure(format!("Project not found: {}", self.project_id))))
    }

    /// The project's running sandbox. Never provisions.
    pub async fn sandbox(&self) -> Result<SandboxHandle, ToolResult> {
        self.services
            .sandboxes
            .acquire(&self.project_id)
            .await
            .map_err(sandbox_failure)
    }
}

pub fn sandbox_failure(error: SandboxError) -> ToolResult {
    match error {
        SandboxError::NoSandbox => ToolResult::failure(error.to_string()),
        other => ToolResult::failure(format!("Sandbox error: {other}")),
    }
}

/// A sandbox that is running but missing saved files it should hold.
pub fn restore_incomplete(handle: &SandboxHandle) -> ToolResult {
    ToolResult::failure(format!(
        "Sandbox {} is running but {} saved file(s) could not be restored into it: {}. \
         Call sandbox_create again to retry the restore.",
        handle.sandbox_id,
        handle.restore_failed.len(),
        handle.restore_failed.join(", ")
    ))
    .with_data(serde_json::json!({
        "sandboxId": handle.sandbox_id,
        "restoreFailed": handle.restore_failed,
    }))
}

/// Expected sync failures become tool failures; store failures propagate.
pub fn sync_failure(error: SyncError) -> anyhow::Result<ToolResult> {
    match error {
        SyncError::ProjectNotFound(id) => Ok(ToolResult::failure(format!("Project not found: {id}"))),
        SyncError::Sandbox(e) => Ok(sandbox_failure(e)),
        SyncError::Store(e) => Err(e),
    }
}

/// Deserialize tool arguments, or a validation failure for the agent.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolResult> {
    let args = if args.is_null() { Value::Object(Default::default()) } else { args };
    serde_json::from_value(args).map_err(|e| ToolResult::failure(format!("Invalid arguments for {tool}: {e}")))
}

/// Every tool in the catalog, bound to one project.
pub fn project_tools(scope: Arc<ProjectScope>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(SandboxCreateTool::new(scope.clone())),
        Box::new(SandboxPauseTool::new(scope.clone())),
        Box::new(ListFilesTool::new(scope.clone())),
        Box::new(ReadFileTool::new(scope.clone())),
        Box::new(GenerateFilesTool::new(scope.clone())),
        Box::new(DeleteFileTool::new(scope.clone())),
        Box::new(RunCommandTool::new(scope.clone())),
        Box::new(InstallPackagesTool::new(scope.clone())),
        Box::new(SearchFilesTool::new(scope.clone())),
        Box::new(GetProjectStructureTool::new(scope.clone())),
        Box::new(ValidateProjectTool::new(scope.clone())),
        Box::new(SyncFilesToDbTool::new(scope.clone())),
        Box::new(InitProjectTool::new(scope)),
    ]
}

/// One tool invocation, returned to the agent loop. Not persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: Value,
    pub result: ToolResult,
    pub side_effects: Vec<StreamEvent>,
    pub duration_ms: u64,
}

/// Dispatches tool calls for one project, one at a time.
pub struct ToolExecutor {
    scope: Arc<ProjectScope>,
    tools: Vec<Box<dyn Tool>>,
    call_lock: tokio::sync::Mutex<()>,
}

impl ToolExecutor {
    pub fn new(
        services: Arc<ToolServices>,
        project_id: impl Into<String>,
        observer: Option<Arc<dyn ProgressEmitter>>,
    ) -> Self {
        let scope = Arc::new(ProjectScope {
            project_id: project_id.into(),
            services,
            emitter: Arc::new(RecordingEmitter::new(observer)),
        });
        Self {
            tools: project_tools(scope.clone()),
            scope,
            call_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.scope.project_id
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    /// Run one tool. Unknown names and bad arguments yield failed results;
    /// only store failures are returned as `Err`.
    pub async fn call(&self, name: &str, args: Value) -> anyhow::Result<ToolCallRecord> {
        let _guard = self.call_lock.lock().await;
        // Keeps the idle monitor off this project's sandbox until the call ends.
        let _in_use = self
            .scope
            .services
            .sandboxes
            .registry()
            .begin_use(&self.scope.project_id);
        // Drop anything left over from a call that errored out.
        self.scope.emitter.take();

        let started = Instant::now();
        let result = match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => {
                tracing::debug!("Calling tool {name} for project {}", self.scope.project_id);
                tool.execute(args.clone()).await?
            }
            None => ToolResult::failure(format!("Unknown tool: {name}")),
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !result.success {
            tracing::info!(
                "Tool {name} failed for project {}: {}",
                self.scope.project_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(ToolCallRecord {
            tool_name: name.to_string(),
            input: args,
            result,
            side_effects: self.scope.emitter.take(),
            duration_ms,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::sandbox::local::LocalSandboxClient;
    use tempfile::TempDir;

    pub struct Harness {
        pub _tmp: TempDir,
        pub services: Arc<ToolServices>,
        pub executor: ToolExecutor,
    }

    /// Local provider + in-memory store with project `p1`, no sandbox yet.
    pub async fn harness() -> Harness {
        harness_with(|_| {}).await
    }

    pub async fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.stream.chunk_delay_ms = 0;
        configure(&mut config);
        let client = Arc::new(LocalSandboxClient::new(tmp.path()).unwrap());
        let store = Arc::new(SqliteProjectStore::in_memory().unwrap());
        store.create_project("p1", "Demo App").await.unwrap();
        let services = Arc::new(ToolServices::new(config, client, store));
        let executor = ToolExecutor::new(services.clone(), "p1", None);
        Harness {
            _tmp: tmp,
            services,
            executor,
        }
    }

    impl Harness {
        pub async fn call(&self, name: &str, args: Value) -> ToolCallRecord {
            self.executor.call(name, args).await.unwrap()
        }

        /// Provision the project's sandbox.
        pub async fn with_sandbox(self) -> Self {
            let record = self.call(TOOL_SANDBOX_CREATE, serde_json::json!({})).await;
            assert!(record.result.success, "{:?}", record.result);
            self
        }
    }
}
