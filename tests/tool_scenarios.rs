//! End-to-end tool scenarios against the local provider and an in-memory store.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use vibeforge::config::Config;
use vibeforge::sandbox::local::LocalSandboxClient;
use vibeforge::sandbox::{CommandOutput, SandboxClient, SandboxError, SandboxResult};
use vibeforge::store::{FileMap, ProjectStore, SqliteProjectStore};
use vibeforge::stream::{ChannelEmitter, ProgressEmitter, StreamEvent, StreamEventKind};
use vibeforge::{ToolCallRecord, ToolExecutor, ToolServices};

const WORKDIR: &str = "/home/user/project";

/// Local provider with injectable failures and a command log.
struct FlakyClient {
    inner: LocalSandboxClient,
    fail_writes: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
    fake_commands: bool,
    hang_commands: bool,
}

impl FlakyClient {
    fn new(root: &std::path::Path) -> Self {
        Self {
            inner: LocalSandboxClient::new(root).unwrap(),
            fail_writes: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            fake_commands: false,
            hang_commands: false,
        }
    }
}

#[async_trait]
impl SandboxClient for FlakyClient {
    async fn create_sandbox(&self, template: &str, timeout_ms: u64) -> SandboxResult<String> {
        self.inner.create_sandbox(template, timeout_ms).await
    }

    async fn pause_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        self.inner.pause_sandbox(sandbox_id).await
    }

    async fn resume_sandbox(&self, sandbox_id: &str, timeout_ms: u64) -> SandboxResult<()> {
        self.inner.resume_sandbox(sandbox_id, timeout_ms).await
    }

    async fn kill_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        self.inner.kill_sandbox(sandbox_id).await
    }

    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> SandboxResult<CommandOutput> {
        self.commands.lock().push(command.to_string());
        if self.hang_commands {
            std::future::pending::<()>().await;
        }
        if self.fake_commands {
            return Ok(CommandOutput {
                stdout: "added 2 packages".to_string(),
                stderr: String::new(),
                exit_code: 0,
            });
        }
        self.inner
            .run_command(sandbox_id, command, workdir, timeout_ms)
            .await
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> SandboxResult<()> {
        if self.fail_writes.lock().iter().any(|f| path.ends_with(f.as_str())) {
            return Err(SandboxError::Api {
                status: 500,
                body: "injected write failure".to_string(),
            });
        }
        self.inner.write_file(sandbox_id, path, content).await
    }

    async fn read_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<String> {
        self.inner.read_file(sandbox_id, path).await
    }

    async fn remove_file(&self, sandbox_id: &str, path: &str) -> SandboxResult<()> {
        self.inner.remove_file(sandbox_id, path).await
    }

    async fn list_files(
        &self,
        sandbox_id: &str,
        root: &str,
        prune: &[String],
    ) -> SandboxResult<Vec<String>> {
        self.inner.list_files(sandbox_id, root, prune).await
    }
}

struct Env {
    _tmp: TempDir,
    client: Arc<FlakyClient>,
    store: Arc<SqliteProjectStore>,
    executor: ToolExecutor,
}

async fn env_with(configure: impl FnOnce(&mut FlakyClient)) -> Env {
    env_observed(configure, None).await
}

async fn env_observed(
    configure: impl FnOnce(&mut FlakyClient),
    observer: Option<Arc<dyn ProgressEmitter>>,
) -> Env {
    let tmp = TempDir::new().unwrap();
    let mut client = FlakyClient::new(tmp.path());
    configure(&mut client);
    let client = Arc::new(client);

    let store = Arc::new(SqliteProjectStore::in_memory().unwrap());
    store.create_project("p1", "Scenario App").await.unwrap();

    let mut config = Config::default();
    config.stream.chunk_delay_ms = 0;
    let services = Arc::new(ToolServices::new(config, client.clone(), store.clone()));
    let executor = ToolExecutor::new(services, "p1", observer);
    Env {
        _tmp: tmp,
        client,
        store,
        executor,
    }
}

async fn env() -> Env {
    env_with(|_| {}).await
}

impl Env {
    async fn call(&self, tool: &str, args: Value) -> ToolCallRecord {
        self.executor.call(tool, args).await.unwrap()
    }

    async fn sandbox(&self) -> String {
        let record = self.call("sandbox_create", json!({})).await;
        assert!(record.result.success, "{:?}", record.result);
        record.result.data["sandboxId"].as_str().unwrap().to_string()
    }

    /// Fresh services over the same provider and store, as after a restart.
    fn restart(&self) -> ToolExecutor {
        let mut config = Config::default();
        config.stream.chunk_delay_ms = 0;
        let services = Arc::new(ToolServices::new(config, self.client.clone(), self.store.clone()));
        ToolExecutor::new(services, "p1", None)
    }

    async fn files(&self) -> FileMap {
        self.store.get_project("p1").await.unwrap().unwrap().files
    }

    async fn sandbox_read(&self, sandbox_id: &str, rel: &str) -> SandboxResult<String> {
        self.client
            .read_file(sandbox_id, &format!("{WORKDIR}/{rel}"))
            .await
    }

    async fn sandbox_write(&self, sandbox_id: &str, rel: &str, content: &str) {
        self.client
            .inner
            .write_file(sandbox_id, &format!("{WORKDIR}/{rel}"), content)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn scenario_a_generate_writes_both_stores() {
    let env = env().await;
    let sandbox_id = env.sandbox().await;

    let record = env
        .call("generate_files", json!({"files": [{"path": "a.ts", "content": "x"}]}))
        .await;
    assert!(record.result.success, "{:?}", record.result);
    assert_eq!(record.result.data["filesCreated"], 1);
    assert_eq!(record.result.data["filesUpdated"], 0);

    assert_eq!(env.sandbox_read(&sandbox_id, "a.ts").await.unwrap(), "x");
    assert_eq!(env.files().await.get("a.ts").map(String::as_str), Some("x"));
}

#[tokio::test]
async fn scenario_b_missing_file_suggests_paths() {
    let env = env().await;
    env.sandbox().await;
    env.call(
        "generate_files",
        json!({"files": [
            {"path": "app/page.tsx", "content": "p"},
            {"path": "app/layout.tsx", "content": "l"},
        ]}),
    )
    .await;

    let record = env.call("read_file", json!({"path": "missing.ts"})).await;
    assert!(!record.result.success);
    assert_eq!(record.result.error.as_deref(), Some("File not found: missing.ts"));
    let available = record.result.data["availableFiles"].as_array().unwrap();
    assert_eq!(available.len(), 2);

    let json = serde_json::to_value(&record.result).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "File not found: missing.ts");
    assert!(json["data"]["availableFiles"].is_array());
}

#[tokio::test]
async fn scenario_c_sync_skips_pngs() {
    let env = env().await;
    let sandbox_id = env.sandbox().await;
    for i in 0..10 {
        env.sandbox_write(&sandbox_id, &format!("src/file{i}.ts"), &format!("export const n = {i};"))
            .await;
    }
    env.sandbox_write(&sandbox_id, "public/logo.png", "PNG").await;
    env.sandbox_write(&sandbox_id, "public/hero.png", "PNG").await;

    let record = env.call("sync_files_to_db", json!({})).await;
    assert!(record.result.success, "{:?}", record.result);
    assert_eq!(record.result.data["filesSynced"], 10);
    assert_eq!(record.result.data["skipped"], 2);
    assert_eq!(env.files().await.len(), 10);

    let project = env.store.get_project("p1").await.unwrap().unwrap();
    assert_eq!(project.version, 1);
    assert_eq!(project.generation_status.as_str(), "ready");
}

#[tokio::test]
async fn p1_push_is_idempotent() {
    let env = env().await;
    let sandbox_id = env.sandbox().await;
    let args = json!({"files": [{"path": "lib/util.ts", "content": "export {}"}]});

    let first = env.call("generate_files", args.clone()).await;
    let map_once = env.files().await;
    let second = env.call("generate_files", args).await;
    let map_twice = env.files().await;

    assert_eq!(first.result.data["filesCreated"], 1);
    assert_eq!(second.result.data["filesUpdated"], 1);
    assert_eq!(map_once, map_twice);
    assert_eq!(env.sandbox_read(&sandbox_id, "lib/util.ts").await.unwrap(), "export {}");
}

#[tokio::test]
async fn p2_pull_matches_sandbox_modulo_exclusions() {
    let env = env().await;
    let sandbox_id = env.sandbox().await;
    env.sandbox_write(&sandbox_id, "app/page.tsx", "page").await;
    env.sandbox_write(&sandbox_id, "README.md", "# hi").await;
    env.sandbox_write(&sandbox_id, "node_modules/react/index.js", "x").await;
    env.sandbox_write(&sandbox_id, ".next/build-manifest.json", "{}").await;
    env.sandbox_write(&sandbox_id, ".git/HEAD", "ref").await;
    env.sandbox_write(&sandbox_id, "package-lock.json", "{}").await;
    env.sandbox_write(&sandbox_id, ".DS_Store", "meta").await;

    let record = env.call("sync_files_to_db", json!({})).await;
    assert!(record.result.success);

    let files = env.files().await;
    let paths: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(paths, vec!["README.md", "app/page.tsx"]);
    for (path, content) in &files {
        assert_eq!(&env.sandbox_read(&sandbox_id, path).await.unwrap(), content);
    }
}

#[tokio::test]
async fn p3_binary_never_enters_the_map() {
    let env = env().await;
    let sandbox_id = env.sandbox().await;

    let record = env
        .call(
            "generate_files",
            json!({"files": [
                {"path": "public/icon.ICO", "content": "bin"},
                {"path": "data.txt", "content": "\u{0}\u{0}\u{0}x"},
                {"path": "ok.ts", "content": "fine"},
            ]}),
        )
        .await;
    assert!(record.result.success);
    assert_eq!(record.result.data["skipped"].as_array().unwrap().len(), 2);

    env.sandbox_write(&sandbox_id, "font.woff2", "wOF2").await;
    env.sandbox_write(&sandbox_id, "mixed.txt", "a\u{0}bc").await;
    env.call("sync_files_to_db", json!({})).await;

    let files = env.files().await;
    assert!(files.values().all(|c| !c.contains('\0')));
    assert!(!files.contains_key("font.woff2"));
    assert!(!files.contains_key("public/icon.ICO"));
    assert_eq!(files.get("mixed.txt").map(String::as_str), Some("abc"));
}

#[tokio::test]
async fn p4_failed_write_is_isolated() {
    let env = env_with(|c| c.fail_writes.lock().push("b.ts".to_string())).await;
    let sandbox_id = env.sandbox().await;

    let record = env
        .call(
            "generate_files",
            json!({"files": [
                {"path": "a.ts", "content": "1"},
                {"path": "b.ts", "content": "2"},
                {"path": "c.ts", "content": "3"},
            ]}),
        )
        .await;

    assert!(!record.result.success);
    let failed = record.result.data["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["path"], "b.ts");
    assert_eq!(record.result.data["filesCreated"], 2);

    let files = env.files().await;
    assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a.ts", "c.ts"]);
    assert!(matches!(
        env.sandbox_read(&sandbox_id, "b.ts").await,
        Err(SandboxError::FileNotFound(_))
    ));

    let complete = record
        .side_effects
        .iter()
        .find(|e| e.file_path == "b.ts" && e.kind == StreamEventKind::Complete)
        .unwrap();
    assert_eq!(complete.payload["status"], "failed");
}

#[tokio::test]
async fn p5_hanging_command_is_abandoned() {
    let env = env_with(|c| c.hang_commands = true).await;
    env.sandbox().await;

    let started = std::time::Instant::now();
    let record = env
        .call("run_command", json!({"command": "npm run dev", "timeout_ms": 150}))
        .await;
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert!(!record.result.success);
    assert_eq!(record.result.data["exitCode"], -1);
    assert_eq!(record.result.data["timedOut"], true);
}

#[tokio::test]
async fn p5_slow_command_times_out_locally() {
    let env = env().await;
    env.sandbox().await;
    let record = env
        .call("run_command", json!({"command": "sleep 10", "timeout_ms": 200}))
        .await;
    assert!(!record.result.success);
    assert_eq!(record.result.data["exitCode"], -1);
}

#[tokio::test]
async fn p6_invalid_package_names_never_reach_the_shell() {
    let env = env_with(|c| c.fake_commands = true).await;
    env.sandbox().await;

    let record = env
        .call(
            "install_packages",
            json!({"packages": ["valid-pkg", "../../etc/passwd", "@scope/ok"]}),
        )
        .await;
    assert!(record.result.success, "{:?}", record.result);
    assert_eq!(record.result.data["installed"], json!(["valid-pkg", "@scope/ok"]));
    assert_eq!(record.result.data["filtered"], json!(["../../etc/passwd"]));

    let commands = env.client.commands.lock().clone();
    assert_eq!(commands, vec!["npm install valid-pkg @scope/ok".to_string()]);
}

#[tokio::test]
async fn zero_valid_packages_runs_nothing() {
    let env = env_with(|c| c.fake_commands = true).await;
    env.sandbox().await;
    let record = env
        .call("install_packages", json!({"packages": ["$(reboot)"]}))
        .await;
    assert!(!record.result.success);
    assert!(env.client.commands.lock().is_empty());
}

#[tokio::test]
async fn expired_sandbox_is_restored_from_the_map() {
    let env = env().await;
    let old = env.sandbox().await;
    env.call(
        "generate_files",
        json!({"files": [{"path": "app/page.tsx", "content": "kept"}]}),
    )
    .await;

    // The provider reclaims the sandbox while the process is down.
    env.client.kill_sandbox(&old).await.unwrap();
    let restarted = env.restart();

    let read = restarted.call("read_file", json!({"path": "app/page.tsx"})).await.unwrap();
    assert!(read.result.success);

    let cmd = restarted.call("run_command", json!({"command": "true"})).await.unwrap();
    assert_eq!(
        cmd.result.error.as_deref(),
        Some("No active sandbox. Call sandbox_create first.")
    );
    let project = env.store.get_project("p1").await.unwrap().unwrap();
    assert!(project.sandbox_id.is_none());

    let created = restarted.call("sandbox_create", json!({})).await.unwrap();
    let fresh = created.result.data["sandboxId"].as_str().unwrap().to_string();
    assert_ne!(fresh, old);
    assert_eq!(env.sandbox_read(&fresh, "app/page.tsx").await.unwrap(), "kept");
}

#[tokio::test]
async fn failed_restore_never_shrinks_the_map() {
    let env = env().await;
    let old = env.sandbox().await;
    env.call(
        "generate_files",
        json!({"files": [
            {"path": "a.ts", "content": "a"},
            {"path": "b.ts", "content": "b"},
        ]}),
    )
    .await;

    env.client.kill_sandbox(&old).await.unwrap();
    env.client.fail_writes.lock().push("b.ts".to_string());
    let restarted = env.restart();

    let created = restarted.call("sandbox_create", json!({})).await.unwrap();
    assert!(!created.result.success);
    assert_eq!(created.result.data["restoreFailed"], json!(["b.ts"]));
    let fresh = created.result.data["sandboxId"].as_str().unwrap().to_string();
    assert_eq!(env.sandbox_read(&fresh, "a.ts").await.unwrap(), "a");

    let sync = restarted.call("sync_files_to_db", json!({})).await.unwrap();
    assert!(!sync.result.success);
    assert_eq!(env.files().await.keys().collect::<Vec<_>>(), vec!["a.ts", "b.ts"]);

    env.client.fail_writes.lock().clear();
    let retried = restarted.call("sandbox_create", json!({})).await.unwrap();
    assert!(retried.result.success, "{:?}", retried.result);
    assert_eq!(retried.result.data["sandboxId"], json!(fresh));
    assert_eq!(env.sandbox_read(&fresh, "b.ts").await.unwrap(), "b");

    let sync = restarted.call("sync_files_to_db", json!({})).await.unwrap();
    assert!(sync.result.success);
    assert_eq!(env.files().await.keys().collect::<Vec<_>>(), vec!["a.ts", "b.ts"]);
}

#[tokio::test]
async fn streaming_observer_does_not_change_results() {
    let args = json!({"files": [
        {"path": "big.ts", "content": "z".repeat(2500)},
        {"path": "small.ts", "content": "s"},
    ]});

    let quiet = env().await;
    quiet.sandbox().await;
    let unobserved = quiet.call("generate_files", args.clone()).await;

    let (observer, events) = ChannelEmitter::new();
    let watched = env_observed(|_| {}, Some(Arc::new(observer))).await;
    watched.sandbox().await;
    let observed = watched.call("generate_files", args).await;

    assert!(observed.result.success);
    assert_eq!(
        serde_json::to_value(&observed.result).unwrap(),
        serde_json::to_value(&unobserved.result).unwrap()
    );
    assert_eq!(watched.files().await, quiet.files().await);

    // 2500 chars: start + 5 deltas + complete; 1 char: start + delta + complete.
    assert_eq!(observed.side_effects.len(), 7 + 3);
    let kinds: Vec<_> = observed
        .side_effects
        .iter()
        .filter(|e| e.file_path == "big.ts")
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds.first(), Some(&StreamEventKind::Start));
    assert_eq!(kinds.last(), Some(&StreamEventKind::Complete));

    let mut rx = events.into_inner();
    let mut forwarded: Vec<StreamEvent> = Vec::new();
    while let Ok(event) = rx.try_recv() {
        forwarded.push(event);
    }
    assert_eq!(forwarded, observed.side_effects);
}
