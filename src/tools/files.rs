//! File tools: list_files, read_file, generate_files, delete_file, sync_files_to_db.

use super::traits::{Tool, ToolResult};
use super::{
    parse_args, restore_incomplete, sync_failure, ProjectScope, TOOL_DELETE_FILE,
    TOOL_GENERATE_FILES, TOOL_LIST_FILES, TOOL_READ_FILE, TOOL_SYNC_FILES_TO_DB,
};
use crate::config::WriteStrategy;
use crate::store::{FileEntry, FileMap};
use crate::stream::{stream_content, ProgressEmitter};
use crate::sync::paths;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cap on the suggestion list returned with a missing-file error.
const MAX_SUGGESTIONS: usize = 20;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub size: usize,
    pub line_count: usize,
    pub extension: String,
    pub inferred_type: &'static str,
}

pub fn file_info(path: &str, content: &str) -> FileInfo {
    FileInfo {
        path: path.to_string(),
        size: content.len(),
        line_count: if content.is_empty() { 0 } else { content.lines().count() },
        extension: extension(path).to_string(),
        inferred_type: infer_type(path),
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(path: &str) -> &str {
    match file_name(path).rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext,
        _ => "",
    }
}

/// Rough role of a file in a Next.js project.
fn infer_type(path: &str) -> &'static str {
    let name = file_name(path);
    let stem = name.split('.').next().unwrap_or(name);
    let ext = extension(path);

    if name.contains(".config.") || name.starts_with("tsconfig") || name == "package.json" {
        return "config";
    }
    if name.contains(".test.") || name.contains(".spec.") {
        return "test";
    }
    match (stem, ext) {
        ("page", "tsx" | "jsx" | "js" | "ts") => "page",
        ("layout", "tsx" | "jsx" | "js" | "ts") => "layout",
        ("route", "ts" | "js") => "api",
        _ => match ext {
            "css" | "scss" | "sass" | "less" => "style",
            "tsx" | "jsx" => "component",
            "ts" | "js" | "mjs" | "cjs" => {
                if path.starts_with("lib/") || path.contains("/lib/") || path.contains("utils") {
                    "utility"
                } else if path.contains("hooks/") {
                    "hook"
                } else {
                    "script"
                }
            }
            "json" | "yaml" | "yml" | "toml" => "data",
            "md" | "mdx" => "documentation",
            "svg" => "asset",
            _ if name.starts_with(".env") || name.starts_with('.') => "config",
            _ => "other",
        },
    }
}

/// Paths most likely meant when `wanted` does not exist, best first.
fn suggest_paths(files: &FileMap, wanted: &str) -> Vec<String> {
    let wanted_name = file_name(wanted);
    let wanted_stem = wanted_name.split('.').next().unwrap_or(wanted_name).to_lowercase();
    let wanted_dir = wanted.rsplit_once('/').map(|(d, _)| d).unwrap_or("");

    let mut scored: Vec<(u8, &String)> = files
        .keys()
        .map(|path| {
            let name = file_name(path);
            let dir = path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
            let score = if name == wanted_name {
                3
            } else if dir == wanted_dir {
                2
            } else if !wanted_stem.is_empty() && name.to_lowercase().contains(&wanted_stem) {
                1
            } else {
                0
            };
            (score, path)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, p)| p.clone())
        .collect()
}

// ── list_files ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    #[serde(default)]
    prefix: Option<String>,
}

pub struct ListFilesTool {
    scope: Arc<ProjectScope>,
}

impl ListFilesTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        TOOL_LIST_FILES
    }

    fn description(&self) -> &str {
        "List the project's files with size, line count, extension and inferred type. \
         Optionally filter by a path prefix such as 'app/' or 'components/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prefix": {
                    "type": "string",
                    "description": "Only list files whose relative path starts with this prefix"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: ListArgs = match parse_args(TOOL_LIST_FILES, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        let project = match self.scope.project().await? {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };

        let prefix = args
            .prefix
            .as_deref()
            .map(|p| p.trim().trim_start_matches("./").trim_start_matches('/'))
            .unwrap_or("");
        let files: Vec<FileInfo> = project
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, content)| file_info(path, content))
            .collect();

        let output = if files.is_empty() {
            if prefix.is_empty() {
                "Project has no files yet".to_string()
            } else {
                format!("No files under '{prefix}'")
            }
        } else {
            files
                .iter()
                .map(|f| format!("{} ({} lines, {})", f.path, f.line_count, f.inferred_type))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ToolResult::success(
            output,
            json!({ "totalFiles": files.len(), "files": files }),
        ))
    }
}

// ── read_file ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadArgs {
    path: String,
}

pub struct ReadFileTool {
    scope: Arc<ProjectScope>,
}

impl ReadFileTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }

    /// Under `sandbox_only` the sandbox is ahead of the database, so a miss in
    /// the file map is retried against a running sandbox.
    async fn read_from_sandbox(&self, path: &str) -> Option<String> {
        if self.scope.config().tools.write_strategy != WriteStrategy::SandboxOnly {
            return None;
        }
        let handle = self.scope.sandbox().await.ok()?;
        let absolute = paths::to_sandbox(self.scope.workdir(), path);
        let content = self
            .scope
            .services
            .client
            .read_file(&handle.sandbox_id, &absolute)
            .await
            .ok()?;
        match self.scope.services.sync.policy().check_content(&content) {
            crate::sync::ContentCheck::Text(text) => Some(text),
            crate::sync::ContentCheck::Binary => None,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn description(&self) -> &str {
        "Read the full content of one project file by its exact relative path. \
         If the file does not exist, similar available paths are suggested."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative file path (e.g. app/page.tsx)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: ReadArgs = match parse_args(TOOL_READ_FILE, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        let project = match self.scope.project().await? {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };
        let path = match paths::normalize(self.scope.workdir(), &args.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure(e)),
        };

        let content = match project.files.get(&path) {
            Some(c) => Some(c.clone()),
            None => self.read_from_sandbox(&path).await,
        };

        match content {
            Some(content) => {
                let info = file_info(&path, &content);
                Ok(ToolResult::success(
                    content.clone(),
                    json!({
                        "path": info.path,
                        "content": content,
                        "size": info.size,
                        "lineCount": info.line_count,
                        "extension": info.extension,
                        "inferredType": info.inferred_type,
                    }),
                ))
            }
            None => Ok(ToolResult::failure(format!("File not found: {}", args.path))
                .with_data(json!({ "availableFiles": suggest_paths(&project.files, &path) }))),
        }
    }
}

// ── generate_files ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenerateArgs {
    files: Vec<FileEntry>,
}

pub struct GenerateFilesTool {
    scope: Arc<ProjectScope>,
}

impl GenerateFilesTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for GenerateFilesTool {
    fn name(&self) -> &str {
        TOOL_GENERATE_FILES
    }

    fn description(&self) -> &str {
        "Create or overwrite project files. Each entry must contain the COMPLETE file content, \
         never a diff or a fragment. Files are written to the sandbox and saved to the project. \
         Requires an active sandbox (call sandbox_create first)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": {
                                "type": "string",
                                "description": "Relative file path (e.g. app/page.tsx)"
                            },
                            "content": {
                                "type": "string",
                                "description": "Complete file content"
                            }
                        },
                        "required": ["path", "content"]
                    }
                }
            },
            "required": ["files"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: GenerateArgs = match parse_args(TOOL_GENERATE_FILES, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        if args.files.is_empty() {
            return Ok(ToolResult::failure("files must contain at least one entry"));
        }
        if let Err(failure) = self.scope.project().await? {
            return Ok(failure);
        }
        let handle = match self.scope.sandbox().await {
            Ok(h) => h,
            Err(failure) => return Ok(failure),
        };

        // Later entries for the same path win; stream each path once.
        let mut order: Vec<String> = Vec::new();
        let mut latest: BTreeMap<String, FileEntry> = BTreeMap::new();
        for file in args.files {
            let key = paths::normalize(self.scope.workdir(), &file.path).unwrap_or_else(|_| file.path.clone());
            if !latest.contains_key(&key) {
                order.push(key.clone());
            }
            latest.insert(key, file);
        }

        let emitter: &dyn ProgressEmitter = self.scope.emitter.as_ref();
        let stream_config = &self.scope.config().stream;
        let mut entries = Vec::with_capacity(order.len());
        for key in &order {
            if let Some(entry) = latest.remove(key) {
                stream_content(
                    emitter,
                    stream_config,
                    key,
                    &entry.content,
                    json!({ "size": entry.content.len() }),
                )
                .await;
                entries.push(entry);
            }
        }

        let report = match self
            .scope
            .services
            .sync
            .push(
                &self.scope.project_id,
                &handle.sandbox_id,
                &entries,
                self.scope.config().tools.write_strategy,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if stream_config.enabled {
                    for key in &order {
                        emitter.write_complete(
                            key,
                            json!({ "status": "failed", "error": e.to_string() }),
                        );
                    }
                }
                return sync_failure(e);
            }
        };
        self.scope
            .services
            .sandboxes
            .registry()
            .mark_restored(&self.scope.project_id, &report.written);

        if stream_config.enabled {
            for key in &order {
                let status = if let Some(f) = report.failed.iter().find(|f| &f.path == key) {
                    json!({ "status": "failed", "error": f.error })
                } else if report.skipped.contains(key) {
                    json!({ "status": "skipped" })
                } else {
                    json!({ "status": "written" })
                };
                emitter.write_complete(key, status);
            }
        }

        let summary = format!(
            "{} file(s) created, {} updated",
            report.files_created, report.files_updated
        );
        let mut output = summary.clone();
        if !report.skipped.is_empty() {
            output.push_str(&format!("; skipped (binary or excluded): {}", report.skipped.join(", ")));
        }
        let data = serde_json::to_value(&report)?;

        if report.failed.is_empty() {
            Ok(ToolResult::success(output, data))
        } else {
            let failed: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
            Ok(ToolResult::failure(format!(
                "Failed to write {} file(s): {}",
                failed.len(),
                failed.join(", ")
            ))
            .with_output(format!("{summary}; failed: {}", failed.join(", ")))
            .with_data(data))
        }
    }
}

// ── delete_file ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteArgs {
    path: String,
}

pub struct DeleteFileTool {
    scope: Arc<ProjectScope>,
}

impl DeleteFileTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        TOOL_DELETE_FILE
    }

    fn description(&self) -> &str {
        "Delete one project file by its exact relative path, from both the sandbox and the \
         saved project. Requires an active sandbox."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative file path to delete"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: DeleteArgs = match parse_args(TOOL_DELETE_FILE, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        if let Err(failure) = self.scope.project().await? {
            return Ok(failure);
        }
        let path = match paths::normalize(self.scope.workdir(), &args.path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure(e)),
        };
        let handle = match self.scope.sandbox().await {
            Ok(h) => h,
            Err(failure) => return Ok(failure),
        };

        let outcome = match self
            .scope
            .services
            .sync
            .remove(
                &self.scope.project_id,
                &handle.sandbox_id,
                &path,
                self.scope.config().tools.write_strategy,
            )
            .await
        {
            Ok(o) => o,
            Err(e) => return sync_failure(e),
        };

        if !outcome.removed_from_sandbox && !outcome.removed_from_store {
            return Ok(ToolResult::failure(format!("File not found: {path}")));
        }
        if outcome.removed_from_store {
            self.scope
                .services
                .sandboxes
                .registry()
                .mark_restored(&self.scope.project_id, std::slice::from_ref(&path));
        }
        Ok(ToolResult::success(
            format!("Deleted {path}"),
            json!({
                "path": path,
                "removedFromSandbox": outcome.removed_from_sandbox,
                "removedFromStore": outcome.removed_from_store,
            }),
        ))
    }
}

// ── sync_files_to_db ──────────────────────────────────────────────────────────

pub struct SyncFilesToDbTool {
    scope: Arc<ProjectScope>,
}

impl SyncFilesToDbTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for SyncFilesToDbTool {
    fn name(&self) -> &str {
        TOOL_SYNC_FILES_TO_DB
    }

    fn description(&self) -> &str {
        "Save the sandbox's current files to the project, replacing the saved file set. \
         Dependency folders, build output, lockfiles and binary files are skipped. \
         Run this after commands that create or modify files (e.g. scaffolding or codegen). \
         Refused while saved files are still missing from the sandbox after a restore."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
        if let Err(failure) = self.scope.project().await? {
            return Ok(failure);
        }
        let handle = match self.scope.sandbox().await {
            Ok(h) => h,
            Err(failure) => return Ok(failure),
        };
        // Pulling now would drop the files the sandbox never received.
        if !handle.restore_failed.is_empty() {
            return Ok(restore_incomplete(&handle));
        }

        let report = match self
            .scope
            .services
            .sync
            .pull(&self.scope.project_id, &handle.sandbox_id)
            .await
        {
            Ok(r) => r,
            Err(e) => return sync_failure(e),
        };

        let mut output = format!(
            "Synced {} of {} file(s) ({} skipped as binary)",
            report.files_synced, report.total_files, report.skipped
        );
        if !report.failed.is_empty() {
            output.push_str(&format!("; {} could not be read", report.failed.len()));
        }
        Ok(ToolResult::success(output, serde_json::to_value(&report)?))
    }
}
