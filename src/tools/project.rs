//! Project introspection: get_project_structure, validate_project.

use super::traits::{Tool, ToolResult};
use super::{ProjectScope, TOOL_GET_PROJECT_STRUCTURE, TOOL_VALIDATE_PROJECT};
use crate::store::FileMap;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Default)]
struct DirBuilder {
    dirs: BTreeMap<String, DirBuilder>,
    files: Vec<String>,
}

impl DirBuilder {
    fn insert(&mut self, path: &str) {
        match path.split_once('/') {
            Some((dir, rest)) => self.dirs.entry(dir.to_string()).or_default().insert(rest),
            None => self.files.push(path.to_string()),
        }
    }

    /// Directories first, then files, each sorted by name.
    fn into_nodes(self, prefix: &str) -> Vec<TreeNode> {
        let join = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            }
        };
        let mut nodes: Vec<TreeNode> = self
            .dirs
            .into_iter()
            .map(|(name, dir)| {
                let path = join(&name);
                TreeNode {
                    children: dir.into_nodes(&path),
                    name,
                    path,
                    kind: NodeKind::Directory,
                }
            })
            .collect();
        let mut files = self.files;
        files.sort();
        nodes.extend(files.into_iter().map(|name| TreeNode {
            path: join(&name),
            name,
            kind: NodeKind::File,
            children: Vec::new(),
        }));
        nodes
    }
}

pub fn build_tree(files: &FileMap) -> Vec<TreeNode> {
    let mut root = DirBuilder::default();
    for path in files.keys() {
        root.insert(path);
    }
    root.into_nodes("")
}

pub fn render_tree(nodes: &[TreeNode]) -> String {
    fn walk(nodes: &[TreeNode], indent: &str, out: &mut String) {
        for (i, node) in nodes.iter().enumerate() {
            let last = i + 1 == nodes.len();
            out.push_str(indent);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(&node.name);
            if node.kind == NodeKind::Directory {
                out.push('/');
            }
            out.push('\n');
            let child_indent = format!("{indent}{}", if last { "    " } else { "│   " });
            walk(&node.children, &child_indent, out);
        }
    }

    let mut out = String::new();
    walk(nodes, "", &mut out);
    out
}

// ── get_project_structure ─────────────────────────────────────────────────────

pub struct GetProjectStructureTool {
    scope: Arc<ProjectScope>,
}

impl GetProjectStructureTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for GetProjectStructureTool {
    fn name(&self) -> &str {
        TOOL_GET_PROJECT_STRUCTURE
    }

    fn description(&self) -> &str {
        "Show the project's directory tree. Use this to orient yourself before reading or \
         editing files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let project = match self.scope.project().await? {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };

        let tree = build_tree(&project.files);
        let rendering = render_tree(&tree);
        let output = if rendering.is_empty() {
            "Project has no files yet".to_string()
        } else {
            format!("{}/\n{rendering}", project.name)
        };

        Ok(ToolResult::success(
            output,
            json!({
                "tree": tree,
                "rendering": rendering,
                "totalFiles": project.files.len(),
            }),
        ))
    }
}

// ── validate_project ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub checked_files: usize,
}

fn has_any(files: &FileMap, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|c| files.contains_key(**c))
        .map(|c| (*c).to_string())
}

fn has_dir(files: &FileMap, dir: &str) -> bool {
    let prefix = format!("{dir}/");
    files.keys().any(|p| p.starts_with(&prefix))
}

/// Check a Next.js file map against the expected layout.
pub fn validate(files: &FileMap) -> ValidationReport {
    let mut report = ValidationReport {
        checked_files: files.len(),
        ..ValidationReport::default()
    };

    match files.get("package.json") {
        None => report.issues.push("Missing package.json".to_string()),
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Err(e) => report.issues.push(format!("package.json is not valid JSON: {e}")),
            Ok(manifest) => {
                for script in ["dev", "build"] {
                    if manifest["scripts"][script].is_null() {
                        report
                            .warnings
                            .push(format!("package.json has no \"{script}\" script"));
                    }
                }
                for dep in ["next", "react", "react-dom"] {
                    if manifest["dependencies"][dep].is_null()
                        && manifest["devDependencies"][dep].is_null()
                    {
                        report
                            .warnings
                            .push(format!("package.json does not depend on {dep}"));
                    }
                }
            }
        },
    }

    match files.get("tsconfig.json") {
        None => {
            if files.keys().any(|p| p.ends_with(".ts") || p.ends_with(".tsx")) {
                report
                    .warnings
                    .push("TypeScript files present but tsconfig.json is missing".to_string());
            }
        }
        Some(raw) => {
            if serde_json::from_str::<serde_json::Value>(raw).is_err() {
                report
                    .warnings
                    .push("tsconfig.json could not be parsed as plain JSON".to_string());
            }
        }
    }

    if has_any(
        files,
        &["next.config.js", "next.config.mjs", "next.config.ts", "next.config.cjs"],
    )
    .is_none()
    {
        report.warnings.push("Missing next.config file".to_string());
    }

    let app_dir = ["app", "src/app"].into_iter().find(|d| has_dir(files, d));
    let pages_dir = ["pages", "src/pages"].into_iter().find(|d| has_dir(files, d));
    match (app_dir, pages_dir) {
        (None, None) => report
            .issues
            .push("No app/ or pages/ directory found".to_string()),
        (Some(dir), _) => {
            for entry in ["layout", "page"] {
                let found = ["tsx", "jsx", "js", "ts"]
                    .iter()
                    .any(|ext| files.contains_key(&format!("{dir}/{entry}.{ext}")));
                if !found {
                    report.issues.push(format!("Missing root {entry} in {dir}/"));
                }
            }
        }
        (None, Some(_)) => {}
    }

    for (path, content) in files {
        if content.trim().is_empty() {
            report.warnings.push(format!("{path} is empty"));
        }
    }

    report.valid = report.issues.is_empty();
    report
}

pub struct ValidateProjectTool {
    scope: Arc<ProjectScope>,
}

impl ValidateProjectTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for ValidateProjectTool {
    fn name(&self) -> &str {
        TOOL_VALIDATE_PROJECT
    }

    fn description(&self) -> &str {
        "Check the project for the files and layout a Next.js app needs (package.json, \
         tsconfig.json, next.config, app/ layout and page). Returns issues that will break \
         the build and warnings worth fixing."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let project = match self.scope.project().await? {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };

        let report = validate(&project.files);
        let mut lines = vec![if report.valid {
            format!("Project is valid ({} warning(s))", report.warnings.len())
        } else {
            format!("Found {} issue(s)", report.issues.len())
        }];
        lines.extend(report.issues.iter().map(|i| format!("error: {i}")));
        lines.extend(report.warnings.iter().map(|w| format!("warning: {w}")));

        Ok(ToolResult::success(lines.join("\n"), serde_json::to_value(&report)?))
    }
}
