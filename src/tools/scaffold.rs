//! `init_project`: scaffold a Next.js app from the built-in template.

use super::traits::{Tool, ToolResult};
use super::{
    parse_args, restore_incomplete, sandbox_failure, sync_failure, ProjectScope, TOOL_INIT_PROJECT,
};
use crate::store::{FileEntry, GenerationStatus};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// (relative path, template text). `{{name}}` and `{{title}}` are substituted.
const NEXTJS_TEMPLATE: &[(&str, &str)] = &[
    ("package.json", include_str!("../../templates/nextjs/package.json")),
    ("tsconfig.json", include_str!("../../templates/nextjs/tsconfig.json")),
    ("next.config.mjs", include_str!("../../templates/nextjs/next.config.mjs")),
    ("next-env.d.ts", include_str!("../../templates/nextjs/next-env.d.ts")),
    (".gitignore", include_str!("../../templates/nextjs/gitignore")),
    ("app/layout.tsx", include_str!("../../templates/nextjs/app/layout.tsx")),
    ("app/page.tsx", include_str!("../../templates/nextjs/app/page.tsx")),
    ("app/globals.css", include_str!("../../templates/nextjs/app/globals.css")),
];

/// npm-compatible package name derived from a display name.
pub fn package_slug(name: &str) -> String {
    let mut slug = String::new();
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "app".to_string()
    } else {
        slug.chars().take(214).collect()
    }
}

/// Display title safe to drop into JSX text and a JS string literal.
fn display_title(name: &str) -> String {
    let title: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '{' | '}' | '"' | '\\' | '`'))
        .collect();
    match title.trim() {
        "" => "My App".to_string(),
        t => t.to_string(),
    }
}

pub fn render_template(name: &str) -> Vec<FileEntry> {
    let slug = package_slug(name);
    let title = display_title(name);
    NEXTJS_TEMPLATE
        .iter()
        .map(|(path, text)| {
            FileEntry::new(
                *path,
                text.replace("{{name}}", &slug).replace("{{title}}", &title),
            )
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InitArgs {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    overwrite: bool,
}

pub struct InitProjectTool {
    scope: Arc<ProjectScope>,
}

impl InitProjectTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for InitProjectTool {
    fn name(&self) -> &str {
        TOOL_INIT_PROJECT
    }

    fn description(&self) -> &str {
        "Scaffold a new Next.js (App Router, TypeScript) project: package.json, tsconfig.json, \
         next.config.mjs and app/ with layout, page and global styles. Provisions a sandbox if \
         needed. Refuses to run on a project that already has files unless overwrite is true."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "App name. Default: the project name."
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Overwrite template paths in a project that already has files. Default: false."
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: InitArgs = match parse_args(TOOL_INIT_PROJECT, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        let project = match self.scope.project().await? {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };
        if !project.files.is_empty() && !args.overwrite {
            return Ok(ToolResult::failure(format!(
                "Project already has {} file(s); pass overwrite: true to scaffold over them",
                project.files.len()
            )));
        }

        let store = &self.scope.services.store;
        let project_id = &self.scope.project_id;
        store
            .set_generation_status(project_id, GenerationStatus::Initializing)
            .await?;

        let handle = match self.scope.services.sandboxes.get_or_create(project_id).await {
            Ok(h) => h,
            Err(e) => {
                store
                    .set_generation_status(project_id, project.generation_status)
                    .await?;
                return Ok(sandbox_failure(e));
            }
        };
        if !handle.restore_failed.is_empty() {
            store
                .set_generation_status(project_id, project.generation_status)
                .await?;
            return Ok(restore_incomplete(&handle));
        }

        let name = args.name.as_deref().unwrap_or(&project.name);
        let files = render_template(name);
        let report = match self
            .scope
            .services
            .sync
            .push(
                project_id,
                &handle.sandbox_id,
                &files,
                self.scope.config().tools.write_strategy,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                store
                    .set_generation_status(project_id, project.generation_status)
                    .await?;
                return sync_failure(e);
            }
        };

        let data = serde_json::to_value(&report)?;
        if !report.failed.is_empty() {
            store
                .set_generation_status(project_id, project.generation_status)
                .await?;
            let failed: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
            return Ok(ToolResult::failure(format!(
                "Scaffolding failed for {} file(s): {}",
                failed.len(),
                failed.join(", ")
            ))
            .with_data(data));
        }

        store
            .set_generation_status(project_id, GenerationStatus::Initialized)
            .await?;
        tracing::info!("Initialized Next.js project {project_id} in sandbox {}", handle.sandbox_id);
        Ok(ToolResult::success(
            format!(
                "Scaffolded Next.js app '{}' ({} files). Run install_packages or \
                 run_command 'npm install' next.",
                package_slug(name),
                report.written.len()
            ),
            data,
        ))
    }
}
