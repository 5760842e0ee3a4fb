//! `run_command` and `install_packages`: shell execution in the project sandbox.

use super::traits::{Tool, ToolResult};
use super::{parse_args, ProjectScope, TOOL_INSTALL_PACKAGES, TOOL_RUN_COMMAND};
use crate::config::WriteStrategy;
use crate::sandbox::{run_with_timeout, CommandOutcome};
use crate::store::FileEntry;
use crate::sync::paths;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, LazyLock};

/// npm's limit on package name length.
const MAX_PACKAGE_NAME_LEN: usize = 214;

/// `name`, `@scope/name`, either optionally followed by `@version`. The
/// version charset excludes anything a shell would interpret.
static PACKAGE_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*(@[A-Za-z0-9._~^-]+)?$").ok()
});

pub fn is_valid_package_name(name: &str) -> bool {
    name.len() <= MAX_PACKAGE_NAME_LEN
        && PACKAGE_NAME.as_ref().is_some_and(|re| re.is_match(name))
}

/// Install command for the configured package manager.
fn install_command(package_manager: &str, packages: &[String], dev: bool) -> String {
    let (base, dev_flag) = match package_manager {
        "pnpm" => ("pnpm add", "-D"),
        "yarn" => ("yarn add", "--dev"),
        "bun" => ("bun add", "-d"),
        _ => ("npm install", "--save-dev"),
    };
    let mut command = base.to_string();
    if dev {
        command.push(' ');
        command.push_str(dev_flag);
    }
    for package in packages {
        command.push(' ');
        command.push_str(package);
    }
    command
}

fn format_outcome(outcome: &CommandOutcome) -> String {
    let mut out = format!("exit_code: {}", outcome.exit_code);
    if !outcome.stdout.is_empty() {
        out.push_str(&format!("\n\nstdout:\n{}", outcome.stdout));
    }
    if !outcome.stderr.is_empty() {
        out.push_str(&format!("\n\nstderr:\n{}", outcome.stderr));
    }
    out
}

fn outcome_error(outcome: &CommandOutcome) -> String {
    if outcome.timed_out {
        outcome
            .error
            .clone()
            .unwrap_or_else(|| "Command timed out".to_string())
    } else if let Some(error) = &outcome.error {
        format!("Failed to run command: {error}")
    } else {
        format!("Command exited with code {}", outcome.exit_code)
    }
}

// ── run_command ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunArgs {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct RunCommandTool {
    scope: Arc<ProjectScope>,
}

impl RunCommandTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        TOOL_RUN_COMMAND
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory inside the sandbox. \
         Returns exitCode, stdout and stderr. Commands that exceed the timeout are abandoned \
         and reported with exitCode -1. Files changed by the command are not saved to the \
         project until sync_files_to_db is called. Requires an active sandbox."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute (e.g. 'npm run build', 'ls -la app')"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Timeout in milliseconds. Default: 30000, capped at 600000."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: RunArgs = match parse_args(TOOL_RUN_COMMAND, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };
        if args.command.trim().is_empty() {
            return Ok(ToolResult::failure("command cannot be empty"));
        }
        let handle = match self.scope.sandbox().await {
            Ok(h) => h,
            Err(failure) => {
                return Ok(failure.with_data(json!({ "exitCode": crate::sandbox::exec::FAILED_EXIT_CODE })))
            }
        };

        let tools = &self.scope.config().tools;
        let timeout_ms = args
            .timeout_ms
            .unwrap_or(tools.command_timeout_ms)
            .min(tools.max_command_timeout_ms);
        let outcome = run_with_timeout(
            self.scope.services.client.as_ref(),
            &handle.sandbox_id,
            &args.command,
            self.scope.workdir(),
            timeout_ms,
        )
        .await;

        let output = format_outcome(&outcome);
        let data = serde_json::to_value(&outcome)?;
        if outcome.success() {
            Ok(ToolResult::success(output, data))
        } else {
            Ok(ToolResult::failure(outcome_error(&outcome))
                .with_output(output)
                .with_data(data))
        }
    }
}

// ── install_packages ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallArgs {
    packages: Vec<String>,
    #[serde(default)]
    dev: bool,
}

pub struct InstallPackagesTool {
    scope: Arc<ProjectScope>,
}

impl InstallPackagesTool {
    pub fn new(scope: Arc<ProjectScope>) -> Self {
        Self { scope }
    }

    /// Save the sandbox's package.json after an install so the durable
    /// map records the new dependencies.
    async fn refresh_manifest(&self, sandbox_id: &str) {
        if self.scope.config().tools.write_strategy != WriteStrategy::DualWrite {
            return;
        }
        let absolute = paths::to_sandbox(self.scope.workdir(), "package.json");
        let content = match self.scope.services.client.read_file(sandbox_id, &absolute).await {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("No package.json to refresh after install: {e}");
                return;
            }
        };
        if let Err(e) = self
            .scope
            .services
            .store
            .upsert_files(&self.scope.project_id, &[FileEntry::new("package.json", content)])
            .await
        {
            tracing::warn!("Failed to save package.json after install: {e}");
        }
    }
}

#[async_trait]
impl Tool for InstallPackagesTool {
    fn name(&self) -> &str {
        TOOL_INSTALL_PACKAGES
    }

    fn description(&self) -> &str {
        "Install npm packages into the project (e.g. ['zod', '@radix-ui/react-dialog', 'lodash@4.17.21']). \
         Invalid package names are filtered out and reported. Requires an active sandbox."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "packages": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Package names, optionally scoped and/or with @version"
                },
                "dev": {
                    "type": "boolean",
                    "description": "Install as devDependencies. Default: false."
                }
            },
            "required": ["packages"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let args: InstallArgs = match parse_args(TOOL_INSTALL_PACKAGES, args) {
            Ok(a) => a,
            Err(failure) => return Ok(failure),
        };

        let (valid, filtered): (Vec<String>, Vec<String>) = args
            .packages
            .into_iter()
            .map(|p| p.trim().to_string())
            .partition(|p| is_valid_package_name(p));
        if !filtered.is_empty() {
            tracing::warn!("Filtered invalid package names: {}", filtered.join(", "));
        }
        if valid.is_empty() {
            return Ok(ToolResult::failure("No valid package names to install")
                .with_data(json!({ "installed": [], "filtered": filtered })));
        }

        let handle = match self.scope.sandbox().await {
            Ok(h) => h,
            Err(failure) => return Ok(failure),
        };

        let command = install_command(&self.scope.config().tools.package_manager, &valid, args.dev);
        let outcome = run_with_timeout(
            self.scope.services.client.as_ref(),
            &handle.sandbox_id,
            &command,
            self.scope.workdir(),
            self.scope.config().tools.install_timeout_ms,
        )
        .await;

        let data = |installed: Vec<String>| {
            json!({
                "installed": installed,
                "filtered": filtered,
                "command": command,
                "exitCode": outcome.exit_code,
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
                "timedOut": outcome.timed_out,
            })
        };

        if outcome.success() {
            self.refresh_manifest(&handle.sandbox_id).await;
            let mut output = format!("Installed {}", valid.join(", "));
            if !filtered.is_empty() {
                output.push_str(&format!(" (filtered invalid: {})", filtered.join(", ")));
            }
            Ok(ToolResult::success(output, data(valid.clone())))
        } else {
            Ok(ToolResult::failure(outcome_error(&outcome))
                .with_output(format_outcome(&outcome))
                .with_data(data(Vec::new())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{harness, harness_with};
    use super::super::{TOOL_INSTALL_PACKAGES, TOOL_RUN_COMMAND, TOOL_SANDBOX_CREATE};
    use super::*;

    #[test]
    fn package_names_follow_allow_list() {
        for ok in ["react", "@scope/ok", "lodash.merge", "zod@3.22.4", "@types/node@^20", "valid-pkg"] {
            assert!(is_valid_package_name(ok), "{ok}");
        }
        for bad in [
            "../../etc/passwd",
            "react; rm -rf /",
            "$(whoami)",
            "React",
            "",
            "@scope/",
            "a b",
            "pkg@>=1 && ls",
        ] {
            assert!(!is_valid_package_name(bad), "{bad}");
        }
        assert!(!is_valid_package_name(&"a".repeat(215)));
        assert!(is_valid_package_name(&"a".repeat(214)));
    }

    #[test]
    fn install_command_per_manager() {
        let pkgs = vec!["zod".to_string(), "@scope/ok".to_string()];
        assert_eq!(install_command("npm", &pkgs, false), "npm install zod @scope/ok");
        assert_eq!(install_command("npm", &pkgs, true), "npm install --save-dev zod @scope/ok");
        assert_eq!(install_command("pnpm", &pkgs, true), "pnpm add -D zod @scope/ok");
    }

    #[tokio::test]
    async fn command_without_sandbox_reports_exit_minus_one() {
        let h = harness().await;
        let record = h.call(TOOL_RUN_COMMAND, json!({"command": "echo hi"})).await;
        assert!(!record.result.success);
        assert_eq!(record.result.data["exitCode"], -1);
    }

    #[tokio::test]
    async fn command_captures_output_and_exit_code() {
        let h = harness().await.with_sandbox().await;
        let ok = h.call(TOOL_RUN_COMMAND, json!({"command": "echo hello"})).await;
        assert!(ok.result.success);
        assert_eq!(ok.result.data["exitCode"], 0);
        assert_eq!(ok.result.data["stdout"], "hello\n");

        let bad = h
            .call(TOOL_RUN_COMMAND, json!({"command": "echo oops >&2; exit 3"}))
            .await;
        assert!(!bad.result.success);
        assert_eq!(bad.result.data["exitCode"], 3);
        assert_eq!(bad.result.data["stderr"], "oops\n");
        assert_eq!(bad.result.error.as_deref(), Some("Command exited with code 3"));
    }

    #[tokio::test]
    async fn command_timeout_is_exit_minus_one() {
        let h = harness().await.with_sandbox().await;
        let record = h
            .call(TOOL_RUN_COMMAND, json!({"command": "sleep 5", "timeout_ms": 100}))
            .await;
        assert!(!record.result.success);
        assert_eq!(record.result.data["exitCode"], -1);
        assert_eq!(record.result.data["timedOut"], true);
    }

    #[tokio::test]
    async fn caller_timeout_is_capped() {
        let h = harness_with(|c| {
            c.tools.command_timeout_ms = 100;
            c.tools.max_command_timeout_ms = 200;
        })
        .await;
        h.call(TOOL_SANDBOX_CREATE, json!({})).await;

        let started = std::time::Instant::now();
        let record = h
            .call(TOOL_RUN_COMMAND, json!({"command": "sleep 5", "timeout_ms": 3_600_000}))
            .await;
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert_eq!(record.result.data["timedOut"], true);
    }

    #[tokio::test]
    async fn all_invalid_packages_never_run() {
        let h = harness().await;
        let record = h
            .call(TOOL_INSTALL_PACKAGES, json!({"packages": ["../x", "a;b"]}))
            .await;
        assert_eq!(record.result.error.as_deref(), Some("No valid package names to install"));
        assert_eq!(record.result.data["filtered"], json!(["../x", "a;b"]));
    }
}
