//! Runtime configuration, loaded from TOML.
//!
//! Every section is `#[serde(default)]` so a partial file (or no file at all)
//! yields a working setup with the local sandbox provider.

use anyhow::Context;
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding project records and file maps.
    pub db_path: String,
    pub sandbox: SandboxConfig,
    pub tools: ToolsConfig,
    pub sync: SyncConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SandboxProvider {
    E2b,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SandboxConfig {
    pub provider: SandboxProvider,
    /// Provider template used when provisioning.
    pub template: String,
    /// Project root inside the sandbox.
    pub workdir: String,
    /// Sandbox lifetime requested from the provider on create/resume.
    pub lifetime_ms: u64,
    /// Pause sandboxes unused for this long.
    pub idle_pause_secs: u64,
    pub idle_check_interval_secs: u64,
    /// Base directory for the local provider.
    pub local_root: String,
    pub e2b_api_key: Option<String>,
    pub e2b_base_url: String,
}

/// How file writes reach durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Write the sandbox, then commit the files that succeeded to the database.
    DualWrite,
    /// Write the sandbox only; the database follows on explicit sync.
    SandboxOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ToolsConfig {
    pub command_timeout_ms: u64,
    /// Upper bound on a caller-supplied `timeout_ms`.
    pub max_command_timeout_ms: u64,
    pub install_timeout_ms: u64,
    pub search_max_results: usize,
    pub package_manager: String,
    pub write_strategy: WriteStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent sandbox reads/writes per batch.
    pub batch_size: usize,
    /// Directory names never descended into or synced.
    pub pruned_dirs: Vec<String>,
    /// Globs matched against the relative path and the file name.
    pub exclude_globs: Vec<String>,
    /// Extensions (without dot, lowercase) treated as binary.
    pub binary_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
    /// Content longer than this many characters is streamed in chunks.
    pub chunk_threshold: usize,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "vibeforge", "vibeforge")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".vibeforge"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("vibeforge.db").to_string_lossy().to_string(),
            sandbox: SandboxConfig::default(),
            tools: ToolsConfig::default(),
            sync: SyncConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider: SandboxProvider::Local,
            template: "nextjs-app".to_string(),
            workdir: "/home/user/project".to_string(),
            lifetime_ms: 600_000,
            idle_pause_secs: 300,
            idle_check_interval_secs: 60,
            local_root: data_dir().join("sandboxes").to_string_lossy().to_string(),
            e2b_api_key: None,
            e2b_base_url: crate::sandbox::e2b::E2B_API_BASE.to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            max_command_timeout_ms: 600_000,
            install_timeout_ms: 120_000,
            search_max_results: 100,
            package_manager: "npm".to_string(),
            write_strategy: WriteStrategy::DualWrite,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            batch_size: 10,
            pruned_dirs: owned(&[
                "node_modules",
                ".next",
                ".git",
                "dist",
                "build",
                "out",
                ".cache",
                ".vercel",
                ".turbo",
                "coverage",
            ]),
            exclude_globs: owned(&[
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "bun.lockb",
                ".DS_Store",
                "Thumbs.db",
                "*.log",
                "*.tsbuildinfo",
            ]),
            binary_extensions: owned(&[
                "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "avif", "tiff", "woff",
                "woff2", "ttf", "otf", "eot", "mp3", "mp4", "wav", "ogg", "webm", "mov", "avi",
                "pdf", "zip", "tar", "gz", "tgz", "rar", "7z", "exe", "dll", "so", "dylib",
                "bin", "wasm", "class", "jar", "pyc", "db", "sqlite",
            ]),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_threshold: 1000,
            chunk_size: 500,
            chunk_delay_ms: 10,
        }
    }
}

impl Config {
    /// Default config file location (`<config_dir>/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|d| d.config_dir().join("config.toml"))
    }

    /// Load from `path`, or the default location when `None`. A missing file
    /// yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(ref p) if p.exists() => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                let parsed: Config = toml::from_str(&text)
                    .with_context(|| format!("Failed to parse config {}", p.display()))?;
                tracing::debug!("Loaded config from {}", p.display());
                parsed
            }
            _ => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("E2B_API_KEY") {
            if !key.is_empty() {
                self.sandbox.e2b_api_key = Some(key);
            }
        }
        if let Ok(db) = std::env::var("VIBEFORGE_DB_PATH") {
            if !db.is_empty() {
                self.db_path = db;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.sync.batch_size > 0, "sync.batch_size must be at least 1");
        anyhow::ensure!(self.stream.chunk_size > 0, "stream.chunk_size must be at least 1");
        anyhow::ensure!(
            self.tools.command_timeout_ms <= self.tools.max_command_timeout_ms,
            "tools.command_timeout_ms must not exceed tools.max_command_timeout_ms"
        );
        anyhow::ensure!(
            self.sandbox.workdir.starts_with('/'),
            "sandbox.workdir must be an absolute path"
        );
        for pattern in &self.sync.exclude_globs {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid exclude glob: {pattern}"))?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).as_ref())
    }

    pub fn local_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.sandbox.local_root).as_ref())
    }

    /// JSON Schema of the config file, for editor tooling.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}
