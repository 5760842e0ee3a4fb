//! Durable project store: project records and their file maps.
//!
//! [`ProjectStore`] is the record-store seam the rest of the crate talks to.
//! [`SqliteProjectStore`] is the bundled implementation; all data lives in a
//! single SQLite file at `Config::db_path`.

pub mod project;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use project::SqliteProjectStore;

/// Relative path → complete file content. Ordered so listings are stable.
pub type FileMap = BTreeMap<String, String>;

/// One file to be written: a relative path and its complete content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Empty,
    Initializing,
    Initialized,
    Ready,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Empty => "empty",
            GenerationStatus::Initializing => "initializing",
            GenerationStatus::Initialized => "initialized",
            GenerationStatus::Ready => "ready",
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "empty" => Ok(GenerationStatus::Empty),
            "initializing" => Ok(GenerationStatus::Initializing),
            "initialized" => Ok(GenerationStatus::Initialized),
            "ready" => Ok(GenerationStatus::Ready),
            other => anyhow::bail!("Unknown generation status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub files: FileMap,
    pub sandbox_id: Option<String>,
    pub version: i64,
    pub generation_status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record-store operations needed by the sandbox and tool layers.
///
/// Mutations on an unknown project ID are errors.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Create a project with an empty file map.
    async fn create_project(&self, id: &str, name: &str) -> Result<Project>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// Insert or overwrite the given entries; other files are untouched.
    async fn upsert_files(&self, id: &str, files: &[FileEntry]) -> Result<()>;

    /// Remove one entry. Returns whether it existed.
    async fn remove_file(&self, id: &str, path: &str) -> Result<bool>;

    /// Replace the whole file map, increment the version and mark the
    /// project `ready`. Returns the new version.
    async fn replace_files(&self, id: &str, files: &FileMap) -> Result<i64>;

    async fn set_sandbox_id(&self, id: &str, sandbox_id: Option<&str>) -> Result<()>;

    async fn set_generation_status(&self, id: &str, status: GenerationStatus) -> Result<()>;
}

/// Initialize the SQLite database and create tables if needed.
pub fn init_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;
    create_schema(&conn)?;
    Ok(conn)
}

pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;

         CREATE TABLE IF NOT EXISTS projects (
             id TEXT PRIMARY KEY,
             name TEXT NOT NULL,
             sandbox_id TEXT,
             version INTEGER NOT NULL DEFAULT 0,
             generation_status TEXT NOT NULL DEFAULT 'empty',
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS project_files (
             project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
             path TEXT NOT NULL,
             content TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             PRIMARY KEY (project_id, path)
         );",
    )?;
    Ok(())
}
