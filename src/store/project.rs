//! SQLite implementation of [`ProjectStore`].

use super::{create_schema, init_db, FileEntry, FileMap, GenerationStatus, Project, ProjectStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct SqliteProjectStore {
    conn: Mutex<Connection>,
}

impl SqliteProjectStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(init_db(db_path)?),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn ensure_updated(changed: usize, id: &str) -> Result<()> {
    anyhow::ensure!(changed > 0, "Project not found: {id}");
    Ok(())
}

fn load_project(conn: &Connection, id: &str) -> Result<Option<Project>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, sandbox_id, version, generation_status, created_at, updated_at
         FROM projects WHERE id = ?1",
    )?;

    let row = stmt
        .query_row(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .optional()?;

    let Some((id, name, sandbox_id, version, status, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT path, content FROM project_files WHERE project_id = ?1")?;
    let files = stmt
        .query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<FileMap>>()?;

    Ok(Some(Project {
        id,
        name,
        files,
        sandbox_id,
        version,
        generation_status: status.parse()?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    }))
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn create_project(&self, id: &str, name: &str) -> Result<Project> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO projects (id, name, version, generation_status, created_at, updated_at)
             VALUES (?1, ?2, 0, 'empty', ?3, ?3)",
            params![id, name, now],
        )
        .with_context(|| format!("Failed to create project {id}"))?;
        load_project(&conn, id)?.with_context(|| format!("Project vanished after insert: {id}"))
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock();
        load_project(&conn, id)
    }

    async fn upsert_files(&self, id: &str, files: &[FileEntry]) -> Result<()> {
        let mut conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        ensure_updated(
            tx.execute(
                "UPDATE projects SET updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?,
            id,
        )?;
        for file in files {
            tx.execute(
                "INSERT INTO project_files (project_id, path, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(project_id, path) DO UPDATE SET
                     content = excluded.content,
                     updated_at = excluded.updated_at",
                params![id, file.path, file.content, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn remove_file(&self, id: &str, path: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM project_files WHERE project_id = ?1 AND path = ?2",
            params![id, path],
        )?;
        if removed > 0 {
            conn.execute(
                "UPDATE projects SET updated_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(removed > 0)
    }

    async fn replace_files(&self, id: &str, files: &FileMap) -> Result<i64> {
        let mut conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        ensure_updated(
            tx.execute(
                "UPDATE projects
                 SET version = version + 1, generation_status = 'ready', updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?,
            id,
        )?;
        tx.execute(
            "DELETE FROM project_files WHERE project_id = ?1",
            params![id],
        )?;
        for (path, content) in files {
            tx.execute(
                "INSERT INTO project_files (project_id, path, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, path, content, now],
            )?;
        }
        let version: i64 = tx.query_row(
            "SELECT version FROM projects WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(version)
    }

    async fn set_sandbox_id(&self, id: &str, sandbox_id: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        ensure_updated(
            conn.execute(
                "UPDATE projects SET sandbox_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, sandbox_id, Utc::now().to_rfc3339()],
            )?,
            id,
        )
    }

    async fn set_generation_status(&self, id: &str, status: GenerationStatus) -> Result<()> {
        let conn = self.conn.lock();
        ensure_updated(
            conn.execute(
                "UPDATE projects SET generation_status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), Utc::now().to_rfc3339()],
            )?,
            id,
        )
    }
}
