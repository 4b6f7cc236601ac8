//! SQLite task store
//!
//! ## Migration System
//!
//! The schema is versioned and migrations run on open.
//! - Version 1: `tasks` table
//! - Version 2: `sandbox_id` / `session_id` columns

use super::TaskStore;
use crate::task::{StatusUpdate, TaskId, TaskRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

const SELECT_COLUMNS: &str = "id, instruction, requesting_user_id, status, error, sandbox_id, \
     session_id, created_at, started_at, completed_at, updated_at";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) `conduit.db` under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join("conduit.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                instruction TEXT NOT NULL,
                requesting_user_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN
                    ('pending', 'starting', 'running', 'completed', 'failed', 'cancelled')),
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version()?;
        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!("Task schema is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Running task store migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;
        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => warn!("Unknown migration version: {}", version),
            }
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;
        }
        Ok(())
    }

    /// Version 2: remember which sandbox and session served the task
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "ALTER TABLE tasks ADD COLUMN sandbox_id TEXT;
             ALTER TABLE tasks ADD COLUMN session_id TEXT;",
        )
        .map_err(|e| Error::Storage(format!("Migration v2 failed: {}", e)))
    }

    fn select(conn: &Connection, id: &TaskId) -> Result<TaskRecord> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", SELECT_COLUMNS);
        conn.query_row(&sql, params![id.to_string()], TaskRow::from_row)
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?
            .into_record()
    }
}

fn parse_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Storage(format!("Invalid timestamp {}: {}", s, e)))
        })
        .transpose()
}

/// Row as stored; converted to a `TaskRecord` outside the rusqlite callback
struct TaskRow {
    id: String,
    instruction: String,
    requesting_user_id: String,
    status: String,
    error: Option<String>,
    sandbox_id: Option<String>,
    session_id: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            instruction: row.get(1)?,
            requesting_user_id: row.get(2)?,
            status: row.get(3)?,
            error: row.get(4)?,
            sandbox_id: row.get(5)?,
            session_id: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: self.id.parse()?,
            instruction: self.instruction,
            requesting_user_id: self.requesting_user_id,
            status: self.status.parse()?,
            error: self.error,
            sandbox_id: self.sandbox_id,
            session_id: self.session_id,
            created_at: parse_time(Some(self.created_at))?.unwrap_or_else(Utc::now),
            started_at: parse_time(self.started_at)?,
            completed_at: parse_time(self.completed_at)?,
            updated_at: parse_time(Some(self.updated_at))?.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get_task(&self, id: &TaskId) -> Result<TaskRecord> {
        let conn = self.lock()?;
        Self::select(&conn, id)
    }

    async fn insert_task(&self, record: TaskRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, instruction, requesting_user_id, status, error, sandbox_id,
                session_id, created_at, started_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                record.instruction,
                record.requesting_user_id,
                record.status.as_str(),
                record.error,
                record.sandbox_id,
                record.session_id,
                record.created_at.to_rfc3339(),
                record.started_at.map(|t| t.to_rfc3339()),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to insert task: {}", e)))?;
        Ok(())
    }

    async fn update_task_status(&self, id: &TaskId, update: StatusUpdate) -> Result<TaskRecord> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET
                    status = ?2,
                    error = COALESCE(?3, error),
                    sandbox_id = COALESCE(?4, sandbox_id),
                    session_id = COALESCE(?5, session_id),
                    started_at = COALESCE(?6, started_at),
                    completed_at = COALESCE(?7, completed_at),
                    updated_at = ?8
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.status.as_str(),
                    update.error,
                    update.sandbox_id,
                    update.session_id,
                    update.started_at.map(|t| t.to_rfc3339()),
                    update.completed_at.map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to update task: {}", e)))?;

        if changed == 0 {
            return Err(Error::NotFound(format!("task {}", id)));
        }
        Self::select(&conn, id)
    }
}
