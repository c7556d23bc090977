//! Linear, version-gated migrations for the task database.
//!
//! Each step is idempotent (`CREATE TABLE IF NOT EXISTS` / tolerant
//! `ALTER TABLE ... ADD COLUMN`) so re-running `run_migrations` against an
//! already-current database is a no-op beyond the version check. New
//! migrations are appended; existing SQL is never edited in place.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;

const CURRENT_SCHEMA_VERSION: i64 = 3;

fn schema_version(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT value FROM db_metadata WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO db_metadata (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS db_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    let mut version = schema_version(conn);
    debug!(version, "corvid-taskdb: current schema version");

    if version < 1 {
        migrate_v1(conn)?;
        version = 1;
        set_schema_version(conn, version)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
        version = 2;
        set_schema_version(conn, version)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
        version = 3;
        set_schema_version(conn, version)?;
    }

    if version == CURRENT_SCHEMA_VERSION {
        info!(version, "corvid-taskdb: migrations up to date");
    }
    Ok(())
}

/// v1 — base tables: tasks, dependencies, comments, plus the lookup indexes
/// spec.md §4.4 names explicitly.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 100,
            task_type TEXT NOT NULL DEFAULT 'task',
            labels TEXT NOT NULL DEFAULT '[]',
            parent_id TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            completed_at TEXT,
            FOREIGN KEY (parent_id) REFERENCES tasks(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_priority_status ON tasks(priority, status);
        CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);

        CREATE TABLE IF NOT EXISTS task_dependencies (
            src_id TEXT NOT NULL,
            dst_id TEXT NOT NULL,
            dep_type TEXT NOT NULL,
            weight INTEGER NOT NULL DEFAULT 0,
            UNIQUE(src_id, dst_id, dep_type),
            FOREIGN KEY (src_id) REFERENCES tasks(id) ON DELETE CASCADE,
            FOREIGN KEY (dst_id) REFERENCES tasks(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_task_deps_src ON task_dependencies(src_id);
        CREATE INDEX IF NOT EXISTS idx_task_deps_dst ON task_dependencies(dst_id);

        CREATE TABLE IF NOT EXISTS task_comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            agent TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_task_comments_task ON task_comments(task_id, timestamp);
        ",
    )?;
    Ok(())
}

/// v2 — `blocked_reason` column, for an optional human-readable note on why
/// a task is blocked (distinct from the derived `blocked_by_count`).
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE tasks ADD COLUMN blocked_reason TEXT", [])
        .ok();
    Ok(())
}

/// v3 — session-state table, commit-tracking columns, and the compound
/// ready-queue index.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute(
        "ALTER TABLE tasks ADD COLUMN started_at_commit TEXT",
        [],
    )
    .ok();
    conn.execute(
        "ALTER TABLE tasks ADD COLUMN completed_at_commit TEXT",
        [],
    )
    .ok();

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_tasks_ready
            ON tasks(status, task_type, priority, created_at);

        CREATE TABLE IF NOT EXISTS session_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            session_id TEXT NOT NULL,
            current_task_id TEXT,
            started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        ",
    )?;
    Ok(())
}
