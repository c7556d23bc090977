//! Linear, version-gated migrations for the conversation database.
//!
//! Each step is idempotent (`CREATE TABLE IF NOT EXISTS` / tolerant
//! `ALTER TABLE ... ADD COLUMN`) so re-running `run_migrations` against an
//! already-current database is a no-op beyond the version check. New
//! migrations are appended; existing SQL is never edited in place.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;

const CURRENT_SCHEMA_VERSION: i64 = 2;

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
    debug!(version, "corvid-convo: current schema version");

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

    if version == CURRENT_SCHEMA_VERSION {
        info!(version, "corvid-convo: migrations up to date");
    }
    Ok(())
}

/// v1 — conversations and their messages. `next_message_id` on
/// `conversations` is the monotonic per-conversation counter handed out by
/// [`crate::db::ConvoDb::append_message`].
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            title TEXT,
            next_message_id INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            conversation_id TEXT NOT NULL,
            message_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            tool_call_id TEXT,
            tool_calls_json TEXT,
            agent_source TEXT,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (conversation_id, message_id),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, message_id);
        ",
    )?;
    Ok(())
}

/// v2 — sub-agent invocations and their own message histories.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS agent_invocations (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            agent_name TEXT NOT NULL,
            parent_message_id INTEGER,
            task_id TEXT,
            started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            ended_at TEXT,
            status TEXT NOT NULL DEFAULT 'running',
            result_summary TEXT,
            tool_calls_made INTEGER NOT NULL DEFAULT 0,
            iterations_used INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_agent_invocations_session
            ON agent_invocations(session_id, started_at);

        CREATE TABLE IF NOT EXISTS agent_messages (
            invocation_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            tool_call_id TEXT,
            timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (invocation_id, seq),
            FOREIGN KEY (invocation_id) REFERENCES agent_invocations(id) ON DELETE CASCADE
        );
        ",
    )?;
    Ok(())
}
