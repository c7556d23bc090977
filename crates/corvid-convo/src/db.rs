use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{ConvoError, Result};
use crate::migrations::run_migrations;
use crate::types::{
    new_id, AgentInvocation, AgentMessage, Conversation, InvocationStatus, PersistedMessage, Role,
};

/// SQLite-backed conversation, message, and sub-agent invocation store.
///
/// Authoritative for everything it holds — there is no in-memory facade in
/// front of it analogous to `corvid-taskdb::TaskStore`; [`crate::virtualization`]
/// only caches *rendering* state (heights, which messages are loaded), never
/// message content itself.
pub struct ConvoDb {
    conn: Mutex<Connection>,
}

impl ConvoDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        Self::init(conn, path)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, Path::new(":memory:"))
    }

    fn init(conn: Connection, path: &Path) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        run_migrations(&conn)?;
        debug!(path = %path.display(), "corvid-convo: opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Default on-disk location: `~/.config/corvid/conversations.db`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("corvid")
            .join("conversations.db")
    }

    // ── Conversations ─────────────────────────────────────────────────────

    /// Create a conversation with a fresh id, or reuse `id` if given.
    pub fn create_conversation(&self, id: Option<&str>, title: Option<&str>) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        let id = id.map(str::to_string).unwrap_or_else(new_id);
        let now = now_iso();
        conn.execute(
            "INSERT INTO conversations (id, title, next_message_id, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![id, title, now],
        )?;
        Ok(Conversation { id, title: title.map(str::to_string), created_at: now.clone(), updated_at: now })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
            [id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| ConvoError::NotFound(id.to_string()))
    }

    /// Appends a message and returns it with its freshly allocated
    /// `message_id`. The system message must be appended first (index 0);
    /// this method does not special-case it — callers (the agent executor)
    /// are responsible for ensuring it happens exactly once per conversation.
    #[allow(clippy::too_many_arguments)]
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        tool_call_id: Option<&str>,
        tool_calls_json: Option<&str>,
        agent_source: Option<&str>,
    ) -> Result<PersistedMessage> {
        let conn = self.conn.lock().unwrap();
        let message_id: i64 = conn
            .query_row(
                "SELECT next_message_id FROM conversations WHERE id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| ConvoError::NotFound(conversation_id.to_string()))?;

        let now = now_iso();
        conn.execute(
            "INSERT INTO messages
                (conversation_id, message_id, role, content, tool_call_id, tool_calls_json, agent_source, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation_id,
                message_id,
                role.as_str(),
                content,
                tool_call_id,
                tool_calls_json,
                agent_source,
                now,
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET next_message_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![conversation_id, message_id + 1, now],
        )?;

        Ok(PersistedMessage {
            conversation_id: conversation_id.to_string(),
            message_id,
            role,
            content: content.to_string(),
            tool_call_id: tool_call_id.map(str::to_string),
            tool_calls_json: tool_calls_json.map(str::to_string),
            agent_source: agent_source.map(str::to_string),
            timestamp: now,
        })
    }

    pub fn message_count(&self, conversation_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?)
    }

    /// Range-load messages `[start, end)` by `message_id`, for virtualization
    /// window reload. Never mutates anything it returns — reloading must not
    /// change `message_id`, role, content, or timestamp (universal invariant 8).
    pub fn load_range(&self, conversation_id: &str, start: i64, end: i64) -> Result<Vec<PersistedMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT message_id, role, content, tool_call_id, tool_calls_json, agent_source, timestamp
             FROM messages
             WHERE conversation_id = ?1 AND message_id >= ?2 AND message_id < ?3
             ORDER BY message_id ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation_id, start, end], |row| {
                let role_str: String = row.get(1)?;
                Ok(PersistedMessage {
                    conversation_id: conversation_id.to_string(),
                    message_id: row.get(0)?,
                    role: Role::parse(&role_str).unwrap_or(Role::DisplayOnly),
                    content: row.get(2)?,
                    tool_call_id: row.get(3)?,
                    tool_calls_json: row.get(4)?,
                    agent_source: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Agent invocations ────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn create_invocation(
        &self,
        session_id: &str,
        agent_name: &str,
        parent_message_id: Option<i64>,
        task_id: Option<&str>,
    ) -> Result<AgentInvocation> {
        let conn = self.conn.lock().unwrap();
        let id = new_id();
        let now = now_iso();
        conn.execute(
            "INSERT INTO agent_invocations
                (id, session_id, agent_name, parent_message_id, task_id, started_at, status, tool_calls_made, iterations_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running', 0, 0)",
            params![id, session_id, agent_name, parent_message_id, task_id, now],
        )?;
        Ok(AgentInvocation {
            id,
            session_id: session_id.to_string(),
            agent_name: agent_name.to_string(),
            parent_message_id,
            task_id: task_id.map(str::to_string),
            started_at: now,
            ended_at: None,
            status: InvocationStatus::Running,
            result_summary: None,
            tool_calls_made: 0,
            iterations_used: 0,
        })
    }

    pub fn finish_invocation(
        &self,
        id: &str,
        status: InvocationStatus,
        result_summary: Option<&str>,
        tool_calls_made: i64,
        iterations_used: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_iso();
        let updated = conn.execute(
            "UPDATE agent_invocations
             SET status = ?2, ended_at = ?3, result_summary = ?4, tool_calls_made = ?5, iterations_used = ?6
             WHERE id = ?1",
            params![id, status.as_str(), now, result_summary, tool_calls_made, iterations_used],
        )?;
        if updated == 0 {
            return Err(ConvoError::InvocationNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn get_invocation(&self, id: &str) -> Result<AgentInvocation> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, session_id, agent_name, parent_message_id, task_id, started_at, ended_at,
                    status, result_summary, tool_calls_made, iterations_used
             FROM agent_invocations WHERE id = ?1",
            [id],
            |row| {
                let status: String = row.get(7)?;
                Ok(AgentInvocation {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    agent_name: row.get(2)?,
                    parent_message_id: row.get(3)?,
                    task_id: row.get(4)?,
                    started_at: row.get(5)?,
                    ended_at: row.get(6)?,
                    status: InvocationStatus::parse(&status).unwrap_or(InvocationStatus::Running),
                    result_summary: row.get(8)?,
                    tool_calls_made: row.get(9)?,
                    iterations_used: row.get(10)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| ConvoError::InvocationNotFound(id.to_string()))
    }

    pub fn append_agent_message(
        &self,
        invocation_id: &str,
        role: Role,
        content: &str,
        tool_call_id: Option<&str>,
    ) -> Result<AgentMessage> {
        let conn = self.conn.lock().unwrap();
        let seq: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM agent_messages WHERE invocation_id = ?1",
                [invocation_id],
                |row| row.get(0),
            )?;
        let now = now_iso();
        conn.execute(
            "INSERT INTO agent_messages (invocation_id, seq, role, content, tool_call_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![invocation_id, seq, role.as_str(), content, tool_call_id, now],
        )?;
        Ok(AgentMessage {
            invocation_id: invocation_id.to_string(),
            seq,
            role,
            content: content.to_string(),
            tool_call_id: tool_call_id.map(str::to_string),
            timestamp: now,
        })
    }

    pub fn list_agent_messages(&self, invocation_id: &str) -> Result<Vec<AgentMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seq, role, content, tool_call_id, timestamp FROM agent_messages
             WHERE invocation_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map([invocation_id], |row| {
                let role_str: String = row.get(1)?;
                Ok(AgentMessage {
                    invocation_id: invocation_id.to_string(),
                    seq: row.get(0)?,
                    role: Role::parse(&role_str).unwrap_or(Role::DisplayOnly),
                    content: row.get(2)?,
                    tool_call_id: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_occupies_index_zero() {
        let db = ConvoDb::open_in_memory().unwrap();
        let convo = db.create_conversation(None, Some("test")).unwrap();
        let sys = db
            .append_message(&convo.id, Role::System, "you are a copilot", None, None, None)
            .unwrap();
        assert_eq!(sys.message_id, 0);
    }

    #[test]
    fn message_ids_are_dense_and_increasing() {
        let db = ConvoDb::open_in_memory().unwrap();
        let convo = db.create_conversation(None, None).unwrap();
        let m0 = db.append_message(&convo.id, Role::System, "sys", None, None, None).unwrap();
        let m1 = db.append_message(&convo.id, Role::User, "hi", None, None, None).unwrap();
        let m2 = db.append_message(&convo.id, Role::Assistant, "hello", None, None, None).unwrap();
        assert_eq!([m0.message_id, m1.message_id, m2.message_id], [0, 1, 2]);
    }

    #[test]
    fn tool_message_references_earlier_assistant_call() {
        let db = ConvoDb::open_in_memory().unwrap();
        let convo = db.create_conversation(None, None).unwrap();
        db.append_message(&convo.id, Role::System, "sys", None, None, None).unwrap();
        db.append_message(
            &convo.id,
            Role::Assistant,
            "",
            None,
            Some(r#"[{"id":"call_1","name":"list_dir","arguments":"{}"}]"#),
            None,
        )
        .unwrap();
        let tool_msg = db
            .append_message(&convo.id, Role::Tool, "a.rs\nb.rs", Some("call_1"), None, None)
            .unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn load_range_round_trips_without_mutation() {
        let db = ConvoDb::open_in_memory().unwrap();
        let convo = db.create_conversation(None, None).unwrap();
        for i in 0..5 {
            db.append_message(&convo.id, Role::User, &format!("msg {i}"), None, None, None)
                .unwrap();
        }
        let range = db.load_range(&convo.id, 1, 4).unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].message_id, 1);
        assert_eq!(range[0].content, "msg 1");
        assert_eq!(range[2].message_id, 3);
    }

    #[test]
    fn message_count_matches_appended_messages() {
        let db = ConvoDb::open_in_memory().unwrap();
        let convo = db.create_conversation(None, None).unwrap();
        for i in 0..3 {
            db.append_message(&convo.id, Role::User, &format!("{i}"), None, None, None).unwrap();
        }
        assert_eq!(db.message_count(&convo.id).unwrap(), 3);
    }

    #[test]
    fn agent_invocation_lifecycle() {
        let db = ConvoDb::open_in_memory().unwrap();
        let convo = db.create_conversation(None, None).unwrap();
        let sys = db.append_message(&convo.id, Role::System, "sys", None, None, None).unwrap();
        let inv = db
            .create_invocation("session-1", "planner", Some(sys.message_id), None)
            .unwrap();
        assert_eq!(inv.status, InvocationStatus::Running);

        db.append_agent_message(&inv.id, Role::User, "plan the release", None).unwrap();
        db.append_agent_message(&inv.id, Role::Assistant, "done", None).unwrap();

        db.finish_invocation(&inv.id, InvocationStatus::Completed, Some("planned"), 2, 1)
            .unwrap();

        let reloaded = db.get_invocation(&inv.id).unwrap();
        assert_eq!(reloaded.status, InvocationStatus::Completed);
        assert_eq!(reloaded.tool_calls_made, 2);
        assert_eq!(reloaded.result_summary.as_deref(), Some("planned"));

        let messages = db.list_agent_messages(&inv.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].seq, 0);
        assert_eq!(messages[1].seq, 1);
    }

    #[test]
    fn finish_unknown_invocation_errors() {
        let db = ConvoDb::open_in_memory().unwrap();
        let err = db.finish_invocation("missing", InvocationStatus::Failed, None, 0, 0);
        assert!(matches!(err, Err(ConvoError::InvocationNotFound(_))));
    }

    #[test]
    fn get_unknown_conversation_errors() {
        let db = ConvoDb::open_in_memory().unwrap();
        assert!(matches!(db.get_conversation("nope"), Err(ConvoError::NotFound(_))));
    }
}
