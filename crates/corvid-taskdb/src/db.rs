use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{Result, TaskError};
use crate::migrations::run_migrations;
use crate::tx::Transaction;
use crate::types::{BlockerInfo, DepType, Task, TaskComment, TaskStatus, TaskType, new_task_id};

/// SQLite-backed task dependency graph.
///
/// Authoritative state lives here; [`crate::store::TaskStore`] is a
/// read-through cache over the ready queue only and is never a second
/// source of truth.
pub struct TaskDb {
    conn: Mutex<Connection>,
}

impl TaskDb {
    /// Open (creating if necessary) the task database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        Self::init(conn, path)
    }

    /// Open an in-memory database. Used by tests and by embedders that do
    /// not want on-disk persistence.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, Path::new(":memory:"))
    }

    fn init(conn: Connection, path: &Path) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        run_migrations(&conn)?;
        debug!(path = %path.display(), "corvid-taskdb: opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Default on-disk location: `<cwd>/.corvid-tasks/tasks.db`.
    pub fn default_path(cwd: &Path) -> PathBuf {
        cwd.join(".corvid-tasks").join("tasks.db")
    }

    pub fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self.conn.lock().unwrap();
        Transaction::begin(guard)
    }

    // ── Task CRUD ────────────────────────────────────────────────────────

    /// Create a task. `wisp` tasks are never written to SQLite — they are
    /// handed back as a fully-formed in-memory [`Task`] for the caller
    /// (typically [`crate::store::TaskStore`]) to hold for the session.
    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        title: &str,
        description: Option<&str>,
        priority: i64,
        task_type: TaskType,
        parent_id: Option<&str>,
        labels: &[String],
    ) -> Result<Task> {
        let id = new_task_id();
        let now = now_iso();
        let labels_json = serde_json::to_string(labels).unwrap_or_else(|_| "[]".into());

        let task = Task {
            id: id.clone(),
            title: title.to_string(),
            description: description.map(|d| d.to_string()),
            status: TaskStatus::Pending,
            priority,
            task_type,
            labels: labels.to_vec(),
            parent_id: parent_id.map(|p| p.to_string()),
            created_at: now.clone(),
            updated_at: now.clone(),
            completed_at: None,
            started_at_commit: None,
            completed_at_commit: None,
            blocked_by_count: 0,
            comments: Vec::new(),
        };

        if task_type == TaskType::Wisp {
            debug!(id = %id, "corvid-taskdb: wisp task created in-memory only");
            return Ok(task);
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, title, description, status, priority, task_type, labels,
                                 parent_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id, title, description, TaskStatus::Pending.as_str(), priority,
                task_type.as_str(), labels_json, parent_id, now,
            ],
        )?;
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        let conn = self.conn.lock().unwrap();
        load_task(&conn, id)
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_iso();
        let completed_at = if status == TaskStatus::Completed { Some(now.clone()) } else { None };
        let n = conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2, completed_at = COALESCE(?3, completed_at)
             WHERE id = ?4",
            params![status.as_str(), now, completed_at, id],
        )?;
        if n == 0 {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_priority(&self, id: &str, priority: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET priority = ?1, updated_at = ?2 WHERE id = ?3",
            params![priority, now_iso(), id],
        )?;
        if n == 0 {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, now_iso(), id],
        )?;
        if n == 0 {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_labels(&self, id: &str, labels: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let labels_json = serde_json::to_string(labels).unwrap_or_else(|_| "[]".into());
        let n = conn.execute(
            "UPDATE tasks SET labels = ?1, updated_at = ?2 WHERE id = ?3",
            params![labels_json, now_iso(), id],
        )?;
        if n == 0 {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn add_comment(&self, task_id: &str, agent: &str, content: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO task_comments (task_id, agent, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, agent, content, now_iso()],
        )?;
        Ok(())
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // ── Dependencies ─────────────────────────────────────────────────────

    /// Insert a dependency edge `src -> dst`. For `dep_type = Blocks`,
    /// rejects the edge with [`TaskError::CycleDetected`] if `dst` already
    /// has a `blocks`-edge path back to `src`.
    pub fn add_dependency(
        &self,
        src_id: &str,
        dst_id: &str,
        dep_type: DepType,
        weight: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        task_exists(&conn, src_id)?;
        task_exists(&conn, dst_id)?;

        if dep_type == DepType::Blocks && path_exists(&conn, dst_id, src_id)? {
            return Err(TaskError::CycleDetected);
        }

        conn.execute(
            "INSERT OR IGNORE INTO task_dependencies (src_id, dst_id, dep_type, weight)
             VALUES (?1, ?2, ?3, ?4)",
            params![src_id, dst_id, dep_type.as_str(), weight],
        )?;
        Ok(())
    }

    pub fn remove_dependency(&self, src_id: &str, dst_id: &str, dep_type: DepType) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM task_dependencies WHERE src_id = ?1 AND dst_id = ?2 AND dep_type = ?3",
            params![src_id, dst_id, dep_type.as_str()],
        )?;
        Ok(())
    }

    /// Blockers of `task_id` in listing shape: `{id, title, completed}`.
    pub fn list_blockers(&self, task_id: &str) -> Result<Vec<BlockerInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT b.id, b.title, b.status
             FROM task_dependencies d
             JOIN tasks b ON d.src_id = b.id
             WHERE d.dst_id = ?1 AND d.dep_type = 'blocks'",
        )?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                let status: String = row.get(2)?;
                Ok(BlockerInfo {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    completed: status == TaskStatus::Completed.as_str(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count-only shape, used to refresh `blocked_by_count`.
    pub fn blocked_by_count(&self, task_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        blocked_by_count_inner(&conn, task_id)
    }

    // ── Ready queue ──────────────────────────────────────────────────────

    /// IDs of tasks ready to run: `pending`, not a `molecule`, and with no
    /// incomplete `blocks` predecessor. Computed in SQL, not in-memory.
    pub fn ready_queue(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM tasks t
             WHERE status = 'pending'
               AND task_type != 'molecule'
               AND NOT EXISTS (
                 SELECT 1 FROM task_dependencies d
                 JOIN tasks b ON d.src_id = b.id
                 WHERE d.dst_id = t.id AND d.dep_type = 'blocks'
                   AND b.status != 'completed'
               )
             ORDER BY priority ASC, created_at ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Mark `id` completed and return the tasks newly unblocked by this
    /// completion — those `id` directly blocks, where no other incomplete
    /// blocker remains.
    pub fn complete_task(&self, id: &str, commit: Option<&str>) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = (|| -> Result<Vec<Task>> {
            let now = now_iso();
            let n = conn.execute(
                "UPDATE tasks SET status = 'completed', updated_at = ?1, completed_at = ?1,
                                   completed_at_commit = ?2
                 WHERE id = ?3",
                params![now, commit, id],
            )?;
            if n == 0 {
                return Err(TaskError::NotFound(id.to_string()));
            }

            let mut stmt = conn.prepare(
                "SELECT DISTINCT d.dst_id FROM task_dependencies d
                 WHERE d.src_id = ?1 AND d.dep_type = 'blocks'
                   AND NOT EXISTS (
                     SELECT 1 FROM task_dependencies d2
                     JOIN tasks b ON d2.src_id = b.id
                     WHERE d2.dst_id = d.dst_id AND d2.dep_type = 'blocks'
                       AND b.status != 'completed'
                   )",
            )?;
            let newly_unblocked_ids: Vec<String> = stmt
                .query_map(params![id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut tasks = Vec::with_capacity(newly_unblocked_ids.len());
            for uid in newly_unblocked_ids {
                tasks.push(load_task(&conn, &uid)?);
            }
            Ok(tasks)
        })();

        match &result {
            Ok(_) => conn.execute_batch("COMMIT")?,
            Err(_) => { let _ = conn.execute_batch("ROLLBACK"); }
        }
        result
    }

    // ── Session state ────────────────────────────────────────────────────

    /// Restore the persisted session id, or create a new one. The single
    /// `session_state` row is created on first use (`id = 1` per its CHECK
    /// constraint).
    pub fn restore_or_create_session(&self, new_session_id: impl FnOnce() -> String) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row("SELECT session_id FROM session_state WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        if let Some(sid) = existing {
            return Ok(sid);
        }
        let sid = new_session_id();
        conn.execute(
            "INSERT INTO session_state (id, session_id, started_at) VALUES (1, ?1, ?2)",
            params![sid, now_iso()],
        )?;
        Ok(sid)
    }

    /// Set the current task, opportunistically validating it still exists.
    /// A dangling reference is cleared rather than propagated as an error.
    pub fn set_current_task(&self, task_id: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let valid = match task_id {
            Some(id) => task_exists(&conn, id).is_ok(),
            None => true,
        };
        let to_store = if valid { task_id } else {
            warn!(id = ?task_id, "corvid-taskdb: current_task_id no longer exists, clearing");
            None
        };
        conn.execute(
            "UPDATE session_state SET current_task_id = ?1 WHERE id = 1",
            params![to_store],
        )?;
        Ok(())
    }

    pub fn current_task(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<String> = conn
            .query_row("SELECT current_task_id FROM session_state WHERE id = 1", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(id)
    }

    // ── Bulk access (import/export) ─────────────────────────────────────

    pub fn is_empty(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?;
        Ok(count == 0)
    }

    pub fn all_task_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM tasks ORDER BY created_at ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn outgoing_dependencies(&self, task_id: &str) -> Result<Vec<crate::types::Dependency>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT src_id, dst_id, dep_type, weight FROM task_dependencies WHERE src_id = ?1",
        )?;
        let deps = stmt
            .query_map(params![task_id], |row| {
                let dep_type: String = row.get(2)?;
                Ok(crate::types::Dependency {
                    src_id: row.get(0)?,
                    dst_id: row.get(1)?,
                    dep_type: DepType::parse(&dep_type).unwrap_or(DepType::Related),
                    weight: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    /// Insert a task exactly as given, preserving its id and timestamps.
    /// Used by JSONL import, which restores a prior export rather than
    /// minting new tasks.
    pub fn insert_task_verbatim(&self, task: &Task) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let labels_json = serde_json::to_string(&task.labels).unwrap_or_else(|_| "[]".into());
        conn.execute(
            "INSERT OR REPLACE INTO tasks
                (id, title, description, status, priority, task_type, labels, parent_id,
                 created_at, updated_at, completed_at, started_at_commit, completed_at_commit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                task.id, task.title, task.description, task.status.as_str(), task.priority,
                task.task_type.as_str(), labels_json, task.parent_id, task.created_at,
                task.updated_at, task.completed_at, task.started_at_commit, task.completed_at_commit,
            ],
        )?;
        for comment in &task.comments {
            conn.execute(
                "INSERT INTO task_comments (task_id, agent, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![task.id, comment.agent, comment.content, comment.timestamp],
            )?;
        }
        Ok(())
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn task_exists(conn: &Connection, id: &str) -> Result<()> {
    let exists: bool = conn
        .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![id], |_| Ok(true))
        .optional()?
        .unwrap_or(false);
    if exists {
        Ok(())
    } else {
        Err(TaskError::DependencyNotFound(id.to_string()))
    }
}

fn blocked_by_count_inner(conn: &Connection, task_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM task_dependencies d
         JOIN tasks b ON d.src_id = b.id
         WHERE d.dst_id = ?1 AND d.dep_type = 'blocks' AND b.status != 'completed'",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// DFS over `blocks` edges (`src_id -> dst_id`) starting at `from`; returns
/// true if `to` is reachable. Used for cycle detection before inserting a
/// new `blocks` edge.
fn path_exists(conn: &Connection, from: &str, to: &str) -> Result<bool> {
    if from == to {
        return Ok(true);
    }
    let mut stack = vec![from.to_string()];
    let mut seen = std::collections::HashSet::new();
    seen.insert(from.to_string());

    let mut stmt = conn.prepare("SELECT dst_id FROM task_dependencies WHERE src_id = ?1 AND dep_type = 'blocks'")?;
    while let Some(current) = stack.pop() {
        let next_ids: Vec<String> = stmt
            .query_map(params![current], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for next in next_ids {
            if next == to {
                return Ok(true);
            }
            if seen.insert(next.clone()) {
                stack.push(next);
            }
        }
    }
    Ok(false)
}

fn load_task(conn: &Connection, id: &str) -> Result<Task> {
    let row = conn
        .query_row(
            "SELECT id, title, description, status, priority, task_type, labels, parent_id,
                    created_at, updated_at, completed_at, started_at_commit, completed_at_commit
             FROM tasks WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, Option<String>>(12)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

    let (id, title, description, status, priority, task_type, labels_json, parent_id,
         created_at, updated_at, completed_at, started_at_commit, completed_at_commit) = row;

    let labels: Vec<String> = serde_json::from_str(&labels_json).unwrap_or_default();

    let mut stmt = conn.prepare(
        "SELECT agent, content, timestamp FROM task_comments WHERE task_id = ?1 ORDER BY timestamp ASC",
    )?;
    let comments = stmt
        .query_map(params![id], |row| {
            Ok(TaskComment { agent: row.get(0)?, content: row.get(1)?, timestamp: row.get(2)? })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let blocked_by_count = blocked_by_count_inner(conn, &id)?;

    Ok(Task {
        id,
        title,
        description,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        priority,
        task_type: TaskType::parse(&task_type).unwrap_or(TaskType::Task),
        labels,
        parent_id,
        created_at,
        updated_at,
        completed_at,
        started_at_commit,
        completed_at_commit,
        blocked_by_count,
        comments,
    })
}
