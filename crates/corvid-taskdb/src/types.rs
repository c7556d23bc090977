use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Generate a new 8-byte (16 hex char) task identifier.
pub fn new_task_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// A normal, actionable unit of work.
    Task,
    /// A container task. Never itself "ready" — only its children are.
    Molecule,
    /// Ephemeral scratch task. Never persisted to SQLite.
    Wisp,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Task => "task",
            TaskType::Molecule => "molecule",
            TaskType::Wisp => "wisp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" => Some(TaskType::Task),
            "molecule" => Some(TaskType::Molecule),
            "wisp" => Some(TaskType::Wisp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    /// The only edge type that contributes to `blocked_by_count`.
    Blocks,
    Related,
    SubtaskOf,
    DerivedFrom,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Blocks => "blocks",
            DepType::Related => "related",
            DepType::SubtaskOf => "subtask_of",
            DepType::DerivedFrom => "derived_from",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocks" => Some(DepType::Blocks),
            "related" => Some(DepType::Related),
            "subtask_of" => Some(DepType::SubtaskOf),
            "derived_from" => Some(DepType::DerivedFrom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskComment {
    pub agent: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: i64,
    pub task_type: TaskType,
    pub labels: Vec<String>,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub started_at_commit: Option<String>,
    pub completed_at_commit: Option<String>,
    /// Derived: recomputed on load and on dependency mutation. Not stored
    /// as an independent source of truth; always the count of incomplete
    /// `blocks` predecessors.
    pub blocked_by_count: i64,
    pub comments: Vec<TaskComment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub src_id: String,
    pub dst_id: String,
    pub dep_type: DepType,
    pub weight: i64,
}

/// Blocker shape used for listing — richer than the count alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockerInfo {
    pub id: String,
    pub title: String,
    pub completed: bool,
}
