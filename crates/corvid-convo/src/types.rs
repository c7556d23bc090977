use serde::{Deserialize, Serialize};

/// Conversation-message roles. Distinct from `corvid_model::Role` — this is
/// the persisted/rendered superset, including `display_only` messages that
/// never reach the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    DisplayOnly,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::DisplayOnly => "display_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            "display_only" => Some(Role::DisplayOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A message as persisted by [`crate::db::ConvoDb`].
///
/// `message_id` is monotonic per conversation and stable across
/// virtualization: evicting a message from memory and reloading it by range
/// never changes its id, role, content, or timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub conversation_id: String,
    pub message_id: i64,
    pub role: Role,
    pub content: String,
    /// Non-null iff `role = tool`; references an assistant message's tool
    /// call id earlier in the same conversation.
    pub tool_call_id: Option<String>,
    /// JSON-encoded `[{id, name, arguments}]` for assistant messages that
    /// requested tool calls. Not persisted as a relational shape — spec.md
    /// §3.1 notes tool calls are "reconstructed from context when replayed",
    /// so this is kept as an opaque blob rather than normalized.
    pub tool_calls_json: Option<String>,
    /// Name of the sub-agent that produced this message, or `None` for
    /// main-conversation messages.
    pub agent_source: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Running,
    Completed,
    Failed,
}

impl InvocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStatus::Running => "running",
            InvocationStatus::Completed => "completed",
            InvocationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(InvocationStatus::Running),
            "completed" => Some(InvocationStatus::Completed),
            "failed" => Some(InvocationStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub id: String,
    pub session_id: String,
    pub agent_name: String,
    pub parent_message_id: Option<i64>,
    pub task_id: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: InvocationStatus,
    pub result_summary: Option<String>,
    pub tool_calls_made: i64,
    pub iterations_used: i64,
}

/// One message in a sub-agent invocation's own history. Mirrors
/// [`PersistedMessage`] minus the display/renderer-facing fields, which
/// belong to the invocation's own conversation rather than the main one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub invocation_id: String,
    pub seq: i64,
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub timestamp: String,
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
