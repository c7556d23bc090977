//! Persisted conversation store for corvid: conversations, messages, and
//! sub-agent invocation histories, plus the two in-memory coordinators that
//! sit in front of it — the message virtualization window and the
//! pending-input queue.
//!
//! [`ConvoDb`] is authoritative; [`virtualization::VirtualWindow`] and
//! [`queue::PendingQueue`] never hold message content of their own beyond
//! what a caller hands them — they coordinate *what's loaded* and *what's
//! queued*, not a second copy of the truth.

mod db;
mod error;
mod migrations;
pub mod queue;
pub mod virtualization;
mod types;

pub use db::ConvoDb;
pub use error::{ConvoError, Result};
pub use queue::{DrainAction, PendingEntry, PendingQueue};
pub use types::{
    new_id, AgentInvocation, AgentMessage, Conversation, InvocationStatus, PersistedMessage, Role,
};
pub use virtualization::VirtualWindow;
