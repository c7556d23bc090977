//! SQLite-backed task dependency graph for corvid agents.
//!
//! [`TaskDb`] is the source of truth; [`TaskStore`] layers a read-through
//! ready-queue cache on top of it. [`import_export`] provides the JSONL
//! serialization an external Git-sync collaborator builds on.

mod db;
mod error;
mod import_export;
mod migrations;
mod store;
mod tx;
mod types;

pub use db::TaskDb;
pub use error::{Result, TaskError};
pub use import_export::{export_jsonl, import_jsonl_if_empty};
pub use store::TaskStore;
pub use tx::{Savepoint, Transaction};
pub use types::{BlockerInfo, DepType, Dependency, Task, TaskComment, TaskStatus, TaskType, new_task_id};
