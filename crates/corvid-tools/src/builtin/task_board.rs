// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use corvid_taskdb::{DepType, TaskStatus, TaskStore, TaskType};

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Exposes the task dependency graph to agents as a single multi-action tool,
/// mirroring `todo_write`'s "one tool, `action` dispatches the verb" shape
/// but backed by persistent storage instead of a session-scoped `Vec`.
pub struct TaskBoardTool {
    store: Arc<TaskStore>,
}

impl TaskBoardTool {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }
}

fn parse_task_type(s: Option<&str>) -> Result<TaskType, String> {
    match s {
        None => Ok(TaskType::Task),
        Some(s) => TaskType::parse(s).ok_or_else(|| format!("unknown task_type '{s}'")),
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(s).ok_or_else(|| format!("unknown status '{s}'"))
}

fn parse_dep_type(s: Option<&str>) -> Result<DepType, String> {
    match s {
        None => Ok(DepType::Blocks),
        Some(s) => DepType::parse(s).ok_or_else(|| format!("unknown dep_type '{s}'")),
    }
}

fn render_task(t: &corvid_taskdb::Task) -> String {
    let mut s = format!(
        "[{}] {} ({}, priority {}, {})",
        t.id,
        t.title,
        t.status.as_str(),
        t.priority,
        t.task_type.as_str(),
    );
    if t.blocked_by_count > 0 {
        s.push_str(&format!(" — blocked by {}", t.blocked_by_count));
    }
    if let Some(d) = &t.description {
        s.push_str(&format!("\n  {d}"));
    }
    s
}

#[async_trait]
impl Tool for TaskBoardTool {
    fn name(&self) -> &str {
        "task_board"
    }

    fn description(&self) -> &str {
        "Manage the persistent task dependency graph shared across a session.\n\n\
         ## Actions\n\
         - create: title (required), description, priority (default 100, lower runs first), \
         task_type (task|molecule|wisp, default task), parent_id, labels\n\
         - get: id — fetch one task including its comments\n\
         - list_ready: no params — IDs of tasks with no incomplete blocker, ordered by priority\n\
         - set_status: id, status (pending|in_progress|completed|blocked|cancelled)\n\
         - set_priority: id, priority\n\
         - complete: id, commit (optional) — marks completed and returns newly-unblocked tasks\n\
         - add_dependency: src_id, dst_id, dep_type (blocks|related|subtask_of|derived_from, \
         default blocks), weight (default 0) — a `blocks` edge that would create a cycle is rejected\n\
         - remove_dependency: src_id, dst_id, dep_type\n\
         - list_blockers: id — blockers of a task and whether each is completed\n\
         - comment: id, agent, content — append a note to a task's history\n\
         - delete: id\n\n\
         `wisp` tasks are scratch work: created and returned but never written to the database, \
         and do not appear in `list_ready` or `get` after creation."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": [
                        "create", "get", "list_ready", "set_status", "set_priority",
                        "complete", "add_dependency", "remove_dependency", "list_blockers",
                        "comment", "delete"
                    ]
                },
                "id": { "type": "string" },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "priority": { "type": "integer" },
                "task_type": { "type": "string", "enum": ["task", "molecule", "wisp"] },
                "parent_id": { "type": "string" },
                "labels": { "type": "array", "items": { "type": "string" } },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed", "blocked", "cancelled"]
                },
                "src_id": { "type": "string" },
                "dst_id": { "type": "string" },
                "dep_type": {
                    "type": "string",
                    "enum": ["blocks", "related", "subtask_of", "derived_from"]
                },
                "weight": { "type": "integer" },
                "commit": { "type": "string" },
                "agent": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::MatchList
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let action = match call.args.get("action").and_then(|v| v.as_str()) {
            Some(a) => a,
            None => return ToolOutput::err(&call.id, "missing 'action'"),
        };

        let str_field = |name: &str| call.args.get(name).and_then(|v| v.as_str()).map(str::to_string);
        let require_str = |name: &str| -> Result<String, String> {
            str_field(name).ok_or_else(|| format!("missing '{name}'"))
        };

        let result = match action {
            "create" => (|| -> Result<String, String> {
                let title = require_str("title")?;
                let description = str_field("description");
                let priority = call.args.get("priority").and_then(|v| v.as_i64()).unwrap_or(100);
                let task_type = parse_task_type(str_field("task_type").as_deref())?;
                let parent_id = str_field("parent_id");
                let labels: Vec<String> = call
                    .args
                    .get("labels")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let task = self
                    .store
                    .create_task(&title, description.as_deref(), priority, task_type, parent_id.as_deref(), &labels)
                    .map_err(|e| e.to_string())?;
                debug!(id = %task.id, "task_board: created task");
                Ok(render_task(&task))
            })(),

            "get" => (|| -> Result<String, String> {
                let id = require_str("id")?;
                let task = self.store.get_task(&id).map_err(|e| e.to_string())?;
                let mut out = render_task(&task);
                for c in &task.comments {
                    out.push_str(&format!("\n  [{}] {}: {}", c.timestamp, c.agent, c.content));
                }
                Ok(out)
            })(),

            "list_ready" => (|| -> Result<String, String> {
                let ids = self.store.ready_queue().map_err(|e| e.to_string())?;
                if ids.is_empty() {
                    return Ok("No ready tasks.".to_string());
                }
                Ok(ids.join("\n"))
            })(),

            "set_status" => (|| -> Result<String, String> {
                let id = require_str("id")?;
                let status = parse_status(&require_str("status")?)?;
                self.store.set_status(&id, status).map_err(|e| e.to_string())?;
                Ok(format!("{id}: status set to {}", status.as_str()))
            })(),

            "set_priority" => (|| -> Result<String, String> {
                let id = require_str("id")?;
                let priority = call
                    .args
                    .get("priority")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| "missing 'priority'".to_string())?;
                self.store.set_priority(&id, priority).map_err(|e| e.to_string())?;
                Ok(format!("{id}: priority set to {priority}"))
            })(),

            "complete" => (|| -> Result<String, String> {
                let id = require_str("id")?;
                let commit = str_field("commit");
                let unblocked = self.store.complete_task(&id, commit.as_deref()).map_err(|e| e.to_string())?;
                if unblocked.is_empty() {
                    Ok(format!("{id}: completed."))
                } else {
                    let ids: Vec<&str> = unblocked.iter().map(|t| t.id.as_str()).collect();
                    Ok(format!("{id}: completed. Newly unblocked: {}", ids.join(", ")))
                }
            })(),

            "add_dependency" => (|| -> Result<String, String> {
                let src_id = require_str("src_id")?;
                let dst_id = require_str("dst_id")?;
                let dep_type = parse_dep_type(str_field("dep_type").as_deref())?;
                let weight = call.args.get("weight").and_then(|v| v.as_i64()).unwrap_or(0);
                self.store.add_dependency(&src_id, &dst_id, dep_type, weight).map_err(|e| e.to_string())?;
                Ok(format!("{src_id} --{}--> {dst_id}", dep_type.as_str()))
            })(),

            "remove_dependency" => (|| -> Result<String, String> {
                let src_id = require_str("src_id")?;
                let dst_id = require_str("dst_id")?;
                let dep_type = parse_dep_type(str_field("dep_type").as_deref())?;
                self.store.remove_dependency(&src_id, &dst_id, dep_type).map_err(|e| e.to_string())?;
                Ok(format!("removed {src_id} --{}--> {dst_id}", dep_type.as_str()))
            })(),

            "list_blockers" => (|| -> Result<String, String> {
                let id = require_str("id")?;
                let blockers = self.store.list_blockers(&id).map_err(|e| e.to_string())?;
                if blockers.is_empty() {
                    return Ok(format!("{id} has no blockers."));
                }
                let lines: Vec<String> = blockers
                    .iter()
                    .map(|b| format!("[{}] {} ({})", b.id, b.title, if b.completed { "done" } else { "pending" }))
                    .collect();
                Ok(lines.join("\n"))
            })(),

            "comment" => (|| -> Result<String, String> {
                let id = require_str("id")?;
                let agent = require_str("agent")?;
                let content = require_str("content")?;
                self.store.db().add_comment(&id, &agent, &content).map_err(|e| e.to_string())?;
                Ok(format!("{id}: comment added"))
            })(),

            "delete" => (|| -> Result<String, String> {
                let id = require_str("id")?;
                self.store.delete_task(&id).map_err(|e| e.to_string())?;
                Ok(format!("{id}: deleted"))
            })(),

            other => Err(format!("unknown action '{other}'")),
        };

        match result {
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(msg) => ToolOutput::err(&call.id, msg),
        }
    }
}
