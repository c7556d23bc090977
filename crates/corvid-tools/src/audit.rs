// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only record of every permission decision made while dispatching
//! tool calls. Kept in-memory as a bounded ring buffer for the TUI's audit
//! view, and optionally mirrored to a JSONL file for later inspection.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::AuditDecision;

const MAX_EVENTS: usize = 50;

/// One entry in the audit trail: a tool was about to run, this is what was
/// decided about it and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub decision: AuditDecisionRecord,
    pub reason: String,
    pub user_approved: bool,
}

/// Serializable mirror of [`AuditDecision`] (which itself carries no data to
/// serialize, so we keep a matching enum here rather than derive on a
/// foreign-feeling type from another module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditDecisionRecord {
    AutoApproved,
    UserApproved,
    DeniedByPolicy,
    DeniedByUser,
    FailedValidation,
}

impl From<AuditDecision> for AuditDecisionRecord {
    fn from(d: AuditDecision) -> Self {
        match d {
            AuditDecision::AutoApproved => Self::AutoApproved,
            AuditDecision::UserApproved => Self::UserApproved,
            AuditDecision::DeniedByPolicy => Self::DeniedByPolicy,
            AuditDecision::DeniedByUser => Self::DeniedByUser,
            AuditDecision::FailedValidation => Self::FailedValidation,
        }
    }
}

/// Ring-buffered audit log, optionally mirrored to an append-only JSONL
/// file. The in-memory buffer is what the TUI renders; the file sink is
/// best-effort and never blocks dispatch on I/O failure.
pub struct AuditLog {
    events: VecDeque<AuditEvent>,
    sink_path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self { events: VecDeque::with_capacity(MAX_EVENTS), sink_path: None }
    }

    pub fn with_sink(path: impl Into<PathBuf>) -> Self {
        Self { events: VecDeque::with_capacity(MAX_EVENTS), sink_path: Some(path.into()) }
    }

    /// Record an event, evicting the oldest entry once the ring buffer is
    /// full, and append it to the JSONL sink if one is configured. A sink
    /// write failure is logged and otherwise ignored — the audit trail must
    /// never be allowed to block or fail tool dispatch.
    pub fn record(&mut self, event: AuditEvent) {
        if let Some(path) = &self.sink_path {
            if let Err(err) = append_jsonl(path, &event) {
                tracing::warn!(?err, "failed to append audit event to sink");
            }
        }
        if self.events.len() == MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn recent(&self) -> impl Iterator<Item = &AuditEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

fn append_jsonl(path: &Path, event: &AuditEvent) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tool: &str, decision: AuditDecision) -> AuditEvent {
        AuditEvent {
            timestamp: Utc::now(),
            tool: tool.into(),
            arguments: serde_json::json!({}),
            decision: decision.into(),
            reason: "test".into(),
            user_approved: matches!(decision, AuditDecision::UserApproved),
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_cap() {
        let mut log = AuditLog::new();
        for i in 0..MAX_EVENTS + 5 {
            log.record(event(&format!("tool-{i}"), AuditDecision::AutoApproved));
        }
        assert_eq!(log.len(), MAX_EVENTS);
        assert_eq!(log.recent().next().unwrap().tool, "tool-5");
    }

    #[test]
    fn sink_persists_events_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::with_sink(&path);
        log.record(event("shell", AuditDecision::UserApproved));
        log.record(event("delete_file", AuditDecision::DeniedByUser));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.tool, "shell");
        assert_eq!(first.decision, AuditDecisionRecord::UserApproved);
    }

    #[test]
    fn empty_log_reports_empty() {
        let log = AuditLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }
}
