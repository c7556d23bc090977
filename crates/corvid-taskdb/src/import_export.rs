//! JSONL import/export.
//!
//! These are plumbing for an external Git-sync collaborator: the sync
//! logic itself (watching for remote changes, merging, committing) lives
//! outside this crate. What lives here is just the serialization contract
//! it builds on — one line per task, each carrying the task's outgoing
//! dependency edges so a round trip needs no second pass to stitch edges
//! together.
//!
//! On startup: if SQLite is empty, import is attempted; otherwise SQLite
//! is authoritative and import is skipped.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::db::TaskDb;
use crate::error::Result;
use crate::types::{Dependency, Task};

#[derive(Debug, Serialize, Deserialize)]
struct TaskRecord {
    task: Task,
    /// Dependency edges where this task is the source.
    outgoing: Vec<Dependency>,
}

/// Write every task, one JSON object per line, to `path`.
pub fn export_jsonl(db: &TaskDb, path: impl AsRef<Path>) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    for id in db.all_task_ids()? {
        let task = db.get_task(&id)?;
        let outgoing = db.outgoing_dependencies(&id)?;
        let record = TaskRecord { task, outgoing };
        let line = serde_json::to_string(&record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Import tasks and their outgoing edges from `path`, but only when the
/// database is currently empty. Returns the number of tasks imported, or
/// `0` (no-op) if the database already has tasks.
pub fn import_jsonl_if_empty(db: &TaskDb, path: impl AsRef<Path>) -> Result<usize> {
    if !db.is_empty()? {
        return Ok(0);
    }

    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TaskRecord = serde_json::from_str(&line)?;
        records.push(record);
    }

    // Tasks first, so every edge's endpoints already exist.
    for record in &records {
        db.insert_task_verbatim(&record.task)?;
    }
    for record in &records {
        for dep in &record.outgoing {
            db.add_dependency(&dep.src_id, &dep.dst_id, dep.dep_type, dep.weight)?;
        }
    }
    Ok(records.len())
}
