//! Read-through cache over the ready queue.
//!
//! This is deliberately thin: [`TaskDb`] is the only source of truth. The
//! cache exists so hot paths (rendering the task board, picking the next
//! task for a dispatcher) don't re-run the ready-queue query on every
//! access; any write through [`TaskStore`] invalidates it immediately, and
//! a miss falls straight back to SQLite. Never persisted independently.

use std::sync::Mutex;

use crate::db::TaskDb;
use crate::error::Result;
use crate::types::{BlockerInfo, DepType, Task, TaskStatus, TaskType};

struct Cache {
    ready_ids: Vec<String>,
    valid: bool,
}

pub struct TaskStore {
    db: TaskDb,
    cache: Mutex<Cache>,
}

impl TaskStore {
    pub fn new(db: TaskDb) -> Self {
        Self { db, cache: Mutex::new(Cache { ready_ids: Vec::new(), valid: false }) }
    }

    pub fn db(&self) -> &TaskDb {
        &self.db
    }

    /// Ready-queue IDs, served from cache when valid.
    pub fn ready_queue(&self) -> Result<Vec<String>> {
        {
            let cache = self.cache.lock().unwrap();
            if cache.valid {
                return Ok(cache.ready_ids.clone());
            }
        }
        let ids = self.db.ready_queue()?;
        let mut cache = self.cache.lock().unwrap();
        cache.ready_ids = ids.clone();
        cache.valid = true;
        Ok(ids)
    }

    fn invalidate(&self) {
        self.cache.lock().unwrap().valid = false;
    }

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
        let task = self.db.create_task(title, description, priority, task_type, parent_id, labels)?;
        self.invalidate();
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.db.get_task(id)
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.db.set_status(id, status)?;
        self.invalidate();
        Ok(())
    }

    pub fn set_priority(&self, id: &str, priority: i64) -> Result<()> {
        self.db.set_priority(id, priority)?;
        self.invalidate();
        Ok(())
    }

    pub fn add_dependency(&self, src_id: &str, dst_id: &str, dep_type: DepType, weight: i64) -> Result<()> {
        self.db.add_dependency(src_id, dst_id, dep_type, weight)?;
        self.invalidate();
        Ok(())
    }

    pub fn remove_dependency(&self, src_id: &str, dst_id: &str, dep_type: DepType) -> Result<()> {
        self.db.remove_dependency(src_id, dst_id, dep_type)?;
        self.invalidate();
        Ok(())
    }

    pub fn complete_task(&self, id: &str, commit: Option<&str>) -> Result<Vec<Task>> {
        let unblocked = self.db.complete_task(id, commit)?;
        self.invalidate();
        Ok(unblocked)
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.db.delete_task(id)?;
        self.invalidate();
        Ok(())
    }

    pub fn list_blockers(&self, task_id: &str) -> Result<Vec<BlockerInfo>> {
        self.db.list_blockers(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_invalidated_on_write() {
        let store = TaskStore::new(TaskDb::open_in_memory().unwrap());
        let a = store.create_task("a", None, 100, TaskType::Task, None, &[]).unwrap();
        assert!(store.ready_queue().unwrap().contains(&a.id));

        store.set_status(&a.id, TaskStatus::InProgress).unwrap();
        assert!(!store.ready_queue().unwrap().contains(&a.id));
    }

    #[test]
    fn ready_queue_cache_hit_matches_db() {
        let store = TaskStore::new(TaskDb::open_in_memory().unwrap());
        let a = store.create_task("a", None, 50, TaskType::Task, None, &[]).unwrap();
        let first = store.ready_queue().unwrap();
        let second = store.ready_queue().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, store.db().ready_queue().unwrap());
        assert!(first.contains(&a.id));
    }
}
