use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task '{0}' not found")]
    NotFound(String),
    #[error("dependency references a task that does not exist: {0}")]
    DependencyNotFound(String),
    #[error("inserting this dependency would create a cycle in the 'blocks' graph")]
    CycleDetected,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
