use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvoError {
    #[error("conversation '{0}' not found")]
    NotFound(String),
    #[error("invocation '{0}' not found")]
    InvocationNotFound(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConvoError>;
