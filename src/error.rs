use thiserror::Error;

/// Failures of the persistent store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// The prerequisite graph handed to the planner has at least one cycle.
    #[error("cyclic prerequisites among chunks: {}", chunk_ids.join(", "))]
    CyclicPrerequisite { chunk_ids: Vec<String> },

    #[error("chunk '{chunk_id}' is not on any learning path for user '{user_id}'")]
    UnknownChunk { user_id: String, chunk_id: String },

    #[error("user '{user_id}' has no learning path for topic '{topic}'")]
    PathNotFound { user_id: String, topic: String },

    #[error("invalid attempt: {reason}")]
    InvalidScore { reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Store(StoreError::Sqlite(e))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
