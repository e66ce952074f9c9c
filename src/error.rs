use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrowdError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("database error: {0}")]
    DbError(#[from] rusqlite::Error),

    #[error("scheduler error: {0}")]
    SchedulerError(String),

    #[error("{0}")]
    GenericError(String),
}

impl CrowdError {
    pub fn generic<T: Into<String>>(message: T) -> Self {
        CrowdError::GenericError(message.into())
    }
}
