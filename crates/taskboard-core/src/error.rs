use crate::task::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("you need to be signed in to manage tasks")]
    NotAuthenticated,

    #[error("task {0} belongs to another user")]
    Forbidden(TaskId),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("store error: {0}")]
    Store(String),

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("unknown board column: {0}")]
    UnknownColumn(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),
}

impl BoardError {
    /// Store and blob failures are transient; the rest need user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, BoardError::Store(_) | BoardError::Blob(_))
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(e: serde_json::Error) -> Self {
        BoardError::Store(e.to_string())
    }
}
