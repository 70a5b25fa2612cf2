//! Error taxonomy shared by the repository, the service and the command
//! surface.
//!
//! Recurrence matching and effective-date resolution are total and never
//! produce one of these.

use daybreak_shared::TaskId;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed date/time string, empty title, empty weekday set and
    /// similar caller mistakes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Underlying store failure; surfaced to the caller, never retried.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage failure: {0}")]
    StorageIo(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
