use crate::task::TaskId;

/// Failures reported by a [`RemoteStore`](crate::datastore::RemoteStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The datastore answered with a non-success HTTP status.
    #[error("remote returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response.
    #[error("remote transport failure: {0}")]
    Transport(String),

    /// The response body could not be decoded into task records.
    #[error("failed to decode remote response: {0}")]
    Decode(String),

    /// The targeted row does not exist on the remote.
    #[error("task {0} not found on remote")]
    NotFound(TaskId),

    /// The remote refused the operation for another reason.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

/// Errors surfaced by the task store and the session that owns it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Missing or malformed input, detected before any remote call.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The operation targets a task that is not in the local collection.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The session worker has stopped and no longer accepts actions.
    #[error("task session is closed")]
    SessionClosed,
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::{RemoteError, StoreError};
    use crate::task::TaskId;

    #[test]
    fn remote_errors_convert_into_store_errors() {
        let err: StoreError = RemoteError::NotFound(TaskId::new("abc")).into();
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "task abc not found on remote");
    }

    #[test]
    fn validation_helper_builds_message() {
        let err = StoreError::validation("title is required");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "validation failed: title is required");
    }
}
