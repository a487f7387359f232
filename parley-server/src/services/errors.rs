use thiserror::Error;

use crate::store::StoreError;

/// Failure kinds shared by every messaging operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessagingError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Forbidden(String),
    /// Persistence fault; carries the storage layer's message unchanged.
    #[error("{0}")]
    Storage(String),
    /// Push, media or fanout provider fault.
    #[error("{0}")]
    Provider(String),
}

impl MessagingError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::Forbidden(_) => "forbidden",
            Self::Storage(_) => "storage_fault",
            Self::Provider(_) => "provider_fault",
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(message)
            | Self::Validation(message)
            | Self::Forbidden(message)
            | Self::Storage(message)
            | Self::Provider(message) => message,
        }
    }
}

impl From<StoreError> for MessagingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(message) => Self::NotFound(message),
            // Conflicts are resolved by callers that expect them; any that
            // escape are storage faults.
            StoreError::Conflict(message) | StoreError::Backend(message) => Self::Storage(message),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_text() {
        let err = MessagingError::from(StoreError::Backend("connection reset".into()));
        assert_eq!(err, MessagingError::Storage("connection reset".into()));
        assert_eq!(err.code(), "storage_fault");
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn missing_rows_map_to_not_found() {
        let err = MessagingError::from(StoreError::NotFound("thread 1 not found".into()));
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.message(), "thread 1 not found");
    }
}
