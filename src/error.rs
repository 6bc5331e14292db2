//! Error types for vault-sync

use serde::Serialize;
use thiserror::Error;

/// Sync engine error types
#[derive(Error, Debug)]
pub enum SyncError {
    /// Required connection parameters are missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A key, object or path that had to exist does not.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upload, download or copy against the object store failed.
    #[error("Transfer failed for `{key}`: {message}")]
    Transfer { key: String, message: String },

    /// The history-graph engine rejected an operation.
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// A merge left unresolved paths behind.
    #[error("Merge conflict in {} path(s): {}", .0.len(), .0.join(", "))]
    MergeConflict(Vec<String>),

    #[error("Restore requires explicit confirmation")]
    RestoreNotConfirmed,

    /// Pulling would touch files with unsynced edits.
    #[error("Uncommitted changes in {} path(s): {}", .0.len(), .0.join(", "))]
    UncommittedChanges(Vec<String>),

    /// A suspended merge must be resolved or cancelled first.
    #[error("A merge is waiting for conflict resolution")]
    MergeInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl SyncError {
    /// Shorthand for building a [`SyncError::Transfer`].
    pub fn transfer(key: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Transfer {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "CONFIG_ERROR",
            SyncError::NotFound(_) => "NOT_FOUND",
            SyncError::Transfer { .. } => "TRANSFER_FAILED",
            SyncError::Git(_) => "GIT_ERROR",
            SyncError::MergeConflict(_) => "MERGE_CONFLICT",
            SyncError::RestoreNotConfirmed => "RESTORE_NOT_CONFIRMED",
            SyncError::UncommittedChanges(_) => "UNCOMMITTED_CHANGES",
            SyncError::MergeInProgress => "MERGE_IN_PROGRESS",
            SyncError::Io(_) => "IO_ERROR",
            SyncError::Serialization(_) => "SERIALIZATION_ERROR",
            SyncError::OperationFailed(_) => "OPERATION_FAILED",
        }
    }

    /// Whether this error means "the thing is absent" rather than a failure
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound(_) => true,
            SyncError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            SyncError::Git(e) => e.code() == git2::ErrorCode::NotFound,
            _ => false,
        }
    }
}

/// Serializable error response for host applications
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<&SyncError> for ErrorResponse {
    fn from(error: &SyncError) -> Self {
        let details = match error {
            SyncError::MergeConflict(paths) | SyncError::UncommittedChanges(paths) => {
                Some(paths.join("\n"))
            }
            SyncError::Transfer { key, .. } => Some(key.clone()),
            _ => None,
        };

        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

impl serde::Serialize for SyncError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ErrorResponse::from(self).serialize(serializer)
    }
}

/// Result type alias for vault-sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
