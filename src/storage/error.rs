//! Storage layer error types.
//!
//! All errors that can occur during storage operations are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// an object digest that is not present in the object store
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the specified branch was not found
    #[error("branch not found: {0}")]
    RefNotFound(String),

    /// no entry at the given working path
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// the default branch cannot be deleted while HEAD points at it
    #[error("cannot delete the default branch: {0}")]
    ProtectedBranch(String),

    /// compare-and-swap retries exhausted under contention on one branch
    #[error("write conflict: branch {branch} was updated concurrently")]
    WriteConflict { branch: String },

    /// invalid branch name, working path, or digest string
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a commit with nothing to commit
    #[error("no changes to commit")]
    EmptyCommit,

    /// stored bytes failed to parse back into an object
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: String, reason: String },

    /// the tree entry has an unexpected type
    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// blob content is not valid UTF-8 text
    #[error("invalid utf-8 in blob: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// repository directory is missing or not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// repository directory already exists
    #[error("repository already initialized: {0}")]
    AlreadyInitialized(PathBuf),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::RefNotFound(_)
                | StorageError::PathNotFound(_)
                | StorageError::NotInitialized(_)
        )
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::BranchAlreadyExists(_)
                | StorageError::WriteConflict { .. }
                | StorageError::AlreadyInitialized(_)
        )
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::WriteConflict { .. })
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::RefNotFound("feature".to_string());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());

        let conflict = StorageError::WriteConflict {
            branch: "main".to_string(),
        };
        assert!(!conflict.is_not_found());
        assert!(conflict.is_conflict());
        assert!(conflict.is_retriable());
    }
}
