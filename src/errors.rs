//! Typed error surface of the operation engine
//!
//! Conflicts are not errors: a suspended operation reports
//! [`Outcome::Conflict`] and stays resumable. Everything that *is* an error
//! falls into one of three kinds:
//!
//! - [`OperationError::Precondition`]: rejected before any state mutation
//!   (operation already in progress, nothing to continue, dirty worktree)
//! - [`OperationError::CorruptState`]: persisted operation state unreadable
//!   or internally inconsistent; requires cleanup equivalent to an abort
//! - [`OperationError::Io`]: object store or filesystem failure; durable
//!   state is left unchanged so retry or abort remain possible
//!
//! No error is ever retried automatically.

use crate::artifacts::objects::object_id::ObjectId;
use std::path::PathBuf;

/// Result of a merge, rebase or cherry-pick operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation completed and produced this commit
    Success(ObjectId),
    /// The operation is suspended on these conflicting paths
    Conflict(Vec<PathBuf>),
    /// There was nothing to do (already merged / empty todo)
    NothingToDo,
    /// The branch pointer moved without creating a commit
    FastForward(ObjectId),
    /// A replayed step produced a tree identical to its parent and the
    /// empty-commit policy requested a pause; the id is the offending commit
    EmptyCommit(ObjectId),
}

impl Outcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Outcome::Conflict(_))
    }
}

/// Failure of a merge, rebase or cherry-pick operation
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The operation was rejected before mutating any state
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Persisted operation state is unreadable or inconsistent
    #[error("corrupt operation state: {0}")]
    CorruptState(String),

    /// Object store or filesystem failure
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

pub type OperationResult = Result<Outcome, OperationError>;
