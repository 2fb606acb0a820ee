//! Conflict classification
//!
//! Every conflicting path is classified into a closed set of cases, so each
//! one is handled by an explicit policy rather than ad-hoc boolean checks.

use crate::artifacts::database::database_entry::DatabaseEntry;
use std::path::PathBuf;

/// The closed set of conflict cases
///
/// Rename cases are detected by exact content only: a blob deleted at one
/// path and added with an identical oid at another path on the same side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Both sides modified the same text file with overlapping hunks
    ModifyModify,
    /// Both sides modified the same binary file
    BinaryModifyModify,
    /// Both sides added the same path with different content
    AddAdd,
    /// Ours deleted while theirs modified
    DeleteModify,
    /// Ours modified while theirs deleted
    ModifyDelete,
    /// Ours renamed while theirs deleted the old path
    RenameDelete,
    /// Ours deleted the old path while theirs renamed
    DeleteRename,
}

impl ConflictKind {
    pub fn as_str(&self) -> &str {
        match self {
            ConflictKind::ModifyModify => "modify/modify",
            ConflictKind::BinaryModifyModify => "binary modify/modify",
            ConflictKind::AddAdd => "add/add",
            ConflictKind::DeleteModify => "delete/modify",
            ConflictKind::ModifyDelete => "modify/delete",
            ConflictKind::RenameDelete => "rename/delete",
            ConflictKind::DeleteRename => "delete/rename",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One conflicting path with the entries each side holds for it
///
/// An absent side records a deletion: the path exists in the other sides'
/// stages only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry {
    pub path: PathBuf,
    pub base: Option<DatabaseEntry>,
    pub ours: Option<DatabaseEntry>,
    pub theirs: Option<DatabaseEntry>,
    pub kind: ConflictKind,
}

impl ConflictEntry {
    pub fn new(
        path: PathBuf,
        base: Option<DatabaseEntry>,
        ours: Option<DatabaseEntry>,
        theirs: Option<DatabaseEntry>,
        kind: ConflictKind,
    ) -> Self {
        ConflictEntry {
            path,
            base,
            ours,
            theirs,
            kind,
        }
    }
}
