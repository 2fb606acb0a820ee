//! References (branches, HEAD)
//!
//! References are human-readable names pointing to commits:
//! - Direct: Containing a commit SHA-1
//! - Symbolic: Pointing to another reference (e.g., HEAD -> refs/heads/main)
//!
//! HEAD may also be detached: holding a raw commit hash while a rebase is
//! replaying steps.
//!
//! ## File Format
//!
//! References are stored as text files containing either:
//! - A 40-character SHA-1 hash (direct reference)
//! - `ref: <path>` for symbolic references

use crate::artifacts::branch::branch_name::{BranchName, SymRefName};
use crate::artifacts::objects::object_id::ObjectId;
use anyhow::Context;
use derive_new::new;
use file_guard::Lock;
use std::io::Write;
use std::ops::DerefMut;
use std::path::Path;
use walkdir::WalkDir;

/// References manager
///
/// Handles reading and writing references (branches, HEAD).
/// Provides safe concurrent access through file locking.
#[derive(Debug, new)]
pub struct Refs {
    /// Path to the refs directory (typically `.git`)
    path: Box<Path>,
}

/// Regex pattern for parsing symbolic references
const SYMREF_REGEX: &str = r"^ref: (.+)$";

/// Name of the HEAD reference
pub const HEAD_REF_NAME: &str = "HEAD";

/// Internal representation of a reference value
#[derive(Debug, Clone)]
enum SymRefOrOid {
    /// Symbolic reference pointing to another ref
    SymRef { sym_ref_name: SymRefName },
    /// Direct object ID
    Oid(ObjectId),
}

impl SymRefOrOid {
    fn read_symref_or_oid(path: &Path) -> anyhow::Result<Option<SymRefOrOid>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let content = content.trim();

        if content.is_empty() {
            return Ok(None);
        }

        let symref_match = regex::Regex::new(SYMREF_REGEX)?.captures(content);
        if let Some(symref_match) = symref_match {
            Ok(Some(SymRefOrOid::SymRef {
                sym_ref_name: SymRefName::new(symref_match[1].to_string()),
            }))
        } else {
            Ok(Some(SymRefOrOid::Oid(ObjectId::try_parse(
                content.to_string(),
            )?)))
        }
    }
}

impl Refs {
    /// Read the object ID that a symbolic reference points to
    pub fn read_oid(&self, sym_ref_name: &SymRefName) -> anyhow::Result<Option<ObjectId>> {
        self.read_symref(self.path.join(sym_ref_name.as_ref_path()).as_path())
    }

    /// Get the current symbolic reference
    ///
    /// Follows symbolic references recursively to find the final direct
    /// reference. For example, if HEAD points to refs/heads/main, returns
    /// refs/heads/main. For a detached HEAD, returns HEAD itself.
    pub fn current_ref(&self, source: Option<SymRefName>) -> anyhow::Result<SymRefName> {
        let source = source.unwrap_or_else(|| SymRefName::new(HEAD_REF_NAME.to_string()));

        let ref_content =
            SymRefOrOid::read_symref_or_oid(self.path.join(source.as_ref_path()).as_path())?;

        match ref_content {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => Ok(self.current_ref(Some(sym_ref_name))?),
            Some(_) | None => Ok(source),
        }
    }

    /// Name of the branch HEAD is attached to, if it is attached
    pub fn current_branch(&self) -> anyhow::Result<Option<BranchName>> {
        let current_ref = self.current_ref(None)?;

        if current_ref.is_detached_head() {
            return Ok(None);
        }

        Ok(Some(BranchName::try_parse_sym_ref_name(&current_ref)?))
    }

    /// Read a symbolic reference, following indirection
    fn read_symref(&self, path: &Path) -> anyhow::Result<Option<ObjectId>> {
        let ref_content = SymRefOrOid::read_symref_or_oid(path)?;

        match ref_content {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => {
                self.read_symref(self.path.join(sym_ref_name.as_ref_path()).as_path())
            }
            Some(SymRefOrOid::Oid(oid)) => Ok(Some(oid)),
            None => Ok(None),
        }
    }

    /// Update a symbolic reference to point to a new commit
    ///
    /// Handles both direct and indirect references, following the chain
    /// and updating the final target.
    ///
    /// # Locking
    ///
    /// Acquires exclusive lock on the reference file during update.
    fn update_symref(&self, path: &Path, oid: ObjectId) -> anyhow::Result<()> {
        // a branch ref that does not exist yet (first commit) is simply created
        if !path.exists() {
            return self.update_ref_file(path.to_path_buf().into_boxed_path(), oid.as_ref().into());
        }

        let mut ref_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open ref file at {:?}", path))?;
        let mut lock = file_guard::lock(&mut ref_file, Lock::Exclusive, 0, 1)?;

        let ref_content = SymRefOrOid::read_symref_or_oid(path)?;

        match ref_content {
            Some(SymRefOrOid::SymRef { sym_ref_name }) => {
                let target_path = self.path.join(sym_ref_name.as_ref_path());
                self.update_symref(target_path.as_path(), oid)
            }
            Some(SymRefOrOid::Oid(_)) | None => {
                lock.deref_mut().set_len(0)?;
                lock.deref_mut().write_all(oid.as_ref().as_bytes())?;
                Ok(())
            }
        }
    }

    /// Move HEAD (following its symref chain when attached)
    pub fn update_head(&self, oid: ObjectId) -> anyhow::Result<()> {
        self.update_symref(self.head_path().as_ref(), oid)
    }

    pub fn read_head(&self) -> anyhow::Result<Option<ObjectId>> {
        self.read_symref(&self.head_path())
    }

    /// Detach HEAD at the given commit
    ///
    /// Writes the raw oid into HEAD; the previously attached branch ref is
    /// left untouched.
    pub fn detach_head(&self, oid: &ObjectId) -> anyhow::Result<()> {
        self.update_ref_file(self.head_path(), oid.as_ref().to_string())
    }

    /// Attach HEAD to a branch
    pub fn set_head_symbolic(&self, branch_name: &BranchName) -> anyhow::Result<()> {
        self.update_ref_file(
            self.head_path(),
            format!("ref: {}", branch_name.to_sym_ref_name().as_ref_path()),
        )
    }

    pub fn update_ref_file(&self, path: Box<Path>, raw_ref: String) -> anyhow::Result<()> {
        // create all the parent directories if they don't exist
        std::fs::create_dir_all(path.parent().with_context(|| {
            format!(
                "failed to create parent directories for ref file at {:?}",
                path
            )
        })?)?;

        // open the ref file as WRONLY and CREAT to write commit_id to it
        let mut ref_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.clone())
            .with_context(|| format!("failed to open ref file at {:?}", path))?;
        let mut lock = file_guard::lock(&mut ref_file, Lock::Exclusive, 0, 1)?;
        lock.deref_mut().write_all(raw_ref.as_bytes())?;

        Ok(())
    }

    /// Read a branch ref to its commit oid
    pub fn read_ref(&self, branch_name: &BranchName) -> anyhow::Result<Option<ObjectId>> {
        let ref_path = self.heads_path().join(branch_name.as_ref());
        if !ref_path.exists() {
            anyhow::bail!("branch {} not found", branch_name);
        }

        self.read_symref(&ref_path)
    }

    /// Move a branch ref to a new commit
    pub fn update_branch(&self, branch_name: &BranchName, oid: &ObjectId) -> anyhow::Result<()> {
        let branch_path = self.heads_path().join(branch_name.as_ref()).into_boxed_path();
        self.update_ref_file(branch_path, oid.as_ref().to_string())
    }

    pub fn create_branch(&self, name: &BranchName, source_oid: ObjectId) -> anyhow::Result<()> {
        let branch_path = self.heads_path().join(name.as_ref()).into_boxed_path();

        // check whether another branch with the same name already exists
        if branch_path.exists() {
            anyhow::bail!("branch {} already exists", name);
        }

        self.update_ref_file(branch_path, source_oid.as_ref().into())
    }

    pub fn list_branches(&self) -> anyhow::Result<Vec<SymRefName>> {
        Ok(WalkDir::new(self.heads_path().as_ref())
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                if entry.path().is_file() {
                    let relative_path = entry.path().strip_prefix(self.path.as_ref()).ok()?;
                    Some(SymRefName::new(relative_path.to_string_lossy().to_string()))
                } else {
                    None
                }
            })
            .collect::<Vec<_>>())
    }

    pub fn head_path(&self) -> Box<Path> {
        self.path.join(HEAD_REF_NAME).into_boxed_path()
    }

    pub fn refs_path(&self) -> Box<Path> {
        self.path.join("refs").into_boxed_path()
    }

    pub fn heads_path(&self) -> Box<Path> {
        self.refs_path().join("heads").into_boxed_path()
    }
}
