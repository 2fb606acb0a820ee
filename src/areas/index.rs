//! Staging index
//!
//! The index tracks which files should be included in the next commit. During
//! a merge, rebase or cherry-pick it also records unresolved conflicts: a
//! conflicted path holds entries at stages 1/2/3 (base/ours/theirs) instead of
//! a stage-0 entry, and staging a resolution collapses them back to stage 0.
//!
//! ## Data Structures
//!
//! - `entries`: Maps (path, stage) pairs to their index entries
//! - `children`: Maps directory paths to their children for efficient tree operations

use crate::artifacts::index::checksum::Checksum;
use crate::artifacts::index::index_entry::{
    ENTRY_BLOCK, ENTRY_MIN_SIZE, IndexEntry, Stage,
};
use crate::artifacts::index::index_header::IndexHeader;
use crate::artifacts::index::{HEADER_SIZE, SIGNATURE, VERSION};
use crate::artifacts::objects::object::{Packable, Unpackable};
use anyhow::anyhow;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::ops::DerefMut;
use std::path::{Path, PathBuf};

type EntryKey = (Box<Path>, Stage);

/// Staging index
///
/// Tracks files staged for the next commit along with their metadata and any
/// unresolved conflict stages. Persisted to disk with a trailing checksum.
#[derive(Debug, Clone)]
pub struct Index {
    /// Path to the index file (typically `.git/index`)
    path: Box<Path>,
    /// Tracked entries mapped by (path, stage)
    entries: BTreeMap<EntryKey, IndexEntry>,
    /// Directory hierarchy for efficient parent-child lookups
    children: BTreeMap<Box<Path>, BTreeSet<Box<Path>>>,
    /// Index file header metadata
    header: IndexHeader,
    /// Flag indicating if the index has been modified since loading
    changed: bool,
}

impl Index {
    /// Create a new empty index
    pub fn new(path: Box<Path>) -> Self {
        Index {
            path,
            entries: BTreeMap::new(),
            children: BTreeMap::new(),
            header: IndexHeader::new(String::from(SIGNATURE), VERSION, 0),
            changed: false,
        }
    }

    /// Get the path to the index file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the resolved (stage 0) entry for a path
    pub fn entry_by_path(&self, path: &Path) -> Option<&IndexEntry> {
        self.entries.get(&(path.into(), Stage::Resolved))
    }

    /// Look up the entry for a path at a specific stage
    pub fn staged_entry(&self, path: &Path, stage: Stage) -> Option<&IndexEntry> {
        self.entries.get(&(path.into(), stage))
    }

    /// Clear all entries from the index
    pub fn clear(&mut self) {
        self.entries.clear();
        self.children.clear();
        self.header = IndexHeader::empty();
        self.changed = true;
    }

    /// Load the index from disk
    ///
    /// Reads the index file, parses the header and entries, and verifies
    /// the checksum. If the file doesn't exist or is empty, the index
    /// is cleared.
    ///
    /// # Locking
    ///
    /// Acquires a shared lock on the index file during reading.
    pub fn rehydrate(&mut self) -> anyhow::Result<()> {
        if !self.path().exists() {
            self.clear();
            // create the index file
            std::fs::File::create(self.path())?;
        }

        let mut index_file = std::fs::OpenOptions::new().read(true).open(self.path())?;
        let mut lock = file_guard::lock(&mut index_file, file_guard::Lock::Shared, 0, 1)?;

        self.entries.clear();
        self.children.clear();
        self.header = IndexHeader::empty();
        self.changed = false;

        // if the index file is empty, return early
        if lock.deref_mut().metadata()?.len() == 0 {
            return Ok(());
        }

        let mut reader = Checksum::new(lock);
        let entries_count = self.parse_header(&mut reader)?;
        self.parse_entries(entries_count, &mut reader)?;

        reader.verify()
    }

    /// Check if a path is tracked directly in the index at any stage
    pub fn is_directly_tracked(&self, path: &Path) -> bool {
        self.entries
            .range((path.into(), Stage::Resolved)..=(path.into(), Stage::Theirs))
            .next()
            .is_some()
            || self.children.contains_key(path)
    }

    fn parse_header(&self, reader: &mut Checksum) -> anyhow::Result<u32> {
        let header_bytes = reader.read(HEADER_SIZE)?;
        let header_reader = Cursor::new(header_bytes.clone());
        let header = IndexHeader::deserialize(header_reader)?;

        if header.marker != SIGNATURE {
            return Err(anyhow!("Invalid index file signature"));
        }

        if header.version != VERSION {
            return Err(anyhow!(
                "Unsupported index file version: {}",
                header.version
            ));
        }

        Ok(header.entries_count)
    }

    /// Parse all entries from the index file
    ///
    /// Reads each entry, handling variable-length paths with 8-byte alignment.
    fn parse_entries(&mut self, entries_count: u32, reader: &mut Checksum) -> anyhow::Result<()> {
        for _ in 0..entries_count {
            let entry_bytes = reader.read(ENTRY_MIN_SIZE)?;
            let mut entry_bytes = entry_bytes.to_vec();

            while entry_bytes[entry_bytes.len() - 1] != 0 {
                entry_bytes = [entry_bytes, reader.read(ENTRY_BLOCK)?.to_vec()].concat();
            }

            let entry_bytes = Bytes::from(entry_bytes);
            let entry_reader = Cursor::new(entry_bytes.clone());
            let entry = IndexEntry::deserialize(entry_reader)?;

            self.store_entry(&entry)?;
        }

        self.header.entries_count = entries_count;

        Ok(())
    }

    /// Remove any conflicting entries before adding a new entry
    ///
    /// Removes parent directories that might be file entries, and
    /// removes any children entries if this entry is becoming a file.
    fn discard_conflicts(&mut self, entry: &IndexEntry) -> anyhow::Result<()> {
        entry
            .parent_dirs()?
            .into_iter()
            .map(|parent| self.remove_all_stages(parent))
            .collect::<Result<Vec<_>, _>>()?;
        self.remove_children(&entry.name)
    }

    fn store_entry(&mut self, entry: &IndexEntry) -> anyhow::Result<()> {
        let entry_parents = entry
            .parent_dirs()?
            .into_iter()
            .map(|parent| parent.to_owned().into_boxed_path())
            .collect::<BTreeSet<_>>();

        self.entries.insert(
            (entry.name.clone().into_boxed_path(), entry.stage),
            entry.clone(),
        );

        for parent in entry_parents {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(entry.name.clone().into_boxed_path());
        }

        Ok(())
    }

    fn remove_children(&mut self, path_name: &Path) -> anyhow::Result<()> {
        if let Some(children) = self.children.remove(path_name) {
            for child in children {
                self.remove_all_stages(&child)?;
            }
        }

        Ok(())
    }

    fn remove_all_stages(&mut self, path_name: &Path) -> anyhow::Result<()> {
        for stage in [Stage::Resolved, Stage::Base, Stage::Ours, Stage::Theirs] {
            if let Some(entry) = self.entries.remove(&(path_name.into(), stage)) {
                self.unlink_from_children(&entry, path_name);
            }
        }

        Ok(())
    }

    fn unlink_from_children(&mut self, entry: &IndexEntry, path_name: &Path) {
        if let Ok(parents) = entry.parent_dirs() {
            parents
                .into_iter()
                .map(|parent| parent.to_owned().into_boxed_path())
                .for_each(|parent| {
                    if let Some(children) = self.children.get_mut(&parent) {
                        children.remove(path_name);
                        if children.is_empty() {
                            self.children.remove(&parent);
                        }
                    }
                });
        }
    }

    /// Stage a resolved (stage 0) entry
    ///
    /// Staging a resolution clears any conflict stages held for the path.
    pub fn add(&mut self, entry: IndexEntry) -> anyhow::Result<()> {
        self.discard_conflicts(&entry)?;
        self.clear_conflict_stages(&entry.name);
        self.store_entry(&entry)?;

        self.header.entries_count = self.entries.len() as u32;
        self.changed = true;

        Ok(())
    }

    /// Record one side of an unresolved conflict
    ///
    /// Inserting any conflict stage removes the resolved entry for the path:
    /// the two may never coexist.
    pub fn add_conflict_stage(&mut self, entry: IndexEntry) -> anyhow::Result<()> {
        anyhow::ensure!(
            entry.stage.is_conflicted(),
            "conflict entries must carry a non-zero stage"
        );

        if let Some(resolved) = self
            .entries
            .remove(&(entry.name.clone().into_boxed_path(), Stage::Resolved))
        {
            self.unlink_from_children(&resolved, &resolved.name.clone());
        }

        self.store_entry(&entry)?;

        self.header.entries_count = self.entries.len() as u32;
        self.changed = true;

        Ok(())
    }

    fn clear_conflict_stages(&mut self, path: &Path) {
        for stage in [Stage::Base, Stage::Ours, Stage::Theirs] {
            if let Some(entry) = self.entries.remove(&(path.into(), stage)) {
                self.unlink_from_children(&entry, path);
            }
        }
    }

    /// Remove a path from the index (all stages)
    pub fn remove(&mut self, path: PathBuf) -> anyhow::Result<()> {
        self.remove_all_stages(&path)?;
        self.remove_children(&path)?;

        self.header.entries_count = self.entries.len() as u32;
        self.changed = true;

        Ok(())
    }

    /// Write the index back to disk under an exclusive lock
    pub fn write_updates(&mut self) -> anyhow::Result<()> {
        let mut index_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path())?;
        let lock = file_guard::lock(&mut index_file, file_guard::Lock::Exclusive, 0, 1)?;

        let mut writer = Checksum::new(lock);

        self.header = IndexHeader {
            entries_count: self.entries.len() as u32,
            ..self.header.clone()
        };
        let header_bytes = self.header.serialize()?;
        writer.write(&header_bytes)?;

        for entry in self.entries() {
            let entry_bytes = entry.serialize()?;
            writer.write(&entry_bytes)?;
        }

        writer.write_checksum()?;
        self.changed = false;

        Ok(())
    }

    /// All entries in (path, stage) order
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Resolved entries only, in path order
    pub fn stage0_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries
            .values()
            .filter(|entry| entry.stage == Stage::Resolved)
    }

    /// Paths holding unresolved conflict stages, in lexicographic order
    pub fn conflict_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .values()
            .filter(|entry| entry.stage.is_conflicted())
            .map(|entry| entry.name.clone())
            .collect();
        paths.dedup();

        paths
    }

    /// Whether any stage>0 entries remain
    pub fn has_conflicts(&self) -> bool {
        self.entries
            .values()
            .any(|entry| entry.stage.is_conflicted())
    }

    /// All distinct tracked paths, at any stage
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .values()
            .map(|entry| entry.name.clone())
            .collect();
        paths.dedup();

        paths
    }
}
