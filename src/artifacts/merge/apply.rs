//! Single-commit merge apply
//!
//! The one shared primitive behind merge, rebase and cherry-pick: applies the
//! change introduced by one commit, relative to a chosen parent tree, onto the
//! current state. Branch merge calls it with the merge base as parent, rebase
//! and cherry-pick with the replayed commit's stored parent.
//!
//! The work happens in two phases so that the same per-path decisions can be
//! materialized either into the real index + worktree, or into a synthetic
//! tree (for criss-cross merge base reduction):
//!
//! 1. [`MergeApply::plan`] compares base→ours and base→theirs and produces a
//!    [`ResolutionPlan`]: one resolution per path in the union of both change
//!    sets, in lexicographic path order.
//! 2. [`MergeApply::apply_to_worktree`] mirrors the plan into the index and
//!    working files, splitting conflicted paths into stages 1/2/3;
//!    [`MergeApply::materialize_tree`] instead builds a tree with every
//!    conflict auto-resolved (marker text kept as content).

use crate::areas::database::Database;
use crate::areas::index::Index;
use crate::areas::workspace::Workspace;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::diff::tree_diff::{ChangeSet, TreeChangeType};
use crate::artifacts::index::entry_mode::EntryMode;
use crate::artifacts::index::index_entry::{IndexEntry, Stage};
use crate::artifacts::merge::conflict::{ConflictEntry, ConflictKind};
use crate::artifacts::merge::three_way::merge_text;
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::object::Object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::Tree;
use anyhow::Context;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How a single path in the union of both change sets resolves
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    /// Take the incoming side's entry as-is
    Take(DatabaseEntry),
    /// The path ends up deleted
    Delete,
    /// A new auto-merged blob (already stored) replaces the path
    Merged(DatabaseEntry),
    /// The path stays conflicted
    Conflict {
        entry: ConflictEntry,
        /// Content to leave in the worktree; `None` keeps whatever the
        /// current (ours) state already has on disk
        worktree: Option<(Bytes, EntryMode)>,
    },
}

/// Ordered per-path resolutions for one apply
#[derive(Debug, Default)]
pub struct ResolutionPlan {
    pub(crate) items: Vec<(PathBuf, Resolution)>,
}

impl ResolutionPlan {
    /// Conflicting paths in lexicographic order
    pub fn conflict_paths(&self) -> Vec<PathBuf> {
        self.items
            .iter()
            .filter_map(|(path, resolution)| match resolution {
                Resolution::Conflict { .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_conflicts(&self) -> bool {
        self.items
            .iter()
            .any(|(_, resolution)| matches!(resolution, Resolution::Conflict { .. }))
    }

    fn push(&mut self, path: PathBuf, resolution: Resolution) {
        self.items.push((path, resolution));
    }

    fn sort(&mut self) {
        self.items.sort_by(|(a, _), (b, _)| a.cmp(b));
        // a path can be planned twice when renames collide with independent
        // adds; the earliest decision wins
        self.items.dedup_by(|(a, _), (b, _)| a == b);
    }
}

/// An exact-content rename observed on one side, keyed by its source path
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rename {
    to: PathBuf,
    entry: DatabaseEntry,
}

/// The shared per-commit apply engine
pub struct MergeApply<'r> {
    database: &'r Database,
}

impl<'r> MergeApply<'r> {
    pub fn new(database: &'r Database) -> Self {
        MergeApply { database }
    }

    /// Compute the resolution plan for merging `theirs` into `ours` relative
    /// to `base`. All three are tree-ish oids (commits or trees); a `None`
    /// base means the histories share no common ancestor content.
    pub fn plan(
        &self,
        base: Option<&ObjectId>,
        ours: &ObjectId,
        theirs: &ObjectId,
    ) -> anyhow::Result<ResolutionPlan> {
        let ours_changes = self.database.tree_diff(base, Some(ours))?.into_changes();
        let theirs_changes = self.database.tree_diff(base, Some(theirs))?.into_changes();

        let ours_renames = detect_renames(&ours_changes);
        let theirs_renames = detect_renames(&theirs_changes);

        // Destinations of theirs-side renames whose source we plainly
        // deleted: their one-sided add must not be taken, the double-delete
        // arm records the conflict at the destination instead.
        let suppressed_takes: BTreeSet<PathBuf> = theirs_renames
            .iter()
            .filter(|(source, _)| {
                matches!(
                    ours_changes.get(*source),
                    Some(TreeChangeType::Deleted(_))
                ) && !ours_renames.contains_key(*source)
            })
            .map(|(_, rename)| rename.to.clone())
            .collect();

        let mut plan = ResolutionPlan::default();

        let union: BTreeSet<&PathBuf> = ours_changes.keys().chain(theirs_changes.keys()).collect();

        for path in union {
            let ours_change = ours_changes.get(path);
            let theirs_change = theirs_changes.get(path);

            self.plan_path(
                &mut plan,
                path,
                ours_change,
                theirs_change,
                &ours_renames,
                &theirs_renames,
                &suppressed_takes,
            )?;
        }

        plan.sort();

        debug!(
            paths = plan.items.len(),
            conflicts = plan.conflict_paths().len(),
            "computed resolution plan"
        );

        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_path(
        &self,
        plan: &mut ResolutionPlan,
        path: &Path,
        ours_change: Option<&TreeChangeType>,
        theirs_change: Option<&TreeChangeType>,
        ours_renames: &HashMap<PathBuf, Rename>,
        theirs_renames: &HashMap<PathBuf, Rename>,
        suppressed_takes: &BTreeSet<PathBuf>,
    ) -> anyhow::Result<()> {
        match (ours_change, theirs_change) {
            (None, None) => Ok(()),

            // Only theirs touched the path: take their side. Rename
            // destinations whose source we deleted are recorded as conflicts
            // by the double-delete arm instead.
            (None, Some(change)) => match change {
                TreeChangeType::Added(entry) | TreeChangeType::Modified { new: entry, .. } => {
                    if suppressed_takes.contains(path) {
                        return Ok(());
                    }
                    plan.push(path.to_path_buf(), Resolution::Take(entry.clone()));
                    Ok(())
                }
                TreeChangeType::Deleted(_) => {
                    plan.push(path.to_path_buf(), Resolution::Delete);
                    Ok(())
                }
            },

            // Only ours touched the path: current state already reflects it.
            (Some(_), None) => Ok(()),

            (Some(ours), Some(theirs)) => self.plan_both_sides(
                plan,
                path,
                ours,
                theirs,
                ours_renames,
                theirs_renames,
            ),
        }
    }

    fn plan_both_sides(
        &self,
        plan: &mut ResolutionPlan,
        path: &Path,
        ours: &TreeChangeType,
        theirs: &TreeChangeType,
        ours_renames: &HashMap<PathBuf, Rename>,
        theirs_renames: &HashMap<PathBuf, Rename>,
    ) -> anyhow::Result<()> {
        // Identical outcome on both sides never conflicts.
        if ours.new_entry() == theirs.new_entry() {
            if ours.new_entry().is_none() {
                // Both deleted. If exactly one side deleted as part of a
                // rename, the rename destination becomes a conflict.
                let base = ours.old_entry().cloned();
                match (
                    rename_from(ours_renames, path),
                    rename_from(theirs_renames, path),
                ) {
                    (Some(rename), None) => {
                        plan.push(path.to_path_buf(), Resolution::Delete);
                        plan.push(
                            rename.to.clone(),
                            Resolution::Conflict {
                                entry: ConflictEntry::new(
                                    rename.to.clone(),
                                    base,
                                    Some(rename.entry.clone()),
                                    None,
                                    ConflictKind::RenameDelete,
                                ),
                                // renamed content is already checked out
                                worktree: None,
                            },
                        );
                    }
                    (None, Some(rename)) => {
                        plan.push(path.to_path_buf(), Resolution::Delete);
                        let blob = self.load_blob(&rename.entry.oid)?;
                        plan.push(
                            rename.to.clone(),
                            Resolution::Conflict {
                                entry: ConflictEntry::new(
                                    rename.to.clone(),
                                    base,
                                    None,
                                    Some(rename.entry.clone()),
                                    ConflictKind::DeleteRename,
                                ),
                                worktree: Some((
                                    blob.content().clone(),
                                    rename.entry.mode.clone(),
                                )),
                            },
                        );
                    }
                    _ => plan.push(path.to_path_buf(), Resolution::Delete),
                }
            }
            // both sides produced the same entry: ours already has it
            return Ok(());
        }

        match (ours, theirs) {
            (TreeChangeType::Deleted(base), TreeChangeType::Modified { new, .. }) => {
                let blob = self.load_blob(&new.oid)?;
                plan.push(
                    path.to_path_buf(),
                    Resolution::Conflict {
                        entry: ConflictEntry::new(
                            path.to_path_buf(),
                            Some(base.clone()),
                            None,
                            Some(new.clone()),
                            ConflictKind::DeleteModify,
                        ),
                        worktree: Some((blob.content().clone(), new.mode.clone())),
                    },
                );
                Ok(())
            }

            (TreeChangeType::Modified { new, .. }, TreeChangeType::Deleted(base)) => {
                plan.push(
                    path.to_path_buf(),
                    Resolution::Conflict {
                        entry: ConflictEntry::new(
                            path.to_path_buf(),
                            Some(base.clone()),
                            Some(new.clone()),
                            None,
                            ConflictKind::ModifyDelete,
                        ),
                        // modified content is already checked out
                        worktree: None,
                    },
                );
                Ok(())
            }

            (TreeChangeType::Added(ours_entry), TreeChangeType::Added(theirs_entry)) => {
                self.plan_add_add(plan, path, ours_entry, theirs_entry)
            }

            (
                TreeChangeType::Modified {
                    old: base_entry,
                    new: ours_entry,
                },
                TreeChangeType::Modified {
                    new: theirs_entry, ..
                },
            ) => self.plan_modify_modify(plan, path, base_entry, ours_entry, theirs_entry),

            _ => Err(anyhow::anyhow!(
                "inconsistent change pair for path {}",
                path.display()
            )),
        }
    }

    fn plan_add_add(
        &self,
        plan: &mut ResolutionPlan,
        path: &Path,
        ours_entry: &DatabaseEntry,
        theirs_entry: &DatabaseEntry,
    ) -> anyhow::Result<()> {
        let ours_blob = self.load_blob(&ours_entry.oid)?;
        let theirs_blob = self.load_blob(&theirs_entry.oid)?;

        let entry = ConflictEntry::new(
            path.to_path_buf(),
            None,
            Some(ours_entry.clone()),
            Some(theirs_entry.clone()),
            ConflictKind::AddAdd,
        );

        let worktree = match (ours_blob.as_text(), theirs_blob.as_text()) {
            (Some(ours_text), Some(theirs_text)) if !ours_blob.is_binary() => {
                // two-way merge against the empty base; differing adds always
                // leave one marker block
                let merged = merge_text("", ours_text, theirs_text);
                Some((
                    Bytes::from(merged.text.into_bytes()),
                    ours_entry.mode.clone(),
                ))
            }
            // binary: keep ours on disk
            _ => None,
        };

        plan.push(path.to_path_buf(), Resolution::Conflict { entry, worktree });
        Ok(())
    }

    fn plan_modify_modify(
        &self,
        plan: &mut ResolutionPlan,
        path: &Path,
        base_entry: &DatabaseEntry,
        ours_entry: &DatabaseEntry,
        theirs_entry: &DatabaseEntry,
    ) -> anyhow::Result<()> {
        let base_blob = self.load_blob(&base_entry.oid)?;
        let ours_blob = self.load_blob(&ours_entry.oid)?;
        let theirs_blob = self.load_blob(&theirs_entry.oid)?;

        // the mode follows whichever side changed it
        let merged_mode = if ours_entry.mode != base_entry.mode {
            ours_entry.mode.clone()
        } else {
            theirs_entry.mode.clone()
        };

        if base_blob.is_binary() || ours_blob.is_binary() || theirs_blob.is_binary() {
            plan.push(
                path.to_path_buf(),
                Resolution::Conflict {
                    entry: ConflictEntry::new(
                        path.to_path_buf(),
                        Some(base_entry.clone()),
                        Some(ours_entry.clone()),
                        Some(theirs_entry.clone()),
                        ConflictKind::BinaryModifyModify,
                    ),
                    // no textual attempt; ours stays on disk
                    worktree: None,
                },
            );
            return Ok(());
        }

        let (base_text, ours_text, theirs_text) = match (
            base_blob.as_text(),
            ours_blob.as_text(),
            theirs_blob.as_text(),
        ) {
            (Some(b), Some(o), Some(t)) => (b, o, t),
            _ => {
                plan.push(
                    path.to_path_buf(),
                    Resolution::Conflict {
                        entry: ConflictEntry::new(
                            path.to_path_buf(),
                            Some(base_entry.clone()),
                            Some(ours_entry.clone()),
                            Some(theirs_entry.clone()),
                            ConflictKind::BinaryModifyModify,
                        ),
                        worktree: None,
                    },
                );
                return Ok(());
            }
        };

        let merged = merge_text(base_text, ours_text, theirs_text);

        if merged.clean {
            let oid = self
                .database
                .store_blob(Blob::from_bytes(merged.text.into_bytes()))?;
            plan.push(
                path.to_path_buf(),
                Resolution::Merged(DatabaseEntry::new(oid, merged_mode)),
            );
        } else {
            plan.push(
                path.to_path_buf(),
                Resolution::Conflict {
                    entry: ConflictEntry::new(
                        path.to_path_buf(),
                        Some(base_entry.clone()),
                        Some(ours_entry.clone()),
                        Some(theirs_entry.clone()),
                        ConflictKind::ModifyModify,
                    ),
                    worktree: Some((Bytes::from(merged.text.into_bytes()), merged_mode)),
                },
            );
        }

        Ok(())
    }

    /// Mirror the plan into the index and working files
    ///
    /// Conflicted paths get their marker content written (when textual) and
    /// their sides recorded at stages 1/2/3. Returns the conflict entries in
    /// lexicographic path order; an empty result means full resolution.
    pub fn apply_to_worktree(
        &self,
        plan: &ResolutionPlan,
        workspace: &Workspace,
        index: &mut Index,
    ) -> anyhow::Result<Vec<ConflictEntry>> {
        let mut conflicts = Vec::new();

        for (path, resolution) in &plan.items {
            match resolution {
                Resolution::Take(entry) | Resolution::Merged(entry) => {
                    let blob = self.load_blob(&entry.oid)?;
                    workspace.write_file(path, blob.content(), &entry.mode)?;
                    let stat = workspace.stat_file(path)?;
                    index.add(IndexEntry::new(path.clone(), entry.oid.clone(), stat))?;
                }
                Resolution::Delete => {
                    workspace.remove_file(path)?;
                    index.remove(path.clone())?;
                }
                Resolution::Conflict { entry, worktree } => {
                    if let Some((content, mode)) = worktree {
                        workspace.write_file(path, content, mode)?;
                    }

                    for (stage, side) in [
                        (Stage::Base, &entry.base),
                        (Stage::Ours, &entry.ours),
                        (Stage::Theirs, &entry.theirs),
                    ] {
                        if let Some(side_entry) = side {
                            index.add_conflict_stage(IndexEntry::new_staged(
                                path.clone(),
                                side_entry.oid.clone(),
                                side_entry.mode.clone(),
                                stage,
                            ))?;
                        }
                    }

                    conflicts.push(entry.clone());
                }
            }
        }

        Ok(conflicts)
    }

    /// Build and store a synthetic tree with the plan applied on top of the
    /// `ours` tree, auto-resolving every conflict
    ///
    /// Used for criss-cross merge base reduction: conflicting text keeps its
    /// marker content, delete/modify keeps the modified side, binary keeps
    /// ours. The resulting tree is stored but never referenced by a commit.
    pub fn materialize_tree(
        &self,
        ours: &ObjectId,
        plan: &ResolutionPlan,
    ) -> anyhow::Result<ObjectId> {
        let mut entries = self.database.flatten_tree(Some(ours))?;

        for (path, resolution) in &plan.items {
            match resolution {
                Resolution::Take(entry) | Resolution::Merged(entry) => {
                    entries.insert(path.clone(), entry.clone());
                }
                Resolution::Delete => {
                    entries.remove(path);
                }
                Resolution::Conflict { entry, worktree } => match worktree {
                    Some((content, mode)) => {
                        let oid = self.database.store_blob(Blob::from_bytes(content.clone()))?;
                        entries.insert(path.clone(), DatabaseEntry::new(oid, mode.clone()));
                    }
                    None => {
                        let keep = entry.ours.as_ref().or(entry.theirs.as_ref());
                        match keep {
                            Some(side_entry) => {
                                entries.insert(path.clone(), side_entry.clone());
                            }
                            None => {
                                entries.remove(path);
                            }
                        }
                    }
                },
            }
        }

        self.store_tree(&entries)
    }

    fn store_tree(
        &self,
        entries: &BTreeMap<PathBuf, DatabaseEntry>,
    ) -> anyhow::Result<ObjectId> {
        let index_entries: Vec<IndexEntry> = entries
            .iter()
            .map(|(path, entry)| {
                IndexEntry::new_staged(
                    path.clone(),
                    entry.oid.clone(),
                    entry.mode.clone(),
                    Stage::Resolved,
                )
            })
            .collect();

        let tree = Tree::build(index_entries.iter())?;
        tree.traverse(&|subtree| self.database.store(subtree.clone()))?;

        tree.object_id()
    }

    fn load_blob(&self, oid: &ObjectId) -> anyhow::Result<Blob> {
        self.database
            .parse_object_as_blob(oid)?
            .with_context(|| format!("object {} is not a blob", oid))
    }
}

/// Detect exact-content renames within one side's change set
///
/// A rename is a deleted path whose blob oid reappears as an added path on
/// the same side. Pairing is deterministic: deleted and added paths are
/// matched in lexicographic order. Returns a map keyed by the *source* path.
fn detect_renames(changes: &ChangeSet) -> HashMap<PathBuf, Rename> {
    let mut added_by_oid: BTreeMap<&ObjectId, Vec<(&PathBuf, &DatabaseEntry)>> = BTreeMap::new();
    for (path, change) in changes {
        if let TreeChangeType::Added(entry) = change {
            added_by_oid.entry(&entry.oid).or_default().push((path, entry));
        }
    }

    let mut renames = HashMap::new();

    for (path, change) in changes {
        if let TreeChangeType::Deleted(entry) = change
            && let Some(candidates) = added_by_oid.get_mut(&entry.oid)
            && !candidates.is_empty()
        {
            let (to, added_entry) = candidates.remove(0);
            renames.insert(
                path.clone(),
                Rename {
                    to: to.clone(),
                    entry: added_entry.clone(),
                },
            );
        }
    }

    renames
}

fn rename_from<'a>(renames: &'a HashMap<PathBuf, Rename>, path: &Path) -> Option<&'a Rename> {
    renames.get(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::index::entry_mode::{EntryMode, FileMode};
    use pretty_assertions::assert_eq;

    fn oid(fill: char) -> ObjectId {
        ObjectId::try_parse(fill.to_string().repeat(40)).unwrap()
    }

    fn entry(fill: char) -> DatabaseEntry {
        DatabaseEntry::new(oid(fill), EntryMode::File(FileMode::Regular))
    }

    #[test]
    fn test_exact_rename_detected() {
        let mut changes = ChangeSet::new();
        changes.insert(
            PathBuf::from("old.txt"),
            TreeChangeType::Deleted(entry('a')),
        );
        changes.insert(PathBuf::from("new.txt"), TreeChangeType::Added(entry('a')));

        let renames = detect_renames(&changes);
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[&PathBuf::from("old.txt")].to, PathBuf::from("new.txt"));
    }

    #[test]
    fn test_content_change_is_not_a_rename() {
        let mut changes = ChangeSet::new();
        changes.insert(
            PathBuf::from("old.txt"),
            TreeChangeType::Deleted(entry('a')),
        );
        changes.insert(PathBuf::from("new.txt"), TreeChangeType::Added(entry('b')));

        assert!(detect_renames(&changes).is_empty());
    }

    #[test]
    fn test_rename_pairing_is_deterministic() {
        // two deletes and two adds of the same blob: pairing follows path order
        let mut changes = ChangeSet::new();
        changes.insert(PathBuf::from("a.txt"), TreeChangeType::Deleted(entry('a')));
        changes.insert(PathBuf::from("b.txt"), TreeChangeType::Deleted(entry('a')));
        changes.insert(PathBuf::from("x.txt"), TreeChangeType::Added(entry('a')));
        changes.insert(PathBuf::from("y.txt"), TreeChangeType::Added(entry('a')));

        let renames = detect_renames(&changes);
        assert_eq!(renames[&PathBuf::from("a.txt")].to, PathBuf::from("x.txt"));
        assert_eq!(renames[&PathBuf::from("b.txt")].to, PathBuf::from("y.txt"));
    }
}
