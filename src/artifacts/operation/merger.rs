//! Branch merge orchestrator
//!
//! Computes the merge base (reducing criss-cross ancestries to a synthetic
//! base tree), runs the shared per-commit apply, and either commits the
//! result with two parents or suspends on the conflicting paths.

use crate::areas::database::CommitCache;
use crate::areas::repository::Repository;
use crate::artifacts::merge::apply::MergeApply;
use crate::artifacts::merge::bca_finder::BCAFinder;
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::operation::state::{
    OperationInProgress, OperationKind, OperationState, TodoStep,
};
use crate::errors::{OperationError, OperationResult, Outcome};
use tracing::{debug, warn};

/// Criss-cross ancestries deeper than this are declared degenerate
const MAX_BASE_RECURSION: usize = 16;

/// Options for a branch merge
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Merge commit summary; defaults to `Merge branch '<source>'`
    pub message: Option<String>,
    /// Merge commit body
    pub description: Option<String>,
    /// Move the branch pointer without a commit when possible
    pub allow_fast_forward: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            message: None,
            description: None,
            allow_fast_forward: true,
        }
    }
}

/// Merges a source branch into the current branch
pub struct Merger<'r> {
    repository: &'r Repository,
}

impl<'r> Merger<'r> {
    pub fn new(repository: &'r Repository) -> Self {
        Merger { repository }
    }

    /// True iff the target tip is a graph ancestor of the source tip
    ///
    /// `target` defaults to HEAD.
    pub fn can_fast_forward(
        &self,
        source: &str,
        target: Option<&str>,
    ) -> Result<bool, OperationError> {
        let source_oid = self.repository.resolve(source)?;
        let target_oid = match target {
            Some(target) => self.repository.resolve(target)?,
            None => self.repository.head_oid()?.ok_or_else(|| {
                OperationError::Precondition("current branch has no commits".to_string())
            })?,
        };

        let cache = CommitCache::new();
        let database = self.repository.database();
        let finder = BCAFinder::new(|oid: &ObjectId| cache.get_or_load(database, oid));

        Ok(finder.is_ancestor(&target_oid, &source_oid)?)
    }

    /// Merge the source branch tip into HEAD
    pub fn merge(&self, source: &str, options: MergeOptions) -> OperationResult {
        if let Some(kind) = self.repository.op_store().read()?.kind() {
            return Err(OperationError::Precondition(format!(
                "a {} is already in progress",
                kind
            )));
        }
        self.repository.ensure_clean_worktree()?;

        let head = self.repository.head_oid()?.ok_or_else(|| {
            OperationError::Precondition("current branch has no commits".to_string())
        })?;
        let source_oid = self.repository.resolve(source)?;

        let cache = CommitCache::new();
        let database = self.repository.database();
        let finder = BCAFinder::new(|oid: &ObjectId| cache.get_or_load(database, oid));

        if finder.is_ancestor(&source_oid, &head)? {
            debug!(source = %source_oid, "source already reachable from HEAD");
            return Ok(Outcome::NothingToDo);
        }

        if options.allow_fast_forward && finder.is_ancestor(&head, &source_oid)? {
            self.repository.reset_hard(&source_oid)?;
            self.repository.refs().update_head(source_oid.clone())?;
            debug!(to = %source_oid, "fast-forwarded branch pointer");
            return Ok(Outcome::FastForward(source_oid));
        }

        let base_tree = self
            .merge_base_tree(&finder, &head, &source_oid, 0)?
            .ok_or_else(|| {
                OperationError::Precondition(format!(
                    "no common ancestor between HEAD and {}",
                    source
                ))
            })?;

        let summary = options
            .message
            .unwrap_or_else(|| format!("Merge branch '{}'", source));
        let description = options.description.unwrap_or_default();

        // durable state goes down before the step mutates anything, so a
        // crash mid-apply is indistinguishable from a pause
        let mut state = OperationState::new(
            OperationKind::Merge,
            vec![TodoStep::new(source_oid.clone(), summary.clone())],
            head.clone(),
        );
        state.onto = Some(source_oid.clone());
        state.message = Some(summary.clone());
        if !description.is_empty() {
            state.description = Some(description.clone());
        }
        self.repository.op_store().save(&state)?;

        let apply = MergeApply::new(database);
        let plan = apply.plan(Some(&base_tree), &head, &source_oid)?;

        let conflicts = {
            let mut index = self.repository.index_mut();
            index.rehydrate()?;
            let conflicts = apply.apply_to_worktree(&plan, self.repository.workspace(), &mut index)?;
            index.write_updates()?;
            conflicts
        };

        if conflicts.is_empty() {
            let author = Author::load_from_env()?;
            let message = Commit::join_message(&summary, &description);
            let oid = self.repository.write_commit(
                vec![head, source_oid],
                message,
                author.clone(),
                author,
            )?;
            self.repository.refs().update_head(oid.clone())?;
            self.repository.op_store().clear()?;

            debug!(commit = %oid, "merge committed");
            return Ok(Outcome::Success(oid));
        }

        let conflict_paths: Vec<_> = conflicts.iter().map(|entry| entry.path.clone()).collect();

        state.conflicts = conflict_paths.clone();
        state.paused = true;
        self.repository.op_store().save(&state)?;

        warn!(
            conflicts = conflict_paths.len(),
            "merge suspended on conflicts"
        );
        Ok(Outcome::Conflict(conflict_paths))
    }

    /// Commit the staged resolution of a suspended merge
    pub fn continue_merge(&self) -> OperationResult {
        let state = match self.repository.op_store().read()? {
            OperationInProgress::Merge(state) => state,
            OperationInProgress::None => {
                return Err(OperationError::Precondition(
                    "no merge in progress".to_string(),
                ));
            }
            other => {
                return Err(OperationError::Precondition(format!(
                    "a {} is in progress, not a merge",
                    other.describe()
                )));
            }
        };

        {
            let mut index = self.repository.index_mut();
            index.rehydrate()?;
            if index.has_conflicts() {
                return Err(OperationError::Precondition(
                    "unresolved conflicts remain in the index".to_string(),
                ));
            }
        }

        let source = state.onto.clone().ok_or_else(|| {
            OperationError::CorruptState("merge state is missing its source record".to_string())
        })?;

        let summary = state
            .message
            .clone()
            .unwrap_or_else(|| "Merge".to_string());
        let message = Commit::join_message(&summary, state.description.as_deref().unwrap_or(""));

        let author = Author::load_from_env()?;
        let oid = self.repository.write_commit(
            vec![state.orig_head, source],
            message,
            author.clone(),
            author,
        )?;
        self.repository.refs().update_head(oid.clone())?;
        self.repository.op_store().clear()?;

        debug!(commit = %oid, "suspended merge committed");
        Ok(Outcome::Success(oid))
    }

    /// Abort the suspended merge and restore the pre-merge state
    pub fn abort(&self) -> OperationResult {
        let state = match self.repository.op_store().read()? {
            OperationInProgress::Merge(state) => state,
            OperationInProgress::None => {
                return Err(OperationError::Precondition(
                    "no merge in progress".to_string(),
                ));
            }
            other => {
                return Err(OperationError::Precondition(format!(
                    "a {} is in progress, not a merge",
                    other.describe()
                )));
            }
        };

        self.repository.reset_hard(&state.orig_head)?;
        self.repository.op_store().clear()?;

        debug!(restored = %state.orig_head, "merge aborted");
        Ok(Outcome::Success(state.orig_head))
    }

    /// Resolve the merge base of two commits to a tree-ish oid
    ///
    /// A single best common ancestor is used directly. Multiple bases
    /// (criss-cross ancestry) are reduced by recursively merging their trees
    /// pairwise, in ascending oid order, into a synthetic tree that is stored
    /// but never committed. Recursion depth is bounded; exceeding it means
    /// the parent graph is degenerate.
    fn merge_base_tree<L>(
        &self,
        finder: &BCAFinder<L>,
        a: &ObjectId,
        b: &ObjectId,
        depth: usize,
    ) -> Result<Option<ObjectId>, OperationError>
    where
        L: Fn(&ObjectId) -> anyhow::Result<crate::artifacts::objects::commit::SlimCommit>,
    {
        if depth > MAX_BASE_RECURSION {
            return Err(OperationError::CorruptState(format!(
                "merge base recursion exceeded {} levels; parent graph is degenerate",
                MAX_BASE_RECURSION
            )));
        }

        let bases = finder.find_best_common_ancestors(a, b)?;

        match bases.len() {
            0 => Ok(None),
            1 => Ok(Some(bases[0].clone())),
            _ => {
                debug!(count = bases.len(), "reducing criss-cross merge bases");

                let apply = MergeApply::new(self.repository.database());
                let mut acc_tree = self
                    .repository
                    .database()
                    .tree_oid_of(&bases[0])
                    .map_err(OperationError::Io)?;

                for next in &bases[1..] {
                    let pair_base = self.merge_base_tree(finder, &bases[0], next, depth + 1)?;
                    let plan = apply.plan(pair_base.as_ref(), &acc_tree, next)?;
                    acc_tree = apply.materialize_tree(&acc_tree, &plan)?;
                }

                Ok(Some(acc_tree))
            }
        }
    }
}
