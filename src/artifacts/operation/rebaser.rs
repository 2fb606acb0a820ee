//! Rebase orchestrator
//!
//! A step-synchronous state machine over the persisted todo list. HEAD is
//! detached at the "onto" commit, each todo step is replayed through the
//! shared apply, and the branch ref only moves once the whole list is
//! exhausted. Every step boundary is durable: the loop can be resumed after a
//! crash exactly as after an explicit pause.

use crate::areas::database::CommitCache;
use crate::areas::repository::Repository;
use crate::artifacts::branch::branch_name::BranchName;
use crate::artifacts::merge::apply::MergeApply;
use crate::artifacts::merge::bca_finder::BCAFinder;
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::operation::state::{
    EmptyCommitPolicy, OperationInProgress, OperationKind, OperationState, TodoStep,
};
use crate::errors::{OperationError, OperationResult, Outcome};
use tracing::{debug, warn};

/// Replays the current branch onto a new base commit
pub struct Rebaser<'r> {
    repository: &'r Repository,
}

impl<'r> Rebaser<'r> {
    pub fn new(repository: &'r Repository) -> Self {
        Rebaser { repository }
    }

    /// Rebase the current branch onto the given target
    pub fn rebase(&self, onto: &str, policy: EmptyCommitPolicy) -> OperationResult {
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
        let onto_oid = self.repository.resolve(onto)?;

        let branch = self
            .repository
            .refs()
            .current_branch()?
            .ok_or_else(|| {
                OperationError::Precondition(
                    "HEAD is detached; rebase needs a branch to move".to_string(),
                )
            })?;

        let cache = CommitCache::new();
        let database = self.repository.database();
        let finder = BCAFinder::new(|oid: &ObjectId| cache.get_or_load(database, oid));

        if finder.is_ancestor(&onto_oid, &head)? {
            debug!(onto = %onto_oid, "branch already based on target");
            return Ok(Outcome::NothingToDo);
        }

        if finder.is_ancestor(&head, &onto_oid)? {
            // nothing to replay: move the branch pointer up
            self.repository.reset_hard(&onto_oid)?;
            self.repository.refs().update_head(onto_oid.clone())?;
            debug!(to = %onto_oid, "rebase fast-forwarded branch");
            return Ok(Outcome::FastForward(onto_oid));
        }

        let base = finder
            .find_best_common_ancestor(&head, &onto_oid)?
            .ok_or_else(|| {
                OperationError::Precondition(format!(
                    "no common ancestor between HEAD and {}",
                    onto
                ))
            })?;

        let todo = self.collect_todo(&head, &base)?;

        let mut state = OperationState::new(OperationKind::Rebase, todo, head);
        state.head_name = Some(branch.to_string());
        state.onto = Some(onto_oid.clone());
        state.empty_policy = policy;
        self.repository.op_store().save(&state)?;

        // replay on a detached HEAD; the branch ref moves only at the end
        self.repository.refs().detach_head(&onto_oid)?;
        self.repository.reset_hard(&onto_oid)?;

        self.run_loop(state)
    }

    /// Resume a suspended rebase
    ///
    /// Requires zero conflict stages. The suspended step is committed with
    /// its saved author and message (overridable); a step whose staged tree
    /// still equals HEAD's is dropped instead of committed.
    pub fn continue_rebase(
        &self,
        message: Option<String>,
        description: Option<String>,
    ) -> OperationResult {
        let mut state = match self.repository.op_store().read()? {
            OperationInProgress::Rebase(state) => state,
            OperationInProgress::None => {
                return Err(OperationError::Precondition(
                    "no rebase in progress".to_string(),
                ));
            }
            other => {
                return Err(OperationError::Precondition(format!(
                    "a {} is in progress, not a rebase",
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

        if state.paused && state.steps_remaining() {
            let head = self.repository.head_oid()?.ok_or_else(|| {
                OperationError::CorruptState("HEAD vanished mid-rebase".to_string())
            })?;
            let head_tree = self.repository.database().tree_oid_of(&head)?;
            let staged_tree = self.repository.staged_tree_oid()?;

            if staged_tree == head_tree {
                // acknowledged empty step: drop it
                debug!(step = state.cursor, "dropping still-empty step");
            } else {
                let summary = message
                    .or_else(|| state.message.clone())
                    .unwrap_or_default();
                let body = description
                    .or_else(|| state.description.clone())
                    .unwrap_or_default();
                let author = state.saved_author.clone().ok_or_else(|| {
                    OperationError::CorruptState(
                        "suspended step has no saved author".to_string(),
                    )
                })?;
                let committer = Author::acting_identity()?;

                let oid = self.repository.write_commit(
                    vec![head],
                    Commit::join_message(&summary, &body),
                    author,
                    committer,
                )?;
                self.repository.refs().update_head(oid.clone())?;
                debug!(commit = %oid, "suspended step committed");
            }

            state.cursor += 1;
            state.clear_step_records();
            self.repository.op_store().save(&state)?;
        }

        self.run_loop(state)
    }

    /// Abort the rebase and restore branch, HEAD, index and worktree
    pub fn abort(&self) -> OperationResult {
        let state = match self.repository.op_store().read()? {
            OperationInProgress::Rebase(state) => state,
            OperationInProgress::None => {
                return Err(OperationError::Precondition(
                    "no rebase in progress".to_string(),
                ));
            }
            other => {
                return Err(OperationError::Precondition(format!(
                    "a {} is in progress, not a rebase",
                    other.describe()
                )));
            }
        };

        self.repository.reset_hard(&state.orig_head)?;

        if let Some(head_name) = &state.head_name {
            let branch = BranchName::try_parse(head_name.clone())
                .map_err(|err| OperationError::CorruptState(err.to_string()))?;
            self.repository
                .refs()
                .update_branch(&branch, &state.orig_head)?;
            self.repository.refs().set_head_symbolic(&branch)?;
        }

        self.repository.op_store().clear()?;

        debug!(restored = %state.orig_head, "rebase aborted");
        Ok(Outcome::Success(state.orig_head))
    }

    /// Saved message of the suspended step, if any
    pub fn stopped_message(&self) -> Result<Option<String>, OperationError> {
        match self.repository.op_store().read()? {
            OperationInProgress::Rebase(state) => Ok(state.message),
            _ => Ok(None),
        }
    }

    /// Commits in (base .. head], first-parent walk, oldest first
    fn collect_todo(
        &self,
        head: &ObjectId,
        base: &ObjectId,
    ) -> Result<Vec<TodoStep>, OperationError> {
        let mut todo = Vec::new();
        let mut cursor = head.clone();

        while cursor != *base {
            let commit = self.repository.database().load_commit(&cursor)?;
            todo.push(TodoStep::new(cursor.clone(), commit.summary()));

            cursor = commit.parent().cloned().ok_or_else(|| {
                OperationError::CorruptState(format!(
                    "walk from {} reached a root without meeting base {}",
                    head, base
                ))
            })?;
        }

        todo.reverse();
        Ok(todo)
    }

    /// Replay steps until the todo list is exhausted or a step suspends
    fn run_loop(&self, mut state: OperationState) -> OperationResult {
        while let Some(step) = state.current_step().cloned() {
            let commit = self.repository.database().load_commit(&step.oid)?;

            // step records are durable before the step touches anything
            state.message = Some(commit.summary());
            let body = commit.description();
            state.description = if body.is_empty() { None } else { Some(body) };
            state.saved_author = Some(commit.author().clone());
            state.conflicts.clear();
            state.paused = false;
            self.repository.op_store().save(&state)?;

            let head = self.repository.head_oid()?.ok_or_else(|| {
                OperationError::CorruptState("HEAD vanished mid-rebase".to_string())
            })?;

            let apply = MergeApply::new(self.repository.database());
            let plan = apply.plan(commit.parent(), &head, &step.oid)?;

            let conflicts = {
                let mut index = self.repository.index_mut();
                index.rehydrate()?;
                let conflicts =
                    apply.apply_to_worktree(&plan, self.repository.workspace(), &mut index)?;
                index.write_updates()?;
                conflicts
            };

            if !conflicts.is_empty() {
                let paths: Vec<_> = conflicts.iter().map(|entry| entry.path.clone()).collect();
                state.conflicts = paths.clone();
                state.paused = true;
                self.repository.op_store().save(&state)?;

                warn!(step = state.cursor, conflicts = paths.len(), "rebase suspended");
                return Ok(Outcome::Conflict(paths));
            }

            let head_tree = self.repository.database().tree_oid_of(&head)?;
            let staged_tree = self.repository.staged_tree_oid()?;

            if staged_tree == head_tree {
                match state.empty_policy {
                    EmptyCommitPolicy::Skip => {
                        debug!(step = state.cursor, commit = %step.oid, "skipping empty step");
                        state.cursor += 1;
                        state.clear_step_records();
                        self.repository.op_store().save(&state)?;
                        continue;
                    }
                    EmptyCommitPolicy::Stop => {
                        state.paused = true;
                        self.repository.op_store().save(&state)?;

                        warn!(step = state.cursor, commit = %step.oid, "paused on empty step");
                        return Ok(Outcome::EmptyCommit(step.oid));
                    }
                    EmptyCommitPolicy::Keep => {
                        // fall through and commit the empty step
                    }
                }
            }

            let committer = Author::acting_identity()?;
            let oid = self.repository.write_commit(
                vec![head],
                commit.message().to_string(),
                commit.author().clone(),
                committer,
            )?;
            self.repository.refs().update_head(oid.clone())?;

            debug!(step = state.cursor, commit = %oid, "step replayed");

            state.cursor += 1;
            state.clear_step_records();
            self.repository.op_store().save(&state)?;
        }

        self.finish(state)
    }

    /// Todo exhausted: move the branch to the produced tip and reattach HEAD
    fn finish(&self, state: OperationState) -> OperationResult {
        let final_oid = self.repository.head_oid()?.ok_or_else(|| {
            OperationError::CorruptState("HEAD vanished mid-rebase".to_string())
        })?;

        let head_name = state.head_name.ok_or_else(|| {
            OperationError::CorruptState("rebase state is missing its branch record".to_string())
        })?;
        let branch = BranchName::try_parse(head_name)
            .map_err(|err| OperationError::CorruptState(err.to_string()))?;

        self.repository.refs().update_branch(&branch, &final_oid)?;
        self.repository.refs().set_head_symbolic(&branch)?;
        self.repository.op_store().clear()?;

        debug!(branch = %branch, tip = %final_oid, "rebase finished");
        Ok(Outcome::Success(final_oid))
    }
}
