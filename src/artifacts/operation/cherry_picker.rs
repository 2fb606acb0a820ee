//! Cherry-pick orchestrator
//!
//! Applies an ordered list of commits onto the current HEAD, one single-parent
//! commit per step, chained onto the previous step's result. HEAD stays
//! attached: the branch ref advances with every committed step, so abort has
//! to move it back to the recorded original head.

use crate::areas::repository::Repository;
use crate::artifacts::merge::apply::MergeApply;
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::operation::state::{
    EmptyCommitPolicy, OperationInProgress, OperationKind, OperationState, TodoStep,
};
use crate::errors::{OperationError, OperationResult, Outcome};
use tracing::{debug, warn};

/// Replays an explicit list of commits onto HEAD
pub struct CherryPicker<'r> {
    repository: &'r Repository,
}

impl<'r> CherryPicker<'r> {
    pub fn new(repository: &'r Repository) -> Self {
        CherryPicker { repository }
    }

    /// Cherry-pick the given commits, in order, onto the current HEAD
    pub fn cherry_pick(
        &self,
        commits: &[ObjectId],
        policy: EmptyCommitPolicy,
    ) -> OperationResult {
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

        if commits.is_empty() {
            return Ok(Outcome::NothingToDo);
        }

        // loading every commit up front also validates the list
        let mut todo = Vec::with_capacity(commits.len());
        for oid in commits {
            let commit = self.repository.database().load_commit(oid)?;
            todo.push(TodoStep::new(oid.clone(), commit.summary()));
        }

        let mut state = OperationState::new(OperationKind::CherryPick, todo, head);
        state.empty_policy = policy;
        self.repository.op_store().save(&state)?;

        self.run_loop(state)
    }

    /// Resume after a conflict pause
    ///
    /// Requires zero conflict stages. A resolution that leaves the tree
    /// identical to HEAD's is not committed silently; it needs the explicit
    /// force-empty call (or an abort).
    pub fn continue_cherry_pick(&self) -> OperationResult {
        let mut state = self.read_own_state()?;

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
                OperationError::CorruptState("HEAD vanished mid-cherry-pick".to_string())
            })?;
            let head_tree = self.repository.database().tree_oid_of(&head)?;
            let staged_tree = self.repository.staged_tree_oid()?;

            if staged_tree == head_tree {
                return Err(OperationError::Precondition(
                    "step is empty; commit it with cherry_pick_force_empty or abort".to_string(),
                ));
            }

            let oid = self.commit_step(&state, head)?;
            debug!(commit = %oid, "suspended step committed");

            state.cursor += 1;
            state.clear_step_records();
            self.repository.op_store().save(&state)?;
        }

        self.run_loop(state)
    }

    /// Commit the paused empty step anyway, then resume the loop
    ///
    /// Converts a `Stop` pause into the `Keep` outcome for this one step.
    pub fn force_empty_commit(&self) -> OperationResult {
        let mut state = self.read_own_state()?;

        if !state.paused || !state.steps_remaining() {
            return Err(OperationError::Precondition(
                "no paused cherry-pick step to commit".to_string(),
            ));
        }

        {
            let mut index = self.repository.index_mut();
            index.rehydrate()?;
            if index.has_conflicts() {
                return Err(OperationError::Precondition(
                    "unresolved conflicts remain in the index".to_string(),
                ));
            }
        }

        let head = self.repository.head_oid()?.ok_or_else(|| {
            OperationError::CorruptState("HEAD vanished mid-cherry-pick".to_string())
        })?;

        let oid = self.commit_step(&state, head)?;
        debug!(commit = %oid, "empty step committed");

        state.cursor += 1;
        state.clear_step_records();
        self.repository.op_store().save(&state)?;

        self.run_loop(state)
    }

    /// Abort the cherry-pick, moving the branch back to the original head
    pub fn abort(&self) -> OperationResult {
        let state = self.read_own_state()?;

        // committed steps moved the branch ref; point it back first
        self.repository.refs().update_head(state.orig_head.clone())?;
        self.repository.reset_hard(&state.orig_head)?;
        self.repository.op_store().clear()?;

        debug!(restored = %state.orig_head, "cherry-pick aborted");
        Ok(Outcome::Success(state.orig_head))
    }

    fn read_own_state(&self) -> Result<OperationState, OperationError> {
        match self.repository.op_store().read()? {
            OperationInProgress::CherryPick(state) => Ok(state),
            OperationInProgress::None => Err(OperationError::Precondition(
                "no cherry-pick in progress".to_string(),
            )),
            other => Err(OperationError::Precondition(format!(
                "a {} is in progress, not a cherry-pick",
                other.describe()
            ))),
        }
    }

    /// Commit the cursor step from the staged index, preserving the saved
    /// author and replacing the committer with the acting identity
    fn commit_step(
        &self,
        state: &OperationState,
        head: ObjectId,
    ) -> Result<ObjectId, OperationError> {
        let summary = state.message.clone().unwrap_or_default();
        let body = state.description.clone().unwrap_or_default();
        let author = state.saved_author.clone().ok_or_else(|| {
            OperationError::CorruptState("suspended step has no saved author".to_string())
        })?;
        let committer = Author::acting_identity()?;

        let oid = self.repository.write_commit(
            vec![head],
            Commit::join_message(&summary, &body),
            author,
            committer,
        )?;
        self.repository.refs().update_head(oid.clone())?;

        Ok(oid)
    }

    /// Replay steps until the list is exhausted or a step suspends
    fn run_loop(&self, mut state: OperationState) -> OperationResult {
        while let Some(step) = state.current_step().cloned() {
            let commit = self.repository.database().load_commit(&step.oid)?;

            state.message = Some(commit.summary());
            let body = commit.description();
            state.description = if body.is_empty() { None } else { Some(body) };
            state.saved_author = Some(commit.author().clone());
            state.conflicts.clear();
            state.paused = false;
            self.repository.op_store().save(&state)?;

            let head = self.repository.head_oid()?.ok_or_else(|| {
                OperationError::CorruptState("HEAD vanished mid-cherry-pick".to_string())
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

                warn!(
                    step = state.cursor,
                    conflicts = paths.len(),
                    "cherry-pick suspended"
                );
                return Ok(Outcome::Conflict(paths));
            }

            let head_tree = self.repository.database().tree_oid_of(&head)?;
            let staged_tree = self.repository.staged_tree_oid()?;

            if staged_tree == head_tree {
                match state.empty_policy {
                    EmptyCommitPolicy::Skip => {
                        debug!(step = state.cursor, commit = %step.oid, "skipping empty pick");
                        state.cursor += 1;
                        state.clear_step_records();
                        self.repository.op_store().save(&state)?;
                        continue;
                    }
                    EmptyCommitPolicy::Stop => {
                        state.paused = true;
                        self.repository.op_store().save(&state)?;

                        warn!(step = state.cursor, commit = %step.oid, "paused on empty pick");
                        return Ok(Outcome::EmptyCommit(step.oid));
                    }
                    EmptyCommitPolicy::Keep => {
                        // fall through and commit the empty pick
                    }
                }
            }

            let oid = self.commit_step(&state, head)?;
            debug!(step = state.cursor, commit = %oid, "commit picked");

            state.cursor += 1;
            state.clear_step_records();
            self.repository.op_store().save(&state)?;
        }

        let final_oid = self.repository.head_oid()?.ok_or_else(|| {
            OperationError::CorruptState("HEAD vanished mid-cherry-pick".to_string())
        })?;
        self.repository.op_store().clear()?;

        debug!(tip = %final_oid, "cherry-pick finished");
        Ok(Outcome::Success(final_oid))
    }
}
