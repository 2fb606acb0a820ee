//! Durable operation state
//!
//! An in-progress merge, rebase or cherry-pick is recorded as a directory of
//! small record files under `.git/op-state/`. The directory's existence is
//! the authoritative "operation in progress" flag; it is created before the
//! first step runs, rewritten after every step, and removed on completion or
//! abort. A crash between two steps therefore leaves the repository in
//! exactly the same resumable condition as an explicit pause.
//!
//! Callers always read the state fresh from disk; it is never cached in
//! memory across public calls.
//!
//! ## Records
//!
//! ```text
//! op-state/
//!   kind         "merge" | "rebase" | "cherry-pick"
//!   todo         one step per line: "<oid> <summary>"
//!   cursor       index of the current step
//!   orig-head    commit HEAD pointed at before the operation
//!   head-name    branch being rebased (rebase only)
//!   onto         target tip ("onto" commit / merge source)
//!   message      saved commit message for the suspended step
//!   description  saved message body
//!   author       saved author signature for the suspended step
//!   conflicts    outstanding conflict paths, one per line
//!   empty-policy "stop" | "skip" | "keep"
//!   paused       "true" while the cursor step awaits continue/abort
//! ```

use crate::artifacts::objects::commit::Author;
use crate::artifacts::objects::object_id::ObjectId;
use crate::errors::OperationError;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory name of the persisted operation state, under `.git`
pub const OP_STATE_DIR: &str = "op-state";

/// Which multi-step operation is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Merge,
    Rebase,
    CherryPick,
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Merge => "merge",
            OperationKind::Rebase => "rebase",
            OperationKind::CherryPick => "cherry-pick",
        }
    }

    fn try_parse(value: &str) -> Option<Self> {
        match value {
            "merge" => Some(OperationKind::Merge),
            "rebase" => Some(OperationKind::Rebase),
            "cherry-pick" => Some(OperationKind::CherryPick),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Policy for a replayed step whose tree equals its parent's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyCommitPolicy {
    /// Suspend and require explicit acknowledgment (default)
    #[default]
    Stop,
    /// Drop the step silently and advance
    Skip,
    /// Commit it anyway, tree identical to parent
    Keep,
}

impl EmptyCommitPolicy {
    fn as_str(&self) -> &str {
        match self {
            EmptyCommitPolicy::Stop => "stop",
            EmptyCommitPolicy::Skip => "skip",
            EmptyCommitPolicy::Keep => "keep",
        }
    }

    fn try_parse(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(EmptyCommitPolicy::Stop),
            "skip" => Some(EmptyCommitPolicy::Skip),
            "keep" => Some(EmptyCommitPolicy::Keep),
            _ => None,
        }
    }
}

/// One pending replay step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoStep {
    pub oid: ObjectId,
    pub summary: String,
}

impl TodoStep {
    pub fn new(oid: ObjectId, summary: String) -> Self {
        TodoStep { oid, summary }
    }
}

/// Durable record of an in-progress operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationState {
    pub kind: OperationKind,
    /// Ordered steps; merges have exactly one (the source tip)
    pub todo: Vec<TodoStep>,
    /// Index of the step currently being applied or applied next
    pub cursor: usize,
    /// Commit HEAD pointed at before the operation started
    pub orig_head: ObjectId,
    /// Branch being rebased; None when HEAD stays attached
    pub head_name: Option<String>,
    /// The "onto" target (rebase) or source tip (merge)
    pub onto: Option<ObjectId>,
    /// Saved message for the suspended step
    pub message: Option<String>,
    /// Saved message body for the suspended step
    pub description: Option<String>,
    /// Saved author signature for the suspended step
    pub saved_author: Option<Author>,
    /// Outstanding conflict paths of the suspended step
    pub conflicts: Vec<PathBuf>,
    /// Empty-step policy the operation was started with
    pub empty_policy: EmptyCommitPolicy,
    /// True while the cursor step is suspended awaiting continue/abort;
    /// distinguishes an explicit pause from a crash mid-step
    pub paused: bool,
}

impl OperationState {
    pub fn new(kind: OperationKind, todo: Vec<TodoStep>, orig_head: ObjectId) -> Self {
        OperationState {
            kind,
            todo,
            cursor: 0,
            orig_head,
            head_name: None,
            onto: None,
            message: None,
            description: None,
            saved_author: None,
            conflicts: Vec::new(),
            empty_policy: EmptyCommitPolicy::default(),
            paused: false,
        }
    }

    /// The step at the cursor, if any remain
    pub fn current_step(&self) -> Option<&TodoStep> {
        self.todo.get(self.cursor)
    }

    pub fn steps_remaining(&self) -> bool {
        self.cursor < self.todo.len()
    }

    /// Forget per-step bookkeeping after a step completes
    pub fn clear_step_records(&mut self) {
        self.message = None;
        self.description = None;
        self.saved_author = None;
        self.conflicts.clear();
        self.paused = false;
    }
}

/// The tagged in-progress variant read fresh from durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationInProgress {
    None,
    Merge(OperationState),
    Rebase(OperationState),
    CherryPick(OperationState),
}

impl OperationInProgress {
    pub fn kind(&self) -> Option<OperationKind> {
        match self {
            OperationInProgress::None => None,
            OperationInProgress::Merge(_) => Some(OperationKind::Merge),
            OperationInProgress::Rebase(_) => Some(OperationKind::Rebase),
            OperationInProgress::CherryPick(_) => Some(OperationKind::CherryPick),
        }
    }

    /// Kind name for precondition messages
    pub fn describe(&self) -> &str {
        match self {
            OperationInProgress::None => "no operation",
            OperationInProgress::Merge(_) => "merge",
            OperationInProgress::Rebase(_) => "rebase",
            OperationInProgress::CherryPick(_) => "cherry-pick",
        }
    }
}

/// Reader/writer for the persisted operation state directory
#[derive(Debug)]
pub struct OperationStore {
    path: Box<Path>,
}

impl OperationStore {
    /// `git_path` is the repository metadata directory (`.git`)
    pub fn new(git_path: &Path) -> Self {
        OperationStore {
            path: git_path.join(OP_STATE_DIR).into_boxed_path(),
        }
    }

    /// Whether any operation is in progress
    pub fn in_progress(&self) -> bool {
        self.path.exists()
    }

    /// Read the current state fresh from disk
    ///
    /// Unreadable or internally inconsistent records are corrupt state, not
    /// I/O errors: the caller has to clean up, retrying cannot help.
    pub fn read(&self) -> Result<OperationInProgress, OperationError> {
        if !self.path.exists() {
            return Ok(OperationInProgress::None);
        }

        let kind_raw = self.read_required("kind")?;
        let kind = OperationKind::try_parse(kind_raw.trim()).ok_or_else(|| {
            OperationError::CorruptState(format!("unknown operation kind '{}'", kind_raw.trim()))
        })?;

        let todo = self.read_todo()?;

        let cursor: usize = self
            .read_required("cursor")?
            .trim()
            .parse()
            .map_err(|_| OperationError::CorruptState("unreadable cursor record".to_string()))?;
        if cursor > todo.len() {
            return Err(OperationError::CorruptState(format!(
                "cursor {} out of range for {} todo steps",
                cursor,
                todo.len()
            )));
        }

        let orig_head = self.read_oid_record("orig-head")?.ok_or_else(|| {
            OperationError::CorruptState("missing orig-head record".to_string())
        })?;

        let saved_author = match self.read_optional("author") {
            None => None,
            Some(raw) => Some(Author::try_from(raw.trim()).map_err(|err| {
                OperationError::CorruptState(format!("unreadable author record: {err}"))
            })?),
        };

        let empty_policy = match self.read_optional("empty-policy") {
            None => EmptyCommitPolicy::default(),
            Some(raw) => EmptyCommitPolicy::try_parse(raw.trim()).ok_or_else(|| {
                OperationError::CorruptState(format!(
                    "unknown empty-commit policy '{}'",
                    raw.trim()
                ))
            })?,
        };

        let state = OperationState {
            kind,
            todo,
            cursor,
            orig_head,
            head_name: self.read_optional("head-name").map(|s| s.trim().to_string()),
            onto: self.read_oid_record("onto")?,
            message: self.read_optional("message"),
            description: self.read_optional("description"),
            saved_author,
            conflicts: self
                .read_optional("conflicts")
                .map(|raw| raw.lines().map(PathBuf::from).collect())
                .unwrap_or_default(),
            empty_policy,
            paused: self
                .read_optional("paused")
                .map(|raw| raw.trim() == "true")
                .unwrap_or(false),
        };

        Ok(match kind {
            OperationKind::Merge => OperationInProgress::Merge(state),
            OperationKind::Rebase => OperationInProgress::Rebase(state),
            OperationKind::CherryPick => OperationInProgress::CherryPick(state),
        })
    }

    /// Persist the full state, record by record
    ///
    /// Each record is written through a temp file and renamed into place, so
    /// a crash mid-save never leaves a half-written record behind.
    pub fn save(&self, state: &OperationState) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create state directory {:?}", self.path))?;

        self.write_record("kind", state.kind.as_str())?;

        let todo_lines = state
            .todo
            .iter()
            .map(|step| format!("{} {}", step.oid, step.summary))
            .collect::<Vec<_>>()
            .join("\n");
        self.write_record("todo", &todo_lines)?;

        self.write_record("cursor", &state.cursor.to_string())?;
        self.write_record("orig-head", state.orig_head.as_ref())?;
        self.write_record("empty-policy", state.empty_policy.as_str())?;
        self.write_record("paused", if state.paused { "true" } else { "false" })?;

        self.write_optional_record("head-name", state.head_name.as_deref())?;
        self.write_optional_record("onto", state.onto.as_ref().map(|oid| oid.as_ref()))?;
        self.write_optional_record("message", state.message.as_deref())?;
        self.write_optional_record("description", state.description.as_deref())?;
        self.write_optional_record(
            "author",
            state.saved_author.as_ref().map(|a| a.display()).as_deref(),
        )?;

        if state.conflicts.is_empty() {
            self.remove_record("conflicts")?;
        } else {
            let conflicts = state
                .conflicts
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join("\n");
            self.write_record("conflicts", &conflicts)?;
        }

        Ok(())
    }

    /// Delete the whole state directory
    pub fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)
                .with_context(|| format!("failed to remove state directory {:?}", self.path))?;
        }

        Ok(())
    }

    fn read_todo(&self) -> Result<Vec<TodoStep>, OperationError> {
        let raw = self.read_required("todo")?;
        let mut todo = Vec::new();

        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let (oid_part, summary) = match line.split_once(' ') {
                Some((oid_part, summary)) => (oid_part, summary.to_string()),
                None => (line, String::new()),
            };

            let oid = ObjectId::try_parse(oid_part.to_string()).map_err(|_| {
                OperationError::CorruptState(format!("malformed todo line '{}'", line))
            })?;

            todo.push(TodoStep::new(oid, summary));
        }

        Ok(todo)
    }

    fn read_required(&self, name: &str) -> Result<String, OperationError> {
        std::fs::read_to_string(self.path.join(name)).map_err(|_| {
            OperationError::CorruptState(format!("missing or unreadable '{}' record", name))
        })
    }

    fn read_optional(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.path.join(name)).ok()
    }

    fn read_oid_record(&self, name: &str) -> Result<Option<ObjectId>, OperationError> {
        match self.read_optional(name) {
            None => Ok(None),
            Some(raw) => ObjectId::try_parse(raw.trim().to_string())
                .map(Some)
                .map_err(|_| {
                    OperationError::CorruptState(format!("malformed oid in '{}' record", name))
                }),
        }
    }

    fn write_record(&self, name: &str, content: &str) -> anyhow::Result<()> {
        let record_path = self.path.join(name);
        let temp_path = self.path.join(format!("tmp-{}-{}", name, rand::random::<u32>()));

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("failed to open record file {:?}", temp_path))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("failed to write record file {:?}", temp_path))?;

        std::fs::rename(&temp_path, &record_path)
            .with_context(|| format!("failed to move record into place at {:?}", record_path))?;

        Ok(())
    }

    fn write_optional_record(&self, name: &str, content: Option<&str>) -> anyhow::Result<()> {
        match content {
            Some(content) => self.write_record(name, content),
            None => self.remove_record(name),
        }
    }

    fn remove_record(&self, name: &str) -> anyhow::Result<()> {
        let record_path = self.path.join(name);
        if record_path.exists() {
            std::fs::remove_file(&record_path)
                .with_context(|| format!("failed to remove record file {:?}", record_path))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn oid(fill: char) -> ObjectId {
        ObjectId::try_parse(fill.to_string().repeat(40)).unwrap()
    }

    fn sample_state() -> OperationState {
        let mut state = OperationState::new(
            OperationKind::Rebase,
            vec![
                TodoStep::new(oid('a'), "first change".to_string()),
                TodoStep::new(oid('b'), "second change".to_string()),
            ],
            oid('0'),
        );
        state.cursor = 1;
        state.head_name = Some("main".to_string());
        state.onto = Some(oid('c'));
        state.message = Some("second change".to_string());
        state.saved_author = Some(Author::new_with_timestamp(
            "alice".to_string(),
            "alice@example.com".to_string(),
            chrono::DateTime::from_timestamp(1_700_000_000, 0)
                .unwrap()
                .fixed_offset(),
        ));
        state.conflicts = vec![PathBuf::from("src/lib.rs")];
        state.empty_policy = EmptyCommitPolicy::Skip;
        state.paused = true;
        state
    }

    #[test]
    fn test_state_round_trips_through_disk() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());

        let state = sample_state();
        store.save(&state).unwrap();

        match store.read().unwrap() {
            OperationInProgress::Rebase(loaded) => assert_eq!(loaded, state),
            other => panic!("expected rebase state, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_directory_reads_as_none() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());

        assert!(!store.in_progress());
        assert_eq!(store.read().unwrap(), OperationInProgress::None);
    }

    #[test]
    fn test_clear_removes_the_in_progress_flag() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());

        store.save(&sample_state()).unwrap();
        assert!(store.in_progress());

        store.clear().unwrap();
        assert!(!store.in_progress());
        assert_eq!(store.read().unwrap(), OperationInProgress::None);
    }

    #[test]
    fn test_cursor_out_of_range_is_corrupt() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());

        let mut state = sample_state();
        store.save(&state).unwrap();

        state.cursor = 5;
        store.save(&state).unwrap();

        match store.read() {
            Err(OperationError::CorruptState(message)) => {
                assert!(message.contains("cursor"));
            }
            other => panic!("expected corrupt state, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_corrupt() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());

        store.save(&sample_state()).unwrap();
        std::fs::write(dir.path().join(OP_STATE_DIR).join("kind"), "octopus").unwrap();

        assert!(matches!(
            store.read(),
            Err(OperationError::CorruptState(_))
        ));
    }

    #[test]
    fn test_step_records_cleared_between_steps() {
        let mut state = sample_state();
        state.clear_step_records();

        assert!(state.message.is_none());
        assert!(state.saved_author.is_none());
        assert!(state.conflicts.is_empty());
        // the todo list and cursor survive
        assert_eq!(state.todo.len(), 2);
        assert_eq!(state.cursor, 1);
    }
}
