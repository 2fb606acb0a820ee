use crate::areas::database::Database;
use crate::areas::index::Index;
use crate::areas::refs::Refs;
use crate::areas::workspace::Workspace;
use crate::artifacts::branch::branch_name::BranchName;
use crate::artifacts::index::index_entry::IndexEntry;
use crate::artifacts::objects::OBJECT_ID_LENGTH;
use crate::artifacts::objects::commit::{Author, Commit};
use crate::artifacts::objects::object::Object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::Tree;
use crate::artifacts::operation::cherry_picker::CherryPicker;
use crate::artifacts::operation::merger::{MergeOptions, Merger};
use crate::artifacts::operation::rebaser::Rebaser;
use crate::artifacts::operation::state::{EmptyCommitPolicy, OperationKind, OperationStore};
use crate::errors::{OperationError, OperationResult};
use anyhow::Context;
use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;

/// Name of the branch created by `init`
pub const DEFAULT_BRANCH: &str = "main";

/// A repository: the storage areas plus the public operation surface
///
/// All operations are synchronous and single-threaded per repository; the
/// object store and the file system are the only shared mutable resources.
pub struct Repository {
    path: Box<Path>,
    git_path: Box<Path>,
    index: RefCell<Index>,
    database: Database,
    workspace: Workspace,
    refs: Refs,
    op_store: OperationStore,
}

impl Repository {
    /// Open an existing repository rooted at `path`
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let path = Path::new(path).canonicalize()?;
        let git_path = path.join(".git");

        if !git_path.is_dir() {
            anyhow::bail!("no repository found at {}", path.display());
        }

        let index = Index::new(git_path.join("index").into_boxed_path());
        let database = Database::new(git_path.join("objects").into_boxed_path());
        let workspace = Workspace::new(path.clone().into_boxed_path());
        let refs = Refs::new(git_path.clone().into_boxed_path());
        let op_store = OperationStore::new(&git_path);

        Ok(Repository {
            path: path.into_boxed_path(),
            git_path: git_path.into_boxed_path(),
            index: RefCell::new(index),
            database,
            workspace,
            refs,
            op_store,
        })
    }

    /// Initialize a new repository at `path` and open it
    pub fn init(path: &str) -> anyhow::Result<Self> {
        let root = Path::new(path);
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }

        let git_path = root.join(".git");
        std::fs::create_dir_all(git_path.join("objects"))?;
        std::fs::create_dir_all(git_path.join("refs").join("heads"))?;

        let head_path = git_path.join("HEAD");
        if !head_path.exists() {
            std::fs::write(&head_path, format!("ref: refs/heads/{}\n", DEFAULT_BRANCH))?;
        }

        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn git_path(&self) -> &Path {
        &self.git_path
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    pub fn op_store(&self) -> &OperationStore {
        &self.op_store
    }

    pub fn index(&self) -> Ref<'_, Index> {
        self.index.borrow()
    }

    pub(crate) fn index_mut(&self) -> RefMut<'_, Index> {
        self.index.borrow_mut()
    }

    /// The commit HEAD currently points at, if any
    pub fn head_oid(&self) -> anyhow::Result<Option<ObjectId>> {
        self.refs.read_head()
    }

    /// Resolve a revision string: a full object id or a branch name
    pub fn resolve(&self, revision: &str) -> anyhow::Result<ObjectId> {
        if revision.len() == OBJECT_ID_LENGTH
            && let Ok(oid) = ObjectId::try_parse(revision.to_string())
        {
            return Ok(oid);
        }

        let branch = BranchName::try_parse(revision.to_string())?;
        self.refs
            .read_ref(&branch)?
            .with_context(|| format!("branch {} has no commits", revision))
    }

    /// Create a branch pointing at the given commit
    pub fn create_branch(&self, name: &str, oid: ObjectId) -> anyhow::Result<()> {
        let branch = BranchName::try_parse(name.to_string())?;
        self.refs.create_branch(&branch, oid)
    }

    /// Hash a working file into the object store and stage it at stage 0
    ///
    /// Staging a path that previously held conflict stages resolves it.
    pub fn stage_file(&self, path: &Path) -> anyhow::Result<()> {
        let blob = self.workspace.parse_blob(path)?;
        let oid = self.database.store_blob(blob)?;
        let stat = self.workspace.stat_file(path)?;

        let mut index = self.index.borrow_mut();
        index.rehydrate()?;
        index.add(IndexEntry::new(path.to_path_buf(), oid, stat))?;
        index.write_updates()?;

        Ok(())
    }

    /// Remove a path from index and worktree
    pub fn unstage_and_remove(&self, path: &Path) -> anyhow::Result<()> {
        let mut index = self.index.borrow_mut();
        index.rehydrate()?;
        index.remove(path.to_path_buf())?;
        index.write_updates()?;
        self.workspace.remove_file(path)?;

        Ok(())
    }

    /// Create a commit from the resolved index and advance HEAD
    pub fn commit(&self, message: &str) -> anyhow::Result<ObjectId> {
        {
            let mut index = self.index.borrow_mut();
            index.rehydrate()?;
        }

        let parents = match self.head_oid()? {
            Some(parent) => vec![parent],
            None => Vec::new(),
        };

        let author = Author::load_from_env()?;
        let oid = self.write_commit(parents, message.trim().to_string(), author.clone(), author)?;
        self.refs.update_head(oid.clone())?;

        Ok(oid)
    }

    /// Build the tree from the resolved index and write a commit object
    ///
    /// Does not move any ref; callers decide where the commit lands. The
    /// created commit's tree always matches the resolved index content.
    pub(crate) fn write_commit(
        &self,
        parents: Vec<ObjectId>,
        message: String,
        author: Author,
        committer: Author,
    ) -> anyhow::Result<ObjectId> {
        let index = self.index.borrow();
        anyhow::ensure!(
            !index.has_conflicts(),
            "cannot write a commit while conflicts are staged"
        );

        let tree = Tree::build(index.stage0_entries())?;
        tree.traverse(&|subtree| self.database.store(subtree.clone()))?;
        let tree_oid = tree.object_id()?;

        let commit = Commit::new_with_committer(parents, tree_oid, author, committer, message);
        let commit_oid = commit.object_id()?;
        self.database.store(commit)?;

        Ok(commit_oid)
    }

    /// Hash of the tree the resolved index would commit as, without storing it
    pub(crate) fn staged_tree_oid(&self) -> anyhow::Result<ObjectId> {
        let index = self.index.borrow();
        let tree = Tree::build(index.stage0_entries())?;
        tree.object_id()
    }

    /// Force index and worktree back to the given commit's tree
    ///
    /// Bypasses all conflict checks: tracked files not in the target tree are
    /// deleted, everything else is rewritten and restatted.
    pub fn reset_hard(&self, oid: &ObjectId) -> anyhow::Result<()> {
        let tree_entries = self.database.flatten_tree(Some(oid))?;

        let mut index = self.index.borrow_mut();
        index.rehydrate()?;

        for path in index.tracked_paths() {
            if !tree_entries.contains_key(&path) {
                self.workspace.remove_file(&path)?;
            }
        }

        index.clear();

        for (path, entry) in &tree_entries {
            let blob = self
                .database
                .parse_object_as_blob(&entry.oid)?
                .with_context(|| format!("object {} is not a blob", entry.oid))?;
            self.workspace.write_file(path, blob.content(), &entry.mode)?;

            let stat = self.workspace.stat_file(path)?;
            index.add(IndexEntry::new(path.clone(), entry.oid.clone(), stat))?;
        }

        index.write_updates()
    }

    /// Verify the worktree matches the staged state before an operation starts
    ///
    /// Every stage-0 entry must exist on disk with identical content, and no
    /// conflict stages may be present.
    pub(crate) fn ensure_clean_worktree(&self) -> Result<(), OperationError> {
        let mut index = self.index.borrow_mut();
        index.rehydrate().map_err(OperationError::Io)?;

        if index.has_conflicts() {
            return Err(OperationError::Precondition(
                "unresolved conflicts are staged".to_string(),
            ));
        }

        for entry in index.stage0_entries() {
            if !self.workspace.file_exists(&entry.name) {
                return Err(OperationError::Precondition(format!(
                    "worktree is missing tracked file {}",
                    entry.name.display()
                )));
            }

            let blob = self
                .workspace
                .parse_blob(&entry.name)
                .map_err(OperationError::Io)?;
            let oid = blob.object_id().map_err(OperationError::Io)?;

            if oid != entry.oid {
                return Err(OperationError::Precondition(format!(
                    "worktree has uncommitted changes in {}",
                    entry.name.display()
                )));
            }
        }

        Ok(())
    }

    /// Which operation, if any, is currently in progress
    ///
    /// Always read fresh from durable storage.
    pub fn operation_in_progress(&self) -> Result<Option<OperationKind>, OperationError> {
        Ok(self.op_store.read()?.kind())
    }

    // ----- public operation surface -----

    pub fn merger(&self) -> Merger<'_> {
        Merger::new(self)
    }

    pub fn rebaser(&self) -> Rebaser<'_> {
        Rebaser::new(self)
    }

    pub fn cherry_picker(&self) -> CherryPicker<'_> {
        CherryPicker::new(self)
    }

    pub fn start_merge(&self, source: &str, options: MergeOptions) -> OperationResult {
        self.merger().merge(source, options)
    }

    pub fn continue_merge(&self) -> OperationResult {
        self.merger().continue_merge()
    }

    pub fn abort_merge(&self) -> OperationResult {
        self.merger().abort()
    }

    pub fn start_rebase(&self, onto: &str, policy: EmptyCommitPolicy) -> OperationResult {
        self.rebaser().rebase(onto, policy)
    }

    pub fn continue_rebase(
        &self,
        message: Option<String>,
        description: Option<String>,
    ) -> OperationResult {
        self.rebaser().continue_rebase(message, description)
    }

    pub fn abort_rebase(&self) -> OperationResult {
        self.rebaser().abort()
    }

    pub fn start_cherry_pick(
        &self,
        commits: &[ObjectId],
        policy: EmptyCommitPolicy,
    ) -> OperationResult {
        self.cherry_picker().cherry_pick(commits, policy)
    }

    pub fn continue_cherry_pick(&self) -> OperationResult {
        self.cherry_picker().continue_cherry_pick()
    }

    pub fn cherry_pick_force_empty(&self) -> OperationResult {
        self.cherry_picker().force_empty_commit()
    }

    pub fn abort_cherry_pick(&self) -> OperationResult {
        self.cherry_picker().abort()
    }
}
