//! graft is a merge, rebase and cherry-pick engine over a content-addressable
//! commit graph, for embedding in tools that need programmatic history
//! manipulation without shelling out to an interactive tool.
//!
//! The crate is built around three pieces:
//!
//! - a deterministic three-way content merger with an exhaustive conflict
//!   classification ([`artifacts::merge`]),
//! - a durable, resumable operation state machine shared by all three
//!   operations ([`artifacts::operation`]),
//! - the index/worktree synchronization that keeps staged and on-disk state
//!   consistent with both ([`areas`]).
//!
//! ```no_run
//! use graft::{MergeOptions, Outcome, Repository};
//!
//! # fn main() -> anyhow::Result<()> {
//! let repo = Repository::open(".")?;
//!
//! match repo.start_merge("feature", MergeOptions::default())? {
//!     Outcome::Success(oid) => println!("merged as {oid}"),
//!     Outcome::FastForward(oid) => println!("fast-forwarded to {oid}"),
//!     Outcome::Conflict(paths) => {
//!         // resolve, stage, then:
//!         // repo.continue_merge()? or repo.abort_merge()?
//!         println!("{} conflicting paths", paths.len());
//!     }
//!     _ => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod areas;
pub mod artifacts;
pub mod errors;

pub use areas::repository::Repository;
pub use artifacts::index::index_entry::{IndexEntry, Stage};
pub use artifacts::merge::conflict::{ConflictEntry, ConflictKind};
pub use artifacts::objects::commit::{Author, Commit};
pub use artifacts::objects::object_id::ObjectId;
pub use artifacts::operation::merger::MergeOptions;
pub use artifacts::operation::state::{
    EmptyCommitPolicy, OperationInProgress, OperationKind, OperationState, TodoStep,
};
pub use errors::{OperationError, OperationResult, Outcome};
