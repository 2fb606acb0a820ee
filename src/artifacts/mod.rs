//! Data structures and algorithms
//!
//! - `branch`: Branch name validation and symbolic refs
//! - `database`: Database entry types
//! - `diff`: Tree diffing
//! - `index`: Index/staging area data structures
//! - `merge`: Merge algorithms and conflict resolution
//! - `objects`: Object types (blob, tree, commit)
//! - `operation`: Durable operation state and the three orchestrators

pub mod branch;
pub mod database;
pub mod diff;
pub mod index;
pub mod merge;
pub mod objects;
pub mod operation;
