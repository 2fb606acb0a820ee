//! Merge algorithms and conflict resolution
//!
//! - `bca_finder`: best common ancestor search over the parent graph
//! - `three_way`: line-based three-way content merge (diff3)
//! - `conflict`: the closed conflict classification table
//! - `apply`: the shared per-commit merge apply used by merge, rebase and
//!   cherry-pick

pub mod apply;
pub mod bca_finder;
pub mod conflict;
pub mod three_way;
