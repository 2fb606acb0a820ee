//! Database entry types shared by trees, diffs and the merge engine

pub mod database_entry;
