//! Tree comparison
//!
//! Produces the set of per-path changes between two stored trees. The merge
//! engine runs this twice (base→ours and base→theirs) and works on the union.

pub mod tree_diff;
