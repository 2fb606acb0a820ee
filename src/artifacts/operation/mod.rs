//! Resumable multi-step operations
//!
//! - `state`: the durable operation record shared by all three orchestrators
//! - `merger`: branch merge (fast-forward detection, criss-cross bases)
//! - `rebaser`: step-synchronous replay of a branch onto a new base
//! - `cherry_picker`: replay of an explicit commit list onto HEAD

pub mod cherry_picker;
pub mod merger;
pub mod rebaser;
pub mod state;
