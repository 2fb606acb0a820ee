//! Common ancestor finder for merge operations
//!
//! Implements the search for the best common ancestor(s) between two commits,
//! the base commits three-way merges are computed against.
//!
//! ## Algorithm Overview
//!
//! ### Phase 1: Find All Common Ancestors
//!
//! A bidirectional graph traversal explores the commit history of both input
//! commits:
//! - Process commits newest-first (priority queue keyed by timestamp)
//! - Mark commits as visited from source or target side
//! - When a commit is visited from both sides, mark it as a common ancestor
//! - Mark ancestors of common ancestors as STALE to prune the search space
//!
//! ### Phase 2: Filter to Best Common Ancestors
//!
//! Apply the **Best Common Ancestor (BCA) Invariant**:
//! > A best common ancestor of commits X and Y is any common ancestor of X
//! > and Y that is not an ancestor of any other common ancestor.
//!
//! The visit states form a finite lattice and only ever grow, so the
//! traversal terminates even on degenerate parent graphs; an explicit step
//! limit guards against commit loaders that keep inventing new nodes.

use crate::artifacts::objects::commit::SlimCommit;
use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use tracing::trace;

/// Upper bound on traversal steps before the parent graph is declared
/// degenerate.
const MAX_TRAVERSAL_STEPS: usize = 1_000_000;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct VisitState: u8 {
        const NONE = 0b00;
        const VISITED_FROM_SOURCE = 0b01;
        const VISITED_FROM_TARGET = 0b10;
        const VISITED_FROM_BOTH = Self::VISITED_FROM_SOURCE.bits() | Self::VISITED_FROM_TARGET.bits();
        const STALE = 0b100; // Marks commits whose descendants already yielded a result
        const RESULT = 0b1000; // Marks commits identified as common ancestors
    }
}

impl fmt::Debug for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.contains(VisitState::VISITED_FROM_SOURCE) {
            flags.push("SOURCE");
        }
        if self.contains(VisitState::VISITED_FROM_TARGET) {
            flags.push("TARGET");
        }
        if self.contains(VisitState::STALE) {
            flags.push("STALE");
        }
        if self.contains(VisitState::RESULT) {
            flags.push("RESULT");
        }
        if flags.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

impl fmt::Display for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Finds the best common ancestors between commits in the parent graph
///
/// Takes a loader function that can produce a [`SlimCommit`] for any given
/// commit id, making it independent of the storage backend. Root commits must
/// come back with an empty parents vector.
pub struct BCAFinder<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> anyhow::Result<SlimCommit>,
{
    /// Function to load commit data for any given commit ID
    commit_loader: CommitLoaderFn,
}

impl<CommitLoaderFn> BCAFinder<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> anyhow::Result<SlimCommit>,
{
    pub fn new(commit_loader: CommitLoaderFn) -> Self {
        Self { commit_loader }
    }

    /// Finds all common ancestors between a source commit and a set of targets
    ///
    /// Traversal proceeds newest-first; visit states are inherited along
    /// parent edges. A commit reached from both sides becomes a RESULT, and
    /// everything reachable from it is STALE.
    fn find_common_ancestors(
        &self,
        source_commit_id: &ObjectId,
        target_commit_ids: HashSet<&ObjectId>,
    ) -> anyhow::Result<HashMap<ObjectId, VisitState>> {
        if target_commit_ids.contains(source_commit_id) {
            // If the source commit is also a target, it's the common ancestor
            return Ok(HashMap::from([(
                source_commit_id.clone(),
                VisitState::RESULT,
            )]));
        }

        let mut ancestors_states = HashMap::<ObjectId, VisitState>::new();
        let mut priority_queue = std::collections::BinaryHeap::new();

        // Add source and target commits with their respective visit states.
        // Process newest commits first (max heap keyed by timestamp).
        let source_commit = (self.commit_loader)(source_commit_id)?;
        ancestors_states.insert(source_commit.oid.clone(), VisitState::VISITED_FROM_SOURCE);
        priority_queue.push((source_commit.timestamp, source_commit.oid.clone()));

        for &target_commit_id in target_commit_ids.iter() {
            ancestors_states.insert(target_commit_id.clone(), VisitState::VISITED_FROM_TARGET);

            let target_commit = (self.commit_loader)(target_commit_id)?;
            priority_queue.push((target_commit.timestamp, target_commit.oid.clone()));
        }

        let mut steps = 0usize;

        while let Some((_, commit_id)) = priority_queue.pop() {
            steps += 1;
            if steps > MAX_TRAVERSAL_STEPS {
                anyhow::bail!("parent graph traversal exceeded {} steps", MAX_TRAVERSAL_STEPS);
            }

            let current_state = ancestors_states
                .get(&commit_id)
                .copied()
                .unwrap_or(VisitState::NONE);

            trace!(commit = %commit_id, state = %current_state, "processing commit");

            if current_state.contains(VisitState::STALE) {
                continue; // Skip already processed commits
            }

            // Check if this commit has been visited from both sides
            let is_common_ancestor = if current_state.contains(VisitState::VISITED_FROM_BOTH) {
                ancestors_states
                    .entry(commit_id.clone())
                    .and_modify(|state| *state |= VisitState::RESULT);
                true
            } else {
                false
            };

            // Load the commit to get its parents
            let current_commit = (self.commit_loader)(&commit_id)?;

            // Process all parents
            for parent_id in &current_commit.parents {
                let parent_commit = (self.commit_loader)(parent_id)?;
                let parent_state = ancestors_states
                    .get(parent_id)
                    .copied()
                    .unwrap_or(VisitState::NONE);

                // Inherit visit state from current commit
                let mut new_state = parent_state | current_state;
                if is_common_ancestor {
                    new_state |= VisitState::STALE;
                }

                // Only add to queue if we haven't processed this parent with this state
                if !parent_state.contains(current_state) {
                    ancestors_states.insert(parent_id.clone(), new_state);
                    priority_queue.push((parent_commit.timestamp, parent_id.clone()));
                }
            }
        }

        Ok(ancestors_states
            .into_iter()
            .filter(|(_, state)| {
                !state.contains(VisitState::STALE) && state.contains(VisitState::RESULT)
            })
            .collect())
    }

    /// Finds all best common ancestors between two commits
    ///
    /// Phase 1 collects every common ancestor; phase 2 drops each candidate
    /// that is reachable from another candidate. The surviving set is returned
    /// sorted by oid so callers observe a deterministic order regardless of
    /// traversal incidentals.
    pub fn find_best_common_ancestors(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
    ) -> anyhow::Result<Vec<ObjectId>> {
        let common_ancestors = self
            .find_common_ancestors(source_commit_id, HashSet::from([target_commit_id]))?
            .into_keys()
            .collect::<Vec<_>>();

        trace!(
            count = common_ancestors.len(),
            "common ancestors before redundancy filter"
        );

        let mut best = Vec::new();
        for candidate in &common_ancestors {
            let mut redundant = false;
            for other in &common_ancestors {
                if candidate == other {
                    continue;
                }
                if self.is_ancestor(candidate, other)? {
                    redundant = true;
                    break;
                }
            }
            if !redundant {
                best.push(candidate.clone());
            }
        }

        best.sort();
        Ok(best)
    }

    /// Finds one best common ancestor, if any exists
    pub fn find_best_common_ancestor(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
    ) -> anyhow::Result<Option<ObjectId>> {
        Ok(self
            .find_best_common_ancestors(source_commit_id, target_commit_id)?
            .into_iter()
            .next())
    }

    /// Whether `ancestor` is reachable from `descendant` via parent edges
    ///
    /// A commit is considered its own ancestor.
    pub fn is_ancestor(
        &self,
        ancestor: &ObjectId,
        descendant: &ObjectId,
    ) -> anyhow::Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }

        let mut visited = HashSet::new();
        let mut queue = vec![descendant.clone()];
        let mut steps = 0usize;

        while let Some(commit_id) = queue.pop() {
            steps += 1;
            if steps > MAX_TRAVERSAL_STEPS {
                anyhow::bail!("parent graph traversal exceeded {} steps", MAX_TRAVERSAL_STEPS);
            }

            if !visited.insert(commit_id.clone()) {
                continue;
            }

            let commit = (self.commit_loader)(&commit_id)?;
            for parent in &commit.parents {
                if parent == ancestor {
                    return Ok(true);
                }
                if !visited.contains(parent) {
                    queue.push(parent.clone());
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Build a loader over an in-memory graph description:
    /// (oid, parents, timestamp seconds)
    fn graph(
        commits: Vec<(&'static str, Vec<&'static str>, i64)>,
    ) -> impl Fn(&ObjectId) -> anyhow::Result<SlimCommit> {
        let table: HashMap<ObjectId, SlimCommit> = commits
            .into_iter()
            .map(|(id, parents, ts)| {
                let oid = oid(id);
                let slim = SlimCommit {
                    oid: oid.clone(),
                    parents: parents.into_iter().map(oid_of).collect(),
                    timestamp: chrono::DateTime::from_timestamp(ts, 0)
                        .unwrap()
                        .fixed_offset(),
                };
                (oid, slim)
            })
            .collect();

        move |id: &ObjectId| {
            table
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown commit {}", id))
        }
    }

    fn oid(label: &str) -> ObjectId {
        oid_of(label)
    }

    fn oid_of(label: &str) -> ObjectId {
        // pad the single-letter label out to a full 40-char id
        let c = label.chars().next().unwrap();
        ObjectId::try_parse(c.to_string().repeat(40)).unwrap()
    }

    #[test]
    fn test_linear_history_ancestor_is_base() {
        // a <- b <- c
        let loader = graph(vec![
            ("a", vec![], 100),
            ("b", vec!["a"], 200),
            ("c", vec!["b"], 300),
        ]);
        let finder = BCAFinder::new(loader);

        let bases = finder.find_best_common_ancestors(&oid("b"), &oid("c")).unwrap();
        assert_eq!(bases, vec![oid("b")]);
    }

    #[test]
    fn test_forked_history_finds_fork_point() {
        //     a
        //    / \
        //   b   c
        let loader = graph(vec![
            ("a", vec![], 100),
            ("b", vec!["a"], 200),
            ("c", vec!["a"], 300),
        ]);
        let finder = BCAFinder::new(loader);

        let bases = finder.find_best_common_ancestors(&oid("b"), &oid("c")).unwrap();
        assert_eq!(bases, vec![oid("a")]);
    }

    #[test]
    fn test_criss_cross_yields_two_bases() {
        //   a
        //  / \
        // b   c
        // |\ /|
        // | X |
        // |/ \|
        // d   e     (d merges b+c, e merges c+b)
        let loader = graph(vec![
            ("a", vec![], 100),
            ("b", vec!["a"], 200),
            ("c", vec!["a"], 210),
            ("d", vec!["b", "c"], 300),
            ("e", vec!["c", "b"], 310),
        ]);
        let finder = BCAFinder::new(loader);

        let mut bases = finder.find_best_common_ancestors(&oid("d"), &oid("e")).unwrap();
        bases.sort();
        assert_eq!(bases, vec![oid("b"), oid("c")]);
    }

    #[test]
    fn test_unrelated_histories_have_no_base() {
        let loader = graph(vec![
            ("a", vec![], 100),
            ("b", vec![], 110),
        ]);
        let finder = BCAFinder::new(loader);

        let bases = finder.find_best_common_ancestors(&oid("a"), &oid("b")).unwrap();
        assert!(bases.is_empty());
    }

    #[test]
    fn test_is_ancestor_walks_merge_parents() {
        let loader = graph(vec![
            ("a", vec![], 100),
            ("b", vec!["a"], 200),
            ("c", vec!["a"], 210),
            ("d", vec!["b", "c"], 300),
        ]);
        let finder = BCAFinder::new(loader);

        assert!(finder.is_ancestor(&oid("a"), &oid("d")).unwrap());
        assert!(finder.is_ancestor(&oid("c"), &oid("d")).unwrap());
        assert!(!finder.is_ancestor(&oid("d"), &oid("a")).unwrap());
    }

    #[test]
    fn test_cyclic_graph_terminates() {
        // a and b point at each other; the visit lattice still converges
        let loader = graph(vec![
            ("a", vec!["b"], 100),
            ("b", vec!["a"], 110),
            ("c", vec!["a"], 200),
            ("d", vec!["b"], 210),
        ]);
        let finder = BCAFinder::new(loader);

        // must not hang; any answer is acceptable for a malformed graph
        let _ = finder.find_best_common_ancestors(&oid("c"), &oid("d"));
    }
}
