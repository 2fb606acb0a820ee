//! Line-based three-way content merge
//!
//! Merges two edited versions of a text file using their common ancestor.
//! Pairwise line diffs (base→ours, base→theirs) are computed with the Myers
//! algorithm; the results are reconciled chunk by chunk:
//!
//! - regions unchanged on one side take the other side,
//! - regions changed identically on both sides take either,
//! - regions changed differently become a conflict block delimited by
//!   `<<<<<<< ours / ======= / >>>>>>> theirs` markers.
//!
//! The merge is deterministic: identical inputs always produce identical
//! output, including chunk boundaries.

use similar::{Algorithm, DiffOp, capture_diff_slices};
use std::collections::HashMap;

pub const MARKER_OURS: &str = "<<<<<<< ours";
pub const MARKER_SEPARATOR: &str = "=======";
pub const MARKER_THEIRS: &str = ">>>>>>> theirs";

/// Result of a three-way text merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedText {
    /// Merged content; contains conflict markers when `clean` is false
    pub text: String,
    /// True when every chunk auto-merged
    pub clean: bool,
}

/// Merge two edited versions of `base` line by line
pub fn merge_text(base: &str, ours: &str, theirs: &str) -> MergedText {
    let base_lines = split_lines(base);
    let ours_lines = split_lines(ours);
    let theirs_lines = split_lines(theirs);

    let ours_map = match_map(&base_lines, &ours_lines);
    let theirs_map = match_map(&base_lines, &theirs_lines);

    let mut text = String::new();
    let mut clean = true;

    let (mut ib, mut io, mut it) = (0usize, 0usize, 0usize);

    while ib < base_lines.len() || io < ours_lines.len() || it < theirs_lines.len() {
        if ours_map.get(&ib) == Some(&io) && theirs_map.get(&ib) == Some(&it) {
            // all three agree on this line
            text.push_str(base_lines[ib]);
            ib += 1;
            io += 1;
            it += 1;
            continue;
        }

        // Unstable region: advance to the next point where both sides sync
        // up with the base again.
        let (jb, jo, jt) = next_sync_point(
            &base_lines,
            &ours_lines,
            &theirs_lines,
            &ours_map,
            &theirs_map,
            ib,
            io,
            it,
        );

        let base_chunk = &base_lines[ib..jb];
        let ours_chunk = &ours_lines[io..jo];
        let theirs_chunk = &theirs_lines[it..jt];

        if ours_chunk == base_chunk {
            // only theirs changed
            push_chunk(&mut text, theirs_chunk);
        } else if theirs_chunk == base_chunk || ours_chunk == theirs_chunk {
            // only ours changed, or both changed identically
            push_chunk(&mut text, ours_chunk);
        } else {
            clean = false;
            push_conflict(&mut text, ours_chunk, theirs_chunk);
        }

        ib = jb;
        io = jo;
        it = jt;
    }

    MergedText { text, clean }
}

/// Find the earliest base position at or after the cursors where both sides
/// are matched again; falls back to the end of all three inputs.
#[allow(clippy::too_many_arguments)]
fn next_sync_point(
    base: &[&str],
    ours: &[&str],
    theirs: &[&str],
    ours_map: &HashMap<usize, usize>,
    theirs_map: &HashMap<usize, usize>,
    ib: usize,
    io: usize,
    it: usize,
) -> (usize, usize, usize) {
    for jb in ib..base.len() {
        if let (Some(&jo), Some(&jt)) = (ours_map.get(&jb), theirs_map.get(&jb))
            && jo >= io
            && jt >= it
            && !(jb == ib && jo == io && jt == it)
        {
            return (jb, jo, jt);
        }
    }

    (base.len(), ours.len(), theirs.len())
}

/// Map of base line index → side line index for lines present in both
fn match_map(base: &[&str], side: &[&str]) -> HashMap<usize, usize> {
    let mut map = HashMap::new();

    for op in capture_diff_slices(Algorithm::Myers, base, side) {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for offset in 0..len {
                map.insert(old_index + offset, new_index + offset);
            }
        }
    }

    map
}

fn push_chunk(out: &mut String, chunk: &[&str]) {
    for line in chunk {
        out.push_str(line);
    }
}

/// Emit a conflict block; chunk lines lacking a trailing newline get one so
/// the closing marker stays on its own line.
fn push_conflict(out: &mut String, ours_chunk: &[&str], theirs_chunk: &[&str]) {
    out.push_str(MARKER_OURS);
    out.push('\n');
    push_chunk_terminated(out, ours_chunk);
    out.push_str(MARKER_SEPARATOR);
    out.push('\n');
    push_chunk_terminated(out, theirs_chunk);
    out.push_str(MARKER_THEIRS);
    out.push('\n');
}

fn push_chunk_terminated(out: &mut String, chunk: &[&str]) {
    for line in chunk {
        out.push_str(line);
        if !line.ends_with('\n') {
            out.push('\n');
        }
    }
}

fn split_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_non_overlapping_edits_auto_merge() {
        let base = "one\ntwo\nthree\nfour\nfive\n";
        let ours = "ONE\ntwo\nthree\nfour\nfive\n";
        let theirs = "one\ntwo\nthree\nfour\nFIVE\n";

        let merged = merge_text(base, ours, theirs);
        assert!(merged.clean);
        assert_eq!(merged.text, "ONE\ntwo\nthree\nfour\nFIVE\n");
    }

    #[test]
    fn test_identical_edits_merge_without_conflict() {
        let base = "a\nb\nc\n";
        let ours = "a\nB\nc\n";
        let theirs = "a\nB\nc\n";

        let merged = merge_text(base, ours, theirs);
        assert!(merged.clean);
        assert_eq!(merged.text, "a\nB\nc\n");
    }

    #[test]
    fn test_same_line_edited_differently_conflicts() {
        let base = "a\nb\nc\n";
        let ours = "a\nours-change\nc\n";
        let theirs = "a\ntheirs-change\nc\n";

        let merged = merge_text(base, ours, theirs);
        assert!(!merged.clean);
        assert_eq!(
            merged.text,
            "a\n<<<<<<< ours\nours-change\n=======\ntheirs-change\n>>>>>>> theirs\nc\n"
        );
    }

    #[test]
    fn test_one_side_unchanged_takes_other_side() {
        let base = "x\ny\n";
        let ours = "x\ny\n";
        let theirs = "x\nrewritten\nz\n";

        let merged = merge_text(base, ours, theirs);
        assert!(merged.clean);
        assert_eq!(merged.text, "x\nrewritten\nz\n");
    }

    #[test]
    fn test_deletion_against_unchanged_side() {
        let base = "keep\ndrop\nkeep2\n";
        let ours = "keep\nkeep2\n";
        let theirs = "keep\ndrop\nkeep2\n";

        let merged = merge_text(base, ours, theirs);
        assert!(merged.clean);
        assert_eq!(merged.text, "keep\nkeep2\n");
    }

    #[test]
    fn test_delete_versus_edit_conflicts() {
        let base = "keep\ncontested\nkeep2\n";
        let ours = "keep\nkeep2\n";
        let theirs = "keep\nedited\nkeep2\n";

        let merged = merge_text(base, ours, theirs);
        assert!(!merged.clean);
        assert!(merged.text.contains(MARKER_OURS));
        assert!(merged.text.contains("edited\n"));
    }

    #[test]
    fn test_both_append_same_content() {
        let base = "a\n";
        let ours = "a\nb\n";
        let theirs = "a\nb\n";

        let merged = merge_text(base, ours, theirs);
        assert!(merged.clean);
        assert_eq!(merged.text, "a\nb\n");
    }

    #[test]
    fn test_empty_base_with_diverging_adds_conflicts() {
        let merged = merge_text("", "ours content\n", "theirs content\n");
        assert!(!merged.clean);
        assert_eq!(
            merged.text,
            "<<<<<<< ours\nours content\n=======\ntheirs content\n>>>>>>> theirs\n"
        );
    }

    #[test]
    fn test_merge_is_deterministic() {
        let base = "1\n2\n3\n4\n5\n6\n7\n";
        let ours = "1\nx\n3\n4\ny\n6\n7\n";
        let theirs = "1\n2\nz\n4\n5\nw\n7\n";

        let first = merge_text(base, ours, theirs);
        let second = merge_text(base, ours, theirs);
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_trailing_newline_still_closes_markers() {
        let merged = merge_text("line\n", "ours", "theirs");
        assert!(!merged.clean);
        assert!(merged.text.ends_with(">>>>>>> theirs\n"));
    }
}
