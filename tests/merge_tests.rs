mod common;

use common::TestRepo;
use graft::{MergeOptions, OperationError, OperationKind, Outcome, Stage};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

#[test]
fn fast_forward_merge_moves_ref_without_creating_commit() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("readme.md", "hello\n", "initial commit");

    let tip = fixture.commit_file("feature.txt", "feature work\n", "add feature file");

    // rewind main onto the base, then merge the descendant back in
    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base.clone()).unwrap();
    fixture.repo.create_branch("topic", tip.clone()).unwrap();

    assert!(fixture.repo.merger().can_fast_forward("topic", None).unwrap());

    let outcome = fixture
        .repo
        .start_merge("topic", MergeOptions::default())
        .unwrap();

    assert_eq!(outcome, Outcome::FastForward(tip.clone()));
    assert_eq!(fixture.head(), tip);
    // no merge commit: the tip still has a single parent
    let head_commit = fixture.repo.database().load_commit(&tip).unwrap();
    assert!(!head_commit.is_merge());
    assert!(fixture.file_exists("feature.txt"));
    assert_eq!(fixture.repo.refs().list_branches().unwrap().len(), 2);
}

#[test]
fn merging_an_already_merged_branch_is_nothing_to_do() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("a.txt", "a\n", "first");
    fixture.repo.create_branch("old", base).unwrap();
    fixture.commit_file("b.txt", "b\n", "second");

    let outcome = fixture
        .repo
        .start_merge("old", MergeOptions::default())
        .unwrap();

    assert_eq!(outcome, Outcome::NothingToDo);
}

#[test]
fn diverged_branches_touching_different_files_merge_cleanly() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("shared.txt", "shared\n", "base");

    fixture.commit_file("theirs.txt", "their side\n", "feature work");
    fixture.repo.create_branch("feature", fixture.head()).unwrap();

    // move main back and diverge
    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base.clone()).unwrap();
    fixture.commit_file("ours.txt", "our side\n", "main work");

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();

    let merged = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };

    let commit = fixture.repo.database().load_commit(&merged).unwrap();
    assert_eq!(commit.parents().len(), 2);
    assert_eq!(commit.summary(), "Merge branch 'feature'");
    assert!(fixture.file_exists("ours.txt"));
    assert!(fixture.file_exists("theirs.txt"));
    assert!(fixture.file_exists("shared.txt"));
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn same_line_edited_differently_conflicts_with_markers() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("config.txt", "host=localhost\nport=8080\n", "base config");

    fixture.commit_file("config.txt", "host=localhost\nport=9090\n", "feature port");
    let feature_tip = fixture.head();
    fixture.repo.create_branch("feature", feature_tip).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture.commit_file("config.txt", "host=localhost\nport=7070\n", "main port");

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();

    assert_eq!(outcome, Outcome::Conflict(vec![PathBuf::from("config.txt")]));
    assert_eq!(
        fixture.repo.operation_in_progress().unwrap(),
        Some(OperationKind::Merge)
    );

    let conflicted = fixture.read_file("config.txt");
    assert!(conflicted.contains("<<<<<<< ours\n"));
    assert!(conflicted.contains("port=7070\n"));
    assert!(conflicted.contains("=======\n"));
    assert!(conflicted.contains("port=9090\n"));
    assert!(conflicted.contains(">>>>>>> theirs\n"));
    {
        let index = fixture.repo.index();
        assert!(index.has_conflicts());
        // all three sides are staged while the conflict is unresolved
        let path = Path::new("config.txt");
        assert!(index.staged_entry(path, Stage::Base).is_some());
        assert!(index.staged_entry(path, Stage::Ours).is_some());
        assert!(index.staged_entry(path, Stage::Theirs).is_some());
        assert!(index.entry_by_path(path).is_none());
    }

    // resolve, stage, continue
    fixture.write_file("config.txt", "host=localhost\nport=9999\n");
    fixture.stage("config.txt");

    let outcome = fixture.repo.continue_merge().unwrap();
    let merged = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };

    let commit = fixture.repo.database().load_commit(&merged).unwrap();
    assert_eq!(commit.parents().len(), 2);
    assert_eq!(fixture.read_file("config.txt"), "host=localhost\nport=9999\n");
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn identical_edits_on_both_sides_never_conflict() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("shared.txt", "original\n", "base");

    // both sides apply the identical change, plus one private file each
    fixture.write_file("shared.txt", "rewritten\n");
    fixture.stage("shared.txt");
    fixture.commit_file("feature-only.txt", "f\n", "feature change");
    let feature_tip = fixture.head();
    fixture.repo.create_branch("feature", feature_tip).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture.write_file("shared.txt", "rewritten\n");
    fixture.stage("shared.txt");
    fixture.commit_file("main-only.txt", "m\n", "main change");

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();

    assert!(matches!(outcome, Outcome::Success(_)));
    assert_eq!(fixture.read_file("shared.txt"), "rewritten\n");
    assert!(!fixture.repo.index().has_conflicts());
}

#[test]
fn delete_modify_conflict_keeps_modified_content_and_can_resolve_by_removal() {
    let fixture = TestRepo::init();
    fixture.commit_file("keep.txt", "keep\n", "add keep");
    let base = fixture.commit_file("contested.txt", "original\n", "add contested");

    // feature modifies the file
    fixture.commit_file("contested.txt", "modified by feature\n", "feature modifies");
    fixture.repo.create_branch("feature", fixture.head()).unwrap();

    // main deletes it
    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture
        .repo
        .unstage_and_remove(Path::new("contested.txt"))
        .unwrap();
    fixture.repo.commit("main deletes contested").unwrap();

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Conflict(vec![PathBuf::from("contested.txt")])
    );
    // the modified side is retained on disk; the deleting side has no stage
    assert_eq!(fixture.read_file("contested.txt"), "modified by feature\n");
    {
        let index = fixture.repo.index();
        let path = Path::new("contested.txt");
        assert!(index.staged_entry(path, Stage::Base).is_some());
        assert!(index.staged_entry(path, Stage::Ours).is_none());
        assert!(index.staged_entry(path, Stage::Theirs).is_some());
    }

    // resolve by agreeing with the deletion
    fixture
        .repo
        .unstage_and_remove(Path::new("contested.txt"))
        .unwrap();

    let outcome = fixture.repo.continue_merge().unwrap();
    let merged = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };

    let commit = fixture.repo.database().load_commit(&merged).unwrap();
    assert!(commit.is_merge());
    assert!(!fixture.file_exists("contested.txt"));
    assert!(fixture.file_exists("keep.txt"));
}

#[test]
fn continue_merge_with_unresolved_stages_fails() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");

    fixture.commit_file("f.txt", "two\n", "feature");
    fixture.repo.create_branch("feature", fixture.head()).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture.commit_file("f.txt", "three\n", "main");

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();
    assert!(outcome.is_conflict());

    // no resolution staged yet: continue must refuse, every time
    for _ in 0..2 {
        match fixture.repo.continue_merge() {
            Err(OperationError::Precondition(message)) => {
                assert!(message.contains("conflicts"));
            }
            other => panic!("expected precondition failure, got {:?}", other),
        }
    }
}

#[test]
fn continue_merge_without_a_merge_in_progress_fails() {
    let fixture = TestRepo::init();
    fixture.commit_file("a.txt", "a\n", "only commit");

    assert!(matches!(
        fixture.repo.continue_merge(),
        Err(OperationError::Precondition(_))
    ));
    assert!(matches!(
        fixture.repo.abort_merge(),
        Err(OperationError::Precondition(_))
    ));
}

#[test]
fn abort_restores_worktree_index_and_head() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\ncommon\n", "base");

    fixture.commit_file("f.txt", "two\ncommon\n", "feature");
    fixture.repo.create_branch("feature", fixture.head()).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base.clone()).unwrap();
    let main_tip = fixture.commit_file("f.txt", "three\ncommon\n", "main");

    let before_content = fixture.read_file("f.txt");
    let before_entries: Vec<_> = fixture
        .repo
        .index()
        .entries()
        .map(|entry| (entry.name.clone(), entry.oid.clone(), entry.stage))
        .collect();

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();
    assert!(outcome.is_conflict());

    let outcome = fixture.repo.abort_merge().unwrap();
    assert_eq!(outcome, Outcome::Success(main_tip.clone()));

    assert_eq!(fixture.head(), main_tip);
    assert_eq!(fixture.read_file("f.txt"), before_content);
    let after_entries: Vec<_> = fixture
        .repo
        .index()
        .entries()
        .map(|entry| (entry.name.clone(), entry.oid.clone(), entry.stage))
        .collect();
    assert_eq!(after_entries, before_entries);
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn rerunning_an_aborted_merge_yields_identical_conflicts() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("x.txt", "alpha\nbeta\n", "base");

    fixture.commit_file("x.txt", "alpha\nfeature\n", "feature edit");
    fixture.repo.create_branch("feature", fixture.head()).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture.commit_file("x.txt", "alpha\nmain\n", "main edit");

    let first = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();
    let first_file = fixture.read_file("x.txt");
    fixture.repo.abort_merge().unwrap();

    let second = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();
    let second_file = fixture.read_file("x.txt");

    assert_eq!(first, second);
    assert_eq!(first_file, second_file);
}

#[test]
fn fast_forward_can_be_suppressed() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("a.txt", "a\n", "base");

    let tip = fixture.commit_file("b.txt", "b\n", "descendant");
    fixture.repo.create_branch("topic", tip).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base.clone()).unwrap();

    let options = MergeOptions {
        allow_fast_forward: false,
        ..Default::default()
    };
    let outcome = fixture.repo.start_merge("topic", options).unwrap();

    let merged = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected a real merge commit, got {:?}", other),
    };

    let commit = fixture.repo.database().load_commit(&merged).unwrap();
    assert_eq!(commit.parents().len(), 2);
    assert_eq!(commit.parents()[0], base);
}

#[test]
fn starting_a_merge_while_one_is_suspended_fails() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");

    fixture.commit_file("f.txt", "two\n", "feature");
    fixture.repo.create_branch("feature", fixture.head()).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture.commit_file("f.txt", "three\n", "main");

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();
    assert!(outcome.is_conflict());

    match fixture.repo.start_merge("feature", MergeOptions::default()) {
        Err(OperationError::Precondition(message)) => {
            assert!(message.contains("in progress"));
        }
        other => panic!("expected precondition failure, got {:?}", other),
    }
}
