mod common;

use common::TestRepo;
use graft::{EmptyCommitPolicy, OperationError, OperationKind, Outcome};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

#[test]
fn cherry_pick_applies_a_commit_onto_head() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("base.txt", "base\n", "base");

    let picked = fixture.commit_file("feature.txt", "feature\n", "feature: add file");

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base.clone()).unwrap();
    let main_tip = fixture.commit_file("main.txt", "main\n", "main work");

    let outcome = fixture
        .repo
        .start_cherry_pick(&[picked.clone()], EmptyCommitPolicy::Stop)
        .unwrap();

    let new_tip = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };

    assert!(fixture.file_exists("feature.txt"));
    assert!(fixture.file_exists("main.txt"));

    let commit = fixture.repo.database().load_commit(&new_tip).unwrap();
    assert_eq!(commit.parents(), &[main_tip]);
    assert_eq!(commit.summary(), "feature: add file");
    assert_eq!(commit.author().name(), "Test Author");
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn cherry_picking_multiple_commits_chains_them_in_order() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("base.txt", "base\n", "base");

    let first = fixture.commit_file("one.txt", "one\n", "add one");
    let second = fixture.commit_file("two.txt", "two\n", "add two");

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base.clone()).unwrap();

    let outcome = fixture
        .repo
        .start_cherry_pick(&[first, second], EmptyCommitPolicy::Stop)
        .unwrap();

    assert!(matches!(outcome, Outcome::Success(_)));
    assert!(fixture.file_exists("one.txt"));
    assert!(fixture.file_exists("two.txt"));

    let summaries: Vec<String> = fixture
        .first_parent_log()
        .iter()
        .map(|oid| fixture.repo.database().load_commit(oid).unwrap().summary())
        .collect();
    assert_eq!(
        summaries,
        vec![
            "add two".to_string(),
            "add one".to_string(),
            "base".to_string(),
        ]
    );
}

#[test]
fn cherry_pick_conflict_pauses_then_continues() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "original\n", "base");

    let picked = fixture.commit_file("f.txt", "feature version\n", "feature edit");

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture.commit_file("f.txt", "main version\n", "main edit");

    let outcome = fixture
        .repo
        .start_cherry_pick(&[picked], EmptyCommitPolicy::Stop)
        .unwrap();

    assert_eq!(outcome, Outcome::Conflict(vec![PathBuf::from("f.txt")]));
    assert_eq!(
        fixture.repo.operation_in_progress().unwrap(),
        Some(OperationKind::CherryPick)
    );
    assert!(fixture.read_file("f.txt").contains("<<<<<<< ours"));

    fixture.write_file("f.txt", "reconciled version\n");
    fixture.stage("f.txt");

    let outcome = fixture.repo.continue_cherry_pick().unwrap();
    let new_tip = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };

    let commit = fixture.repo.database().load_commit(&new_tip).unwrap();
    assert_eq!(commit.summary(), "feature edit");
    assert_eq!(fixture.read_file("f.txt"), "reconciled version\n");
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn already_applied_change_with_skip_policy_produces_nothing() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");

    let picked = fixture.commit_file("f.txt", "shared\n", "duplicated change");

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    let main_tip = fixture.commit_file("f.txt", "shared\n", "same change on main");

    let outcome = fixture
        .repo
        .start_cherry_pick(&[picked], EmptyCommitPolicy::Skip)
        .unwrap();

    // no commit, no pause
    assert_eq!(outcome, Outcome::Success(main_tip.clone()));
    assert_eq!(fixture.head(), main_tip);
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn already_applied_change_with_stop_policy_requires_force_or_abort() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");

    let picked = fixture.commit_file("f.txt", "shared\n", "duplicated change");

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    let main_tip = fixture.commit_file("f.txt", "shared\n", "same change on main");

    let outcome = fixture
        .repo
        .start_cherry_pick(&[picked.clone()], EmptyCommitPolicy::Stop)
        .unwrap();

    assert_eq!(outcome, Outcome::EmptyCommit(picked));
    assert_eq!(
        fixture.repo.operation_in_progress().unwrap(),
        Some(OperationKind::CherryPick)
    );

    // plain continue refuses the empty step
    match fixture.repo.continue_cherry_pick() {
        Err(OperationError::Precondition(message)) => {
            assert!(message.contains("empty"));
        }
        other => panic!("expected precondition failure, got {:?}", other),
    }

    // forcing converts the pause into a kept empty commit
    let outcome = fixture.repo.cherry_pick_force_empty().unwrap();
    let new_tip = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };

    let commit = fixture.repo.database().load_commit(&new_tip).unwrap();
    let parent = fixture
        .repo
        .database()
        .load_commit(&main_tip)
        .unwrap();
    assert_eq!(commit.tree_oid(), parent.tree_oid());
    assert_eq!(commit.summary(), "duplicated change");
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn keep_policy_commits_empty_steps_without_pausing() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");

    let picked = fixture.commit_file("f.txt", "shared\n", "duplicated change");

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    let main_tip = fixture.commit_file("f.txt", "shared\n", "same change on main");

    let outcome = fixture
        .repo
        .start_cherry_pick(&[picked], EmptyCommitPolicy::Keep)
        .unwrap();

    let new_tip = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };
    assert_ne!(new_tip, main_tip);

    let commit = fixture.repo.database().load_commit(&new_tip).unwrap();
    let parent = fixture.repo.database().load_commit(&main_tip).unwrap();
    assert_eq!(commit.tree_oid(), parent.tree_oid());
}

#[test]
fn abort_cherry_pick_moves_branch_back() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "original\n", "base");

    let clean = fixture.commit_file("clean.txt", "clean\n", "clean pick");
    let conflicting = fixture.commit_file("f.txt", "feature version\n", "conflicting pick");

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    let main_tip = fixture.commit_file("f.txt", "main version\n", "main edit");

    // first pick lands, second suspends
    let outcome = fixture
        .repo
        .start_cherry_pick(&[clean, conflicting], EmptyCommitPolicy::Stop)
        .unwrap();
    assert!(outcome.is_conflict());

    let outcome = fixture.repo.abort_cherry_pick().unwrap();
    assert_eq!(outcome, Outcome::Success(main_tip.clone()));

    // the committed first step is rolled back too
    assert_eq!(fixture.head(), main_tip);
    assert!(!fixture.file_exists("clean.txt"));
    assert_eq!(fixture.read_file("f.txt"), "main version\n");
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
}

#[test]
fn cherry_picking_nothing_is_nothing_to_do() {
    let fixture = TestRepo::init();
    fixture.commit_file("a.txt", "a\n", "only commit");

    let outcome = fixture
        .repo
        .start_cherry_pick(&[], EmptyCommitPolicy::Stop)
        .unwrap();

    assert_eq!(outcome, Outcome::NothingToDo);
}
