mod common;

use common::TestRepo;
use graft::{EmptyCommitPolicy, MergeOptions, OperationError, OperationKind, Outcome};
use pretty_assertions::assert_eq;

/// Drive a repo into a suspended merge and return the fixture
fn suspended_merge() -> TestRepo {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");

    fixture.commit_file("f.txt", "feature\n", "feature edit");
    fixture.repo.create_branch("feature", fixture.head()).unwrap();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    fixture.commit_file("f.txt", "main\n", "main edit");

    let outcome = fixture
        .repo
        .start_merge("feature", MergeOptions::default())
        .unwrap();
    assert!(outcome.is_conflict());

    fixture
}

#[test]
fn state_exists_exactly_while_an_operation_is_in_progress() {
    let fixture = TestRepo::init();
    fixture.commit_file("a.txt", "a\n", "first");

    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
    assert!(!fixture.repo.op_store().in_progress());

    let fixture = suspended_merge();
    assert_eq!(
        fixture.repo.operation_in_progress().unwrap(),
        Some(OperationKind::Merge)
    );
    assert!(fixture.repo.op_store().in_progress());

    fixture.repo.abort_merge().unwrap();
    assert_eq!(fixture.repo.operation_in_progress().unwrap(), None);
    assert!(!fixture.repo.op_store().in_progress());
}

#[test]
fn only_one_operation_may_run_at_a_time() {
    let fixture = suspended_merge();

    assert!(matches!(
        fixture.repo.start_rebase("feature", EmptyCommitPolicy::Stop),
        Err(OperationError::Precondition(_))
    ));
    assert!(matches!(
        fixture
            .repo
            .start_cherry_pick(&[fixture.head()], EmptyCommitPolicy::Stop),
        Err(OperationError::Precondition(_))
    ));
    assert!(matches!(
        fixture.repo.start_merge("feature", MergeOptions::default()),
        Err(OperationError::Precondition(_))
    ));
}

#[test]
fn continuing_the_wrong_operation_kind_fails() {
    let fixture = suspended_merge();

    match fixture.repo.continue_rebase(None, None) {
        Err(OperationError::Precondition(message)) => {
            assert!(message.contains("merge"));
        }
        other => panic!("expected precondition failure, got {:?}", other),
    }
    assert!(matches!(
        fixture.repo.continue_cherry_pick(),
        Err(OperationError::Precondition(_))
    ));
}

#[test]
fn suspended_merge_survives_reopening_the_repository() {
    let fixture = suspended_merge();

    // a fresh handle sees the same persisted state, as after a restart
    let reopened = fixture.reopen();
    assert_eq!(
        reopened.operation_in_progress().unwrap(),
        Some(OperationKind::Merge)
    );

    fixture.write_file("f.txt", "resolved\n");
    reopened.stage_file(std::path::Path::new("f.txt")).unwrap();

    let outcome = reopened.continue_merge().unwrap();
    let merged = match outcome {
        Outcome::Success(oid) => oid,
        other => panic!("expected success, got {:?}", other),
    };

    let commit = reopened.database().load_commit(&merged).unwrap();
    assert_eq!(commit.parents().len(), 2);
    assert_eq!(reopened.operation_in_progress().unwrap(), None);
}

#[test]
fn abort_after_reopen_matches_immediate_abort() {
    let fixture = suspended_merge();
    let main_tip = fixture.head();

    let reopened = fixture.reopen();
    let outcome = reopened.abort_merge().unwrap();

    assert_eq!(outcome, Outcome::Success(main_tip.clone()));
    assert_eq!(reopened.head_oid().unwrap().unwrap(), main_tip);
    assert_eq!(fixture.read_file("f.txt"), "main\n");
    assert_eq!(reopened.operation_in_progress().unwrap(), None);
}

#[test]
fn suspended_rebase_survives_reopening_the_repository() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");

    fixture.commit_file("f.txt", "feature\n", "feature edit");
    let feature_tip = fixture.head();

    fixture.repo.reset_hard(&base).unwrap();
    fixture.repo.refs().update_head(base).unwrap();
    let main_tip = fixture.commit_file("f.txt", "main\n", "main edit");

    fixture.repo.create_branch("target", main_tip).unwrap();
    fixture.repo.reset_hard(&feature_tip).unwrap();
    fixture.repo.refs().update_head(feature_tip).unwrap();

    let outcome = fixture
        .repo
        .start_rebase("target", EmptyCommitPolicy::Stop)
        .unwrap();
    assert!(outcome.is_conflict());

    let reopened = fixture.reopen();
    assert_eq!(
        reopened.operation_in_progress().unwrap(),
        Some(OperationKind::Rebase)
    );

    fixture.write_file("f.txt", "resolved\n");
    reopened.stage_file(std::path::Path::new("f.txt")).unwrap();

    let outcome = reopened.continue_rebase(None, None).unwrap();
    assert!(matches!(outcome, Outcome::Success(_)));
    assert_eq!(reopened.operation_in_progress().unwrap(), None);
}

#[test]
fn unreadable_state_reports_corruption() {
    let fixture = suspended_merge();

    let kind_record = fixture.repo.git_path().join("op-state").join("kind");
    std::fs::write(&kind_record, "octopus").unwrap();

    match fixture.repo.operation_in_progress() {
        Err(OperationError::CorruptState(message)) => {
            assert!(message.contains("octopus"));
        }
        other => panic!("expected corrupt state, got {:?}", other),
    }
}

#[test]
fn out_of_range_cursor_reports_corruption() {
    let fixture = suspended_merge();

    let cursor_record = fixture.repo.git_path().join("op-state").join("cursor");
    std::fs::write(&cursor_record, "42").unwrap();

    assert!(matches!(
        fixture.repo.operation_in_progress(),
        Err(OperationError::CorruptState(_))
    ));
}

#[test]
fn starting_with_a_dirty_worktree_fails() {
    let fixture = TestRepo::init();
    let base = fixture.commit_file("f.txt", "one\n", "base");
    fixture.repo.create_branch("feature", base).unwrap();

    // modify without staging
    fixture.write_file("f.txt", "dirty\n");

    match fixture.repo.start_merge("feature", MergeOptions::default()) {
        Err(OperationError::Precondition(message)) => {
            assert!(message.contains("uncommitted"));
        }
        other => panic!("expected precondition failure, got {:?}", other),
    }
}
