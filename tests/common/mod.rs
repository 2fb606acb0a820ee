#![allow(dead_code)]

//! Shared fixtures for integration tests
//!
//! Each test gets a fresh temp repository with a configured acting identity.

use assert_fs::TempDir;
use graft::{ObjectId, Repository};
use std::path::Path;
use std::sync::Once;

static IDENTITY: Once = Once::new();

/// Install the acting identity used by every test commit
pub fn set_identity() {
    IDENTITY.call_once(|| unsafe {
        std::env::set_var("GIT_AUTHOR_NAME", "Test Author");
        std::env::set_var("GIT_AUTHOR_EMAIL", "test@example.com");
    });
}

pub struct TestRepo {
    // owns the directory for the lifetime of the test
    _dir: TempDir,
    pub repo: Repository,
}

impl TestRepo {
    pub fn init() -> Self {
        set_identity();

        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path().to_str().unwrap()).unwrap();

        TestRepo { _dir: dir, repo }
    }

    /// Reopen the repository as a fresh process would
    pub fn reopen(&self) -> Repository {
        Repository::open(self.repo.path().to_str().unwrap()).unwrap()
    }

    pub fn write_file(&self, path: &str, content: &str) {
        let full = self.repo.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    pub fn read_file(&self, path: &str) -> String {
        std::fs::read_to_string(self.repo.path().join(path)).unwrap()
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.repo.path().join(path).is_file()
    }

    pub fn stage(&self, path: &str) {
        self.repo.stage_file(Path::new(path)).unwrap();
    }

    /// Write, stage and commit one file
    pub fn commit_file(&self, path: &str, content: &str, message: &str) -> ObjectId {
        self.write_file(path, content);
        self.stage(path);
        self.repo.commit(message).unwrap()
    }

    pub fn head(&self) -> ObjectId {
        self.repo.head_oid().unwrap().unwrap()
    }

    /// Commit oids reachable from HEAD following first parents, newest first
    pub fn first_parent_log(&self) -> Vec<ObjectId> {
        let mut log = Vec::new();
        let mut cursor = self.repo.head_oid().unwrap();

        while let Some(oid) = cursor {
            let commit = self.repo.database().load_commit(&oid).unwrap();
            log.push(oid);
            cursor = commit.parent().cloned();
        }

        log
    }
}
