use crate::artifacts::index::entry_mode::{EntryMode, FileMode};
use crate::artifacts::index::index_entry::EntryMetadata;
use crate::artifacts::objects::blob::Blob;
use anyhow::Context;
use bytes::Bytes;
use std::io::Write;
use std::path::Path;

/// Working directory manager
///
/// Owns all reads and writes of working files. Merge results, conflict-marker
/// text and forced checkouts all flow through here; nothing else touches the
/// worktree.
#[derive(Debug)]
pub struct Workspace {
    path: Box<Path>,
}

impl Workspace {
    pub fn new(path: Box<Path>) -> Self {
        Workspace { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a working file into a blob
    pub fn parse_blob(&self, path: &Path) -> anyhow::Result<Blob> {
        let data = self.read_file_bytes(path)?;
        Ok(Blob::from_bytes(data))
    }

    pub fn read_file_bytes(&self, file_path: &Path) -> anyhow::Result<Bytes> {
        let file_path = self.path.join(file_path);

        let content = std::fs::read(&file_path)
            .with_context(|| format!("Unable to read file {}", file_path.display()))?;

        Ok(Bytes::from(content))
    }

    pub fn file_exists(&self, file_path: &Path) -> bool {
        self.path.join(file_path).is_file()
    }

    /// Write a working file, creating parent directories as needed
    ///
    /// The executable bit follows the entry mode. Existing content is
    /// overwritten without any conflict check; callers decide safety.
    pub fn write_file(&self, file_path: &Path, data: &[u8], mode: &EntryMode) -> anyhow::Result<()> {
        let path = self.path.join(file_path);

        if let Some(parent) = path.parent() {
            // a file standing where a directory is needed loses
            if parent.is_file() {
                std::fs::remove_file(parent).with_context(|| {
                    format!("Failed to clear blocking file at {}", parent.display())
                })?;
            }
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        if path.is_dir() {
            std::fs::remove_dir_all(&path).with_context(|| {
                format!("Failed to clear blocking directory at {}", path.display())
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to open file: {:?}", file_path))?;

        file.write_all(data)
            .with_context(|| format!("Failed to write to file: {:?}", file_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let unix_mode = match mode {
                EntryMode::File(FileMode::Executable) => 0o755,
                _ => 0o644,
            };
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(unix_mode))
                .with_context(|| format!("Failed to set permissions for file: {:?}", file_path))?;
        }

        Ok(())
    }

    /// Remove a working file and prune any directories it leaves empty
    pub fn remove_file(&self, file_path: &Path) -> anyhow::Result<()> {
        let path = self.path.join(file_path);

        if path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove file: {:?}", file_path))?;
        }

        self.prune_empty_parent_dirs(file_path)?;

        Ok(())
    }

    fn prune_empty_parent_dirs(&self, file_path: &Path) -> anyhow::Result<()> {
        let mut parent = file_path.parent();

        while let Some(dir) = parent {
            if dir.as_os_str().is_empty() {
                break;
            }

            let abs_dir = self.path.join(dir);
            match abs_dir.read_dir() {
                Ok(mut entries) => {
                    if entries.next().is_none() {
                        std::fs::remove_dir(&abs_dir).with_context(|| {
                            format!("Failed to remove empty directory: {:?}", dir)
                        })?;
                    } else {
                        break;
                    }
                }
                Err(_) => break,
            }

            parent = dir.parent();
        }

        Ok(())
    }

    pub fn stat_file(&self, file_path: &Path) -> anyhow::Result<EntryMetadata> {
        let abs_path = self.path.join(file_path);
        let metadata = std::fs::metadata(&abs_path)?;

        (abs_path.as_path(), metadata).try_into()
    }
}
