//! Filesystem access for the working tree
//!
//! All paths taken by [`Workspace`] are relative to the working-copy root; the empty path is
//! the root itself. Only the journal applier writes through these helpers; reconciliation only
//! reads.

use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::object::Object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::ItemType;
use crate::config::ATTR_EXECUTABLE;
use anyhow::Context;
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Name of the metadata directory at the working-copy root
pub const METADATA_DIR: &str = ".grove";
const BACKUP_MARKER: &str = "grove";

/// One directory entry as seen by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub name: String,
    pub item_type: ItemType,
    pub size: u64,
    pub mtime_ns: i64,
    pub attrbits: u64,
}

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

    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.path.join(relative)
    }

    fn entry_from_metadata(
        &self,
        name: String,
        absolute: &Path,
        metadata: &std::fs::Metadata,
    ) -> ScanEntry {
        let file_type = metadata.file_type();
        let item_type = if file_type.is_symlink() {
            ItemType::Symlink
        } else if file_type.is_dir() {
            ItemType::Directory
        } else {
            ItemType::File
        };
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|duration| duration.as_nanos() as i64)
            .unwrap_or_default();
        let attrbits = if item_type == ItemType::File && is_executable::is_executable(absolute) {
            ATTR_EXECUTABLE
        } else {
            0
        };

        ScanEntry {
            name,
            item_type,
            size: metadata.len(),
            mtime_ns,
            attrbits,
        }
    }

    /// List a directory without following symlinks
    ///
    /// Entries whose names are not valid UTF-8 cannot be versioned and are skipped.
    pub fn scan_dir(&self, relative: &Path) -> anyhow::Result<Vec<ScanEntry>> {
        let absolute = self.absolute(relative);
        let mut entries = Vec::new();

        for entry in std::fs::read_dir(&absolute)
            .with_context(|| format!("failed to scan directory {}", absolute.display()))?
        {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                warn!(dir = %absolute.display(), "skipping entry with a non UTF-8 name");
                continue;
            };
            let metadata = std::fs::symlink_metadata(entry.path())?;
            entries.push(self.entry_from_metadata(name, &entry.path(), &metadata));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        trace!(dir = %relative.display(), count = entries.len(), "scanned directory");
        Ok(entries)
    }

    pub fn stat(&self, relative: &Path) -> anyhow::Result<Option<ScanEntry>> {
        let absolute = self.absolute(relative);
        let metadata = match std::fs::symlink_metadata(&absolute) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to stat {}", absolute.display()));
            }
        };
        let name = relative
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Some(self.entry_from_metadata(name, &absolute, &metadata)))
    }

    pub fn exists(&self, relative: &Path) -> bool {
        std::fs::symlink_metadata(self.absolute(relative)).is_ok()
    }

    /// Bytes of a file, or the target of a symlink
    pub fn read_content(&self, relative: &Path, item_type: ItemType) -> anyhow::Result<Bytes> {
        let absolute = self.absolute(relative);

        match item_type {
            ItemType::File => Ok(std::fs::read(&absolute)
                .with_context(|| format!("failed to read {}", absolute.display()))?
                .into()),
            ItemType::Symlink => {
                let target = std::fs::read_link(&absolute)
                    .with_context(|| format!("failed to read link {}", absolute.display()))?;
                Ok(Bytes::from(target.to_string_lossy().into_owned()))
            }
            ItemType::Directory => {
                anyhow::bail!("{} is a directory and has no content", relative.display())
            }
        }
    }

    pub fn hash(&self, relative: &Path, item_type: ItemType) -> anyhow::Result<ObjectId> {
        Blob::new(self.read_content(relative, item_type)?).object_id()
    }

    /// Write a file or symlink; an existing file is replaced
    pub fn write_content(
        &self,
        relative: &Path,
        item_type: ItemType,
        content: &[u8],
        attrbits: u64,
    ) -> anyhow::Result<()> {
        let absolute = self.absolute(relative);

        match item_type {
            ItemType::File => {
                if absolute.is_symlink() {
                    std::fs::remove_file(&absolute)?;
                }
                let mut file = std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&absolute)
                    .with_context(|| format!("failed to open {}", absolute.display()))?;
                file.write_all(content)
                    .with_context(|| format!("failed to write {}", absolute.display()))?;
                self.set_attrbits(relative, attrbits)
            }
            ItemType::Symlink => {
                if self.exists(relative) {
                    std::fs::remove_file(&absolute)?;
                }
                let target = String::from_utf8_lossy(content).into_owned();
                Self::symlink(&target, &absolute)
            }
            ItemType::Directory => {
                anyhow::bail!("cannot write content to directory {}", relative.display())
            }
        }
    }

    #[cfg(unix)]
    fn symlink(target: &str, link: &Path) -> anyhow::Result<()> {
        std::os::unix::fs::symlink(target, link)
            .with_context(|| format!("failed to create symlink {}", link.display()))
    }

    #[cfg(not(unix))]
    fn symlink(_target: &str, link: &Path) -> anyhow::Result<()> {
        Err(crate::error::WcError::Unsupported(format!(
            "symlink {} on this platform",
            link.display()
        ))
        .into())
    }

    pub fn set_attrbits(&self, relative: &Path, attrbits: u64) -> anyhow::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let absolute = self.absolute(relative);
            let mode = if attrbits & ATTR_EXECUTABLE != 0 { 0o755 } else { 0o644 };
            std::fs::set_permissions(&absolute, std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set permissions on {}", absolute.display()))?;
        }
        #[cfg(not(unix))]
        let _ = (relative, attrbits);

        Ok(())
    }

    pub fn make_directory(&self, relative: &Path) -> anyhow::Result<()> {
        let absolute = self.absolute(relative);
        if absolute.is_dir() {
            return Ok(());
        }

        std::fs::create_dir(&absolute)
            .with_context(|| format!("failed to create directory {}", absolute.display()))
    }

    pub fn remove_file(&self, relative: &Path) -> anyhow::Result<()> {
        let absolute = self.absolute(relative);
        match std::fs::remove_file(&absolute) {
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            result => {
                result.with_context(|| format!("failed to remove {}", absolute.display()))
            }
        }
    }

    /// Remove an empty directory
    ///
    /// A directory still holding uncontrolled entries is left in place; returns whether it was
    /// removed.
    pub fn remove_directory(&self, relative: &Path) -> anyhow::Result<bool> {
        let absolute = self.absolute(relative);
        if !absolute.exists() {
            return Ok(true);
        }
        if std::fs::read_dir(&absolute)?.next().is_some() {
            warn!(dir = %absolute.display(), "directory not empty, leaving it in place");
            return Ok(false);
        }

        std::fs::remove_dir(&absolute)
            .with_context(|| format!("failed to remove directory {}", absolute.display()))?;
        Ok(true)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        let (from, to) = (self.absolute(from), self.absolute(to));

        std::fs::rename(&from, &to)
            .with_context(|| format!("failed to rename {} to {}", from.display(), to.display()))
    }

    /// Whether two paths name the same file, e.g. a case-only rename on a folding filesystem
    pub fn same_file(&self, a: &Path, b: &Path) -> bool {
        match (
            std::fs::canonicalize(self.absolute(a)),
            std::fs::canonicalize(self.absolute(b)),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// First free `<name>~grove<NN>~` sibling of a path
    pub fn backup_path(&self, relative: &Path) -> PathBuf {
        let name = relative
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        (0..)
            .map(|n| relative.with_file_name(format!("{name}~{BACKUP_MARKER}{n:02}~")))
            .find(|candidate| !self.exists(candidate))
            .unwrap_or_else(|| relative.with_file_name(format!("{name}~{BACKUP_MARKER}~")))
    }

    /// Copy a file aside before it is overwritten
    pub fn backup(&self, relative: &Path) -> anyhow::Result<Option<PathBuf>> {
        if !self.absolute(relative).is_file() {
            return Ok(None);
        }

        let backup = self.backup_path(relative);
        std::fs::copy(self.absolute(relative), self.absolute(&backup))
            .with_context(|| format!("failed to back up {}", relative.display()))?;
        Ok(Some(backup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn workspace_dir() -> TempDir {
        TempDir::new().expect("Failed to create temp dir")
    }

    #[rstest]
    fn scans_are_sorted_and_typed(workspace_dir: TempDir) -> anyhow::Result<()> {
        workspace_dir.child("b.txt").write_str("b")?;
        workspace_dir.child("a").create_dir_all()?;
        let workspace = Workspace::new(workspace_dir.path().into());

        let entries = workspace.scan_dir(Path::new(""))?;

        let names = entries.iter().map(|e| (e.name.as_str(), e.item_type)).collect::<Vec<_>>();
        assert_eq!(names, vec![("a", ItemType::Directory), ("b.txt", ItemType::File)]);
        Ok(())
    }

    #[cfg(unix)]
    #[rstest]
    fn written_files_carry_the_executable_bit(workspace_dir: TempDir) -> anyhow::Result<()> {
        let workspace = Workspace::new(workspace_dir.path().into());

        workspace.write_content(Path::new("run.sh"), ItemType::File, b"#!/bin/sh\n", ATTR_EXECUTABLE)?;
        workspace.write_content(Path::new("link"), ItemType::Symlink, b"run.sh", 0)?;

        let entry = workspace.stat(Path::new("run.sh"))?.context("stat")?;
        assert_eq!(entry.attrbits, ATTR_EXECUTABLE);
        assert_eq!(
            workspace.read_content(Path::new("link"), ItemType::Symlink)?,
            Bytes::from_static(b"run.sh")
        );
        Ok(())
    }

    #[rstest]
    fn backups_never_overwrite_each_other(workspace_dir: TempDir) -> anyhow::Result<()> {
        workspace_dir.child("a.txt").write_str("one")?;
        let workspace = Workspace::new(workspace_dir.path().into());

        let first = workspace.backup(Path::new("a.txt"))?;
        let second = workspace.backup(Path::new("a.txt"))?;

        assert_eq!(first, Some(PathBuf::from("a.txt~grove00~")));
        assert_eq!(second, Some(PathBuf::from("a.txt~grove01~")));
        Ok(())
    }

    #[rstest]
    fn non_empty_directories_are_left_behind(workspace_dir: TempDir) -> anyhow::Result<()> {
        workspace_dir.child("d/keep.txt").write_str("x")?;
        workspace_dir.child("e").create_dir_all()?;
        let workspace = Workspace::new(workspace_dir.path().into());

        assert!(!workspace.remove_directory(Path::new("d"))?);
        assert!(workspace.remove_directory(Path::new("e"))?);
        assert!(workspace_dir.child("d/keep.txt").path().exists());
        Ok(())
    }
}
