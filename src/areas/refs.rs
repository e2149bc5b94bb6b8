//! Branch heads
//!
//! Each branch is a text file under `<repo>/refs/heads/<name>` holding the 40-character id of
//! the changeset at its tip. Hierarchical names (`feature/login`) map to nested directories.
//! Writers take an exclusive `file-guard` lock on the ref file for the duration of the update.

use crate::artifacts::branch::branch_name::BranchName;
use crate::artifacts::objects::object_id::ObjectId;
use crate::error::WcError;
use anyhow::Context;
use derive_new::new;
use file_guard::Lock;
use std::io::Write;
use std::ops::DerefMut;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, new)]
pub struct Refs {
    /// Path to the repository directory
    path: Box<Path>,
}

impl Refs {
    pub fn heads_path(&self) -> Box<Path> {
        self.path.join("refs").join("heads").into_boxed_path()
    }

    /// Read the tip of a branch; a missing branch is `None`
    pub fn read_head(&self, branch_name: &BranchName) -> anyhow::Result<Option<ObjectId>> {
        let ref_path = self.heads_path().join(branch_name.as_ref());
        if !ref_path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&ref_path)
            .with_context(|| format!("failed to read ref file at {:?}", ref_path))?;
        let content = content.trim();

        if content.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ObjectId::try_parse(content.to_string())?))
        }
    }

    /// Point a branch at a changeset, creating the branch if needed
    pub fn update_head(&self, branch_name: &BranchName, oid: &ObjectId) -> anyhow::Result<()> {
        let path = self.heads_path().join(branch_name.as_ref());

        std::fs::create_dir_all(path.parent().with_context(|| {
            format!("failed to create parent directories for ref file at {:?}", path)
        })?)?;

        let mut ref_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("failed to open ref file at {:?}", path))?;
        let mut lock = file_guard::lock(&mut ref_file, Lock::Exclusive, 0, 1)?;
        lock.deref_mut().write_all(oid.as_ref().as_bytes())?;

        Ok(())
    }

    pub fn create_branch(&self, name: &BranchName, source_oid: &ObjectId) -> anyhow::Result<()> {
        if self.read_head(name)?.is_some() {
            return Err(WcError::AlreadyExists {
                path: self.heads_path().join(name.as_ref()),
                blocker: format!("branch {name}"),
            }
            .into());
        }

        self.update_head(name, source_oid)
    }

    pub fn list_branches(&self) -> anyhow::Result<Vec<BranchName>> {
        let heads_path = self.heads_path();

        let mut branches = WalkDir::new(&heads_path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let relative_path = entry.path().strip_prefix(&heads_path).ok()?;
                BranchName::try_parse(relative_path.to_string_lossy().to_string()).ok()
            })
            .collect::<Vec<_>>();
        branches.sort();

        Ok(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::object::Object;
    use crate::artifacts::objects::tree::Tree;
    use crate::error::WcErrorKind;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn branches_are_created_read_and_listed() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let refs = Refs::new(dir.path().to_path_buf().into_boxed_path());
        let oid = Tree::default().object_id()?;
        let feature = BranchName::try_parse("feature/login".to_string())?;
        let master = BranchName::try_parse("master".to_string())?;

        assert_eq!(refs.read_head(&feature)?, None);
        refs.update_head(&master, &oid)?;
        refs.create_branch(&feature, &oid)?;

        assert_eq!(refs.read_head(&feature)?, Some(oid.clone()));
        assert_eq!(refs.list_branches()?, vec![feature.clone(), master]);

        let duplicate = refs.create_branch(&feature, &oid).unwrap_err();
        assert_eq!(WcError::kind(&duplicate), Some(WcErrorKind::AlreadyExists));
        Ok(())
    }
}
