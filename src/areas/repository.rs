//! Repository: object database plus branch heads
//!
//! ## Layout
//!
//! ```text
//! <repo>/
//! ├── objects/xx/yyyy...   zlib-compressed loose objects
//! └── refs/heads/<branch>  changeset id at the tip of each branch
//! ```
//!
//! A repository is shared by any number of working copies. Each working copy records the path
//! of its repository in its own metadata store.

use crate::areas::database::{Database, ObjectStore};
use crate::areas::refs::Refs;
use crate::artifacts::branch::DEFAULT_BRANCH;
use crate::artifacts::branch::branch_name::BranchName;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::merge::bca_finder::BcaFinder;
use crate::artifacts::objects::changeset::{Author, Changeset};
use crate::artifacts::objects::flat_tree::{FlatTree, ROOT_ENTRY_NAME};
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::{ItemType, Tree, TreeEntry};
use crate::config::AuthorConfig;
use crate::error::WcError;
use anyhow::Context;
use std::path::Path;
use tracing::info;

const INITIAL_MESSAGE: &str = "Initial changeset";
const FALLBACK_AUTHOR_NAME: &str = "grove";
const FALLBACK_AUTHOR_EMAIL: &str = "grove@localhost";

#[derive(Debug)]
pub struct Repository {
    path: Box<Path>,
    database: Database,
    refs: Refs,
}

impl Repository {
    /// Create a repository holding one empty changeset on `master`
    ///
    /// The initial changeset fixes the gid of the root directory for the life of the repository.
    pub fn init(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create repository at {}", path.display()))?;
        let path = path.canonicalize()?;

        if path.join("objects").exists() {
            return Err(WcError::AlreadyExists {
                path: path.clone(),
                blocker: "an existing repository".to_string(),
            }
            .into());
        }

        std::fs::create_dir_all(path.join("objects"))?;
        std::fs::create_dir_all(path.join("refs").join("heads"))?;
        let repository = Self::open(&path)?;

        let root_tree_oid = repository.database.store_tree(&Tree::default())?;
        let mut super_root = Tree::default();
        super_root.insert(TreeEntry::new(
            Gid::generate(),
            ROOT_ENTRY_NAME.to_string(),
            ItemType::Directory,
            0,
            root_tree_oid,
        ))?;
        let super_root_oid = repository.database.store_tree(&super_root)?;

        let author = Author::load(&AuthorConfig {
            name: Some(FALLBACK_AUTHOR_NAME.to_string()),
            email: Some(FALLBACK_AUTHOR_EMAIL.to_string()),
        })?;
        let changeset = Changeset::new(
            Vec::new(),
            super_root_oid,
            author,
            INITIAL_MESSAGE.to_string(),
        );
        let changeset_oid = repository.database.store_changeset(&changeset)?;
        repository
            .refs
            .update_head(&BranchName::try_parse(DEFAULT_BRANCH.to_string())?, &changeset_oid)?;

        info!(repo = %path.display(), changeset = %changeset_oid, "initialized repository");
        Ok(repository)
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let path = path
            .canonicalize()
            .with_context(|| format!("repository {} does not exist", path.display()))?;
        if !path.join("objects").is_dir() {
            return Err(WcError::NotFound(format!("repository at {}", path.display())).into());
        }

        Ok(Repository {
            database: Database::new(path.join("objects").into_boxed_path()),
            refs: Refs::new(path.clone().into_boxed_path()),
            path: path.into_boxed_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    /// Resolve a branch name, id, id prefix or `^`/`~n` expression to a changeset id
    pub fn resolve_revision(&self, revision: &str) -> anyhow::Result<ObjectId> {
        Revision::try_parse(revision)?
            .resolve(self)
            .with_context(|| format!("failed to resolve revision {revision:?}"))
    }

    /// Flatten the snapshot of a changeset
    pub fn flat_tree(&self, changeset_oid: &ObjectId) -> anyhow::Result<FlatTree> {
        FlatTree::load(&self.database, changeset_oid)
    }

    fn parents_of(&self, oid: &ObjectId) -> anyhow::Result<Vec<ObjectId>> {
        Ok(self.database.fetch_changeset(oid)?.parents().to_vec())
    }

    /// Best common ancestor of two changesets
    pub fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> anyhow::Result<Option<ObjectId>> {
        BcaFinder::new(|oid: &ObjectId| self.parents_of(oid)).find_best_common_ancestor(a, b)
    }

    pub fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> anyhow::Result<bool> {
        BcaFinder::new(|oid: &ObjectId| self.parents_of(oid)).is_ancestor(ancestor, descendant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WcErrorKind;
    use assert_fs::TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn init_creates_an_empty_changeset_on_master() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let repository = Repository::init(&dir.path().join("repo"))?;

        let head = repository.resolve_revision(DEFAULT_BRANCH)?;
        let tree = repository.flat_tree(&head)?;

        assert_eq!(tree.len(), 1);
        let root = tree.root().context("root")?;
        assert_eq!(tree.get(root).map(|e| e.name.as_str()), Some(ROOT_ENTRY_NAME));
        assert!(repository.database().fetch_changeset(&head)?.parents().is_empty());
        Ok(())
    }

    #[test]
    fn init_refuses_an_existing_repository() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        Repository::init(dir.path())?;

        let error = Repository::init(dir.path()).unwrap_err();

        assert_eq!(WcError::kind(&error), Some(WcErrorKind::AlreadyExists));
        Ok(())
    }

    #[test]
    fn unknown_revisions_are_not_found() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let repository = Repository::init(dir.path())?;

        let error = repository.resolve_revision("nope").unwrap_err();

        assert_eq!(WcError::kind(&error), Some(WcErrorKind::NotFound));
        Ok(())
    }
}
