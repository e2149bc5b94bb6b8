//! Flattened changeset view
//!
//! Merge, update, revert and commit all reason about a whole snapshot at once. A [`FlatTree`]
//! indexes every item of a snapshot by gid, with its parent gid, name, type, attribute bits and
//! object id, plus a reverse parent → children index. The working copy's current state is
//! expressed the same way so that all three-way and two-way comparisons are plain map lookups.

use crate::areas::database::ObjectStore;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::ItemType;
use anyhow::Context;
use derive_new::new;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Name of the root entry inside a changeset's super-root tree
pub const ROOT_ENTRY_NAME: &str = "@";

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct FlatEntry {
    pub gid: Gid,
    pub parent: Option<Gid>,
    pub name: String,
    pub item_type: ItemType,
    pub attrbits: u64,
    /// Blob id for files and symlinks, tree id for directories when known
    pub oid: Option<ObjectId>,
}

impl FlatEntry {
    pub fn is_directory(&self) -> bool {
        self.item_type.is_directory()
    }

    /// Same place in the tree: parent and name match
    pub fn same_location(&self, other: &FlatEntry) -> bool {
        self.parent == other.parent && self.name == other.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatTree {
    root: Option<Gid>,
    entries: BTreeMap<Gid, FlatEntry>,
    children: BTreeMap<Gid, BTreeSet<Gid>>,
}

impl FlatTree {
    pub fn with_root(root: FlatEntry) -> Self {
        let mut tree = FlatTree {
            root: Some(root.gid.clone()),
            ..Default::default()
        };
        tree.insert(root);
        tree
    }

    /// Flatten the snapshot recorded by a changeset
    pub fn load(store: &dyn ObjectStore, changeset_oid: &ObjectId) -> anyhow::Result<Self> {
        let changeset = store.fetch_changeset(changeset_oid)?;
        let super_root = store.fetch_tree(changeset.root_oid())?;
        let root = super_root.get(ROOT_ENTRY_NAME).with_context(|| {
            format!("changeset {changeset_oid} has no '{ROOT_ENTRY_NAME}' root entry")
        })?;

        let mut tree = FlatTree::with_root(FlatEntry::new(
            root.gid.clone(),
            None,
            ROOT_ENTRY_NAME.to_string(),
            ItemType::Directory,
            root.attrbits,
            Some(root.oid.clone()),
        ));
        tree.load_children(store, &root.gid, &root.oid)?;

        Ok(tree)
    }

    fn load_children(
        &mut self,
        store: &dyn ObjectStore,
        parent: &Gid,
        tree_oid: &ObjectId,
    ) -> anyhow::Result<()> {
        let tree = store.fetch_tree(tree_oid)?;

        for entry in tree.entries() {
            self.insert(FlatEntry::new(
                entry.gid.clone(),
                Some(parent.clone()),
                entry.name.clone(),
                entry.item_type,
                entry.attrbits,
                Some(entry.oid.clone()),
            ));

            if entry.item_type.is_directory() {
                self.load_children(store, &entry.gid, &entry.oid)?;
            }
        }

        Ok(())
    }

    pub fn root(&self) -> Option<&Gid> {
        self.root.as_ref()
    }

    pub fn get(&self, gid: &Gid) -> Option<&FlatEntry> {
        self.entries.get(gid)
    }

    pub fn contains(&self, gid: &Gid) -> bool {
        self.entries.contains_key(gid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FlatEntry> {
        self.entries.values()
    }

    pub fn gids(&self) -> impl Iterator<Item = &Gid> {
        self.entries.keys()
    }

    pub fn children(&self, gid: &Gid) -> impl Iterator<Item = &FlatEntry> {
        self.children
            .get(gid)
            .into_iter()
            .flatten()
            .filter_map(|child| self.entries.get(child))
    }

    pub fn child_named(&self, parent: &Gid, name: &str) -> Option<&FlatEntry> {
        self.children(parent).find(|child| child.name == name)
    }

    /// Insert or replace an entry, keeping the children index in sync
    pub fn insert(&mut self, entry: FlatEntry) {
        if let Some(previous) = self.entries.get(&entry.gid)
            && let Some(previous_parent) = &previous.parent
            && let Some(siblings) = self.children.get_mut(previous_parent)
        {
            siblings.remove(&entry.gid);
        }
        if let Some(parent) = &entry.parent {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(entry.gid.clone());
        }

        self.entries.insert(entry.gid.clone(), entry);
    }

    pub fn remove(&mut self, gid: &Gid) -> Option<FlatEntry> {
        let removed = self.entries.remove(gid)?;
        if let Some(parent) = &removed.parent
            && let Some(siblings) = self.children.get_mut(parent)
        {
            siblings.remove(gid);
        }

        Some(removed)
    }

    pub fn set_oid(&mut self, gid: &Gid, oid: Option<ObjectId>) {
        if let Some(entry) = self.entries.get_mut(gid) {
            entry.oid = oid;
        }
    }

    /// Repo-relative path of an item; the root maps to the empty path
    ///
    /// Returns `None` when the item or one of its ancestors is missing, or when the parent chain
    /// loops.
    pub fn path_of(&self, gid: &Gid) -> Option<PathBuf> {
        let mut names = Vec::new();
        let mut current = self.entries.get(gid)?;

        while let Some(parent) = &current.parent {
            if names.len() > self.entries.len() {
                return None;
            }
            names.push(current.name.as_str());
            current = self.entries.get(parent)?;
        }

        Some(names.iter().rev().collect())
    }

    /// Number of ancestors between the item and the root
    pub fn depth_of(&self, gid: &Gid) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.entries.get(gid)?;

        while let Some(parent) = &current.parent {
            depth += 1;
            if depth > self.entries.len() {
                return None;
            }
            current = self.entries.get(parent)?;
        }

        Some(depth)
    }

    /// Whether `ancestor` is a proper ancestor of `gid`
    pub fn is_ancestor(&self, ancestor: &Gid, gid: &Gid) -> bool {
        let mut steps = 0;
        let mut current = self.entries.get(gid).and_then(|entry| entry.parent.as_ref());

        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.entries.len() {
                return false;
            }
            current = self.entries.get(parent).and_then(|entry| entry.parent.as_ref());
        }

        false
    }

    /// The item and all its descendants, parents before children
    pub fn subtree(&self, gid: &Gid) -> Vec<Gid> {
        let mut result = Vec::new();
        let mut stack = vec![gid.clone()];

        while let Some(current) = stack.pop() {
            if !self.entries.contains_key(&current) {
                continue;
            }
            stack.extend(self.children(&current).map(|child| child.gid.clone()));
            result.push(current);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    pub struct Sample {
        tree: FlatTree,
        root: Gid,
        dir: Gid,
        file: Gid,
    }

    #[fixture]
    fn sample() -> Sample {
        let root = Gid::generate();
        let dir = Gid::generate();
        let file = Gid::generate();
        let mut tree = FlatTree::with_root(FlatEntry::new(
            root.clone(),
            None,
            ROOT_ENTRY_NAME.to_string(),
            ItemType::Directory,
            0,
            None,
        ));
        tree.insert(FlatEntry::new(
            dir.clone(),
            Some(root.clone()),
            "dir".to_string(),
            ItemType::Directory,
            0,
            None,
        ));
        tree.insert(FlatEntry::new(
            file.clone(),
            Some(dir.clone()),
            "b.txt".to_string(),
            ItemType::File,
            0,
            None,
        ));

        Sample {
            tree,
            root,
            dir,
            file,
        }
    }

    #[rstest]
    fn paths_and_depths_follow_the_parent_chain(sample: Sample) {
        assert_eq!(sample.tree.path_of(&sample.root), Some(PathBuf::new()));
        assert_eq!(sample.tree.path_of(&sample.file), Some(PathBuf::from("dir/b.txt")));
        assert_eq!(sample.tree.depth_of(&sample.file), Some(2));
        assert!(sample.tree.is_ancestor(&sample.root, &sample.file));
        assert!(!sample.tree.is_ancestor(&sample.file, &sample.dir));
    }

    #[rstest]
    fn moving_an_entry_updates_the_children_index(mut sample: Sample) {
        let mut moved = sample.tree.get(&sample.file).cloned().unwrap();
        moved.parent = Some(sample.root.clone());
        sample.tree.insert(moved);

        assert_eq!(sample.tree.children(&sample.dir).count(), 0);
        assert!(sample.tree.child_named(&sample.root, "b.txt").is_some());
        assert_eq!(sample.tree.subtree(&sample.dir), vec![sample.dir.clone()]);
    }

    #[rstest]
    fn parent_loops_have_no_path(mut sample: Sample) {
        let mut looped = sample.tree.get(&sample.dir).cloned().unwrap();
        looped.parent = Some(sample.file.clone());
        sample.tree.insert(looped);

        assert_eq!(sample.tree.path_of(&sample.file), None);
        assert_eq!(sample.tree.depth_of(&sample.file), None);
    }
}
