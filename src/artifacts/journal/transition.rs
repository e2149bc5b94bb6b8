//! Planning whole-tree transitions
//!
//! Checkout, update, merge, revert and resolve all end the same way: the working tree holds
//! one flat snapshot and must come to hold another. [`Transition`] turns that difference into
//! journal steps in three passes:
//!
//! 1. deepest first over the old state: remove what goes away, park what moves
//! 2. shallowest first over the new state: create directories, unpark moved items,
//!    materialize new files
//! 3. content and attribute updates of items that stayed on disk
//!
//! [`Rebaseline`] produces the matching metadata steps: baseline rows and the pending rows
//! recomputed as "new current state vs baseline".

use crate::areas::metadata::{Alias, BaselineRow, PendingFlags, PendingRow};
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::objects::flat_tree::{FlatEntry, FlatTree};
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use anyhow::Context;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// Where the new content of a file comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    Store(ObjectId),
    /// A scratch file (relative to the root) whose content hashes to `hid`
    File { path: PathBuf, hid: ObjectId },
}

impl ContentSource {
    pub fn hid(&self) -> &ObjectId {
        match self {
            ContentSource::Store(hid) | ContentSource::File { hid, .. } => hid,
        }
    }
}

/// Provenance recorded on a pending row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub flags: PendingFlags,
    pub ref_hid_merge: Option<ObjectId>,
}

#[derive(Debug, Default)]
pub struct Transition<'a> {
    /// What is on disk now, in gid space
    pub from: Option<&'a FlatTree>,
    pub to: Option<&'a FlatTree>,
    /// Items not materialized now (sparse or lost)
    pub absent: BTreeSet<Gid>,
    /// Items that must not be materialized in the new state
    pub sparse: BTreeSet<Gid>,
    /// Items leaving version control; they stay on disk untouched
    pub unversion: BTreeSet<Gid>,
    /// Content overrides, e.g. merge results
    pub content: HashMap<Gid, ContentSource>,
}

impl<'a> Transition<'a> {
    pub fn new(from: &'a FlatTree, to: &'a FlatTree) -> Self {
        Transition {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    fn on_disk_before(&self, gid: &Gid) -> bool {
        self.from.is_some_and(|from| from.contains(gid)) && !self.absent.contains(gid)
    }

    fn on_disk_after(&self, gid: &Gid) -> bool {
        self.to.is_some_and(|to| to.contains(gid)) && !self.sparse.contains(gid)
    }

    fn content_of(&self, entry: &FlatEntry) -> anyhow::Result<ContentSource> {
        match self.content.get(&entry.gid) {
            Some(source) => Ok(source.clone()),
            None => entry
                .oid
                .clone()
                .map(ContentSource::Store)
                .with_context(|| format!("item {} has no content id", entry.gid)),
        }
    }

    /// Same item, same type, on disk on both sides
    fn survives(&self, before: &FlatEntry, after: &FlatEntry) -> bool {
        before.item_type == after.item_type
            && self.on_disk_before(&before.gid)
            && self.on_disk_after(&after.gid)
    }

    /// Plan the filesystem steps
    ///
    /// `aliases` must cover every gid of both trees.
    pub fn plan(&self, aliases: &HashMap<Gid, Alias>) -> anyhow::Result<Vec<JournalStep>> {
        let empty = FlatTree::default();
        let (from, to) = (self.from.unwrap_or(&empty), self.to.unwrap_or(&empty));
        let alias_of = |gid: &Gid| -> anyhow::Result<Alias> {
            aliases
                .get(gid)
                .copied()
                .with_context(|| format!("item {gid} has no alias"))
        };
        let mut steps = Vec::new();

        // pass 1: deepest first over the old state
        let mut old = from
            .entries()
            .filter(|entry| entry.parent.is_some())
            .map(|entry| (from.depth_of(&entry.gid).unwrap_or_default(), entry))
            .collect::<Vec<_>>();
        old.sort_by(|(a, x), (b, y)| b.cmp(a).then_with(|| x.gid.cmp(&y.gid)));

        for (_, before) in old {
            let gid = &before.gid;
            if self.unversion.contains(gid) || !self.on_disk_before(gid) {
                continue;
            }
            let path = from
                .path_of(gid)
                .with_context(|| format!("item {gid} is detached from the root"))?;

            match to.get(gid) {
                Some(after) if self.survives(before, after) => {
                    if !before.same_location(after) {
                        steps.push(JournalStep::Park {
                            alias: alias_of(gid)?,
                            from: path,
                        });
                    }
                }
                _ if before.is_directory() => steps.push(JournalStep::RemoveDirectory {
                    path,
                    sparse: false,
                }),
                _ => steps.push(JournalStep::RemoveFile {
                    alias: alias_of(gid)?,
                    path,
                    sparse: false,
                }),
            }
        }

        // pass 2: shallowest first over the new state
        let mut new = to
            .entries()
            .filter(|entry| entry.parent.is_some())
            .map(|entry| (to.depth_of(&entry.gid).unwrap_or_default(), entry))
            .collect::<Vec<_>>();
        new.sort_by(|(a, x), (b, y)| a.cmp(b).then_with(|| x.gid.cmp(&y.gid)));

        let mut updates = Vec::new();
        for (_, after) in new {
            let gid = &after.gid;
            let path = to
                .path_of(gid)
                .with_context(|| format!("item {gid} is detached from the root"))?;
            let alias = alias_of(gid)?;

            if !self.on_disk_after(gid) {
                if !after.is_directory()
                    && let Some(source) = self.content.get(gid)
                {
                    updates.push(JournalStep::OverwriteFromStore {
                        alias,
                        path,
                        item_type: after.item_type,
                        hid: source.hid().clone(),
                        attrbits: after.attrbits,
                        sparse: true,
                    });
                }
                continue;
            }

            match from.get(gid) {
                Some(before) if self.survives(before, after) => {
                    if !before.same_location(after) {
                        steps.push(JournalStep::Unpark {
                            alias,
                            to: path.clone(),
                        });
                    }
                    if after.is_directory() {
                        continue;
                    }

                    let override_source = self.content.get(gid);
                    let changed = before.oid != after.oid
                        || override_source.is_some_and(|source| before.oid.as_ref() != Some(source.hid()));
                    if changed {
                        updates.push(self.overwrite(alias, path, after)?);
                    } else if before.attrbits != after.attrbits {
                        updates.push(JournalStep::SetAttrbits {
                            alias,
                            path,
                            attrbits: after.attrbits,
                            sparse: false,
                        });
                    }
                }
                _ if after.is_directory() => steps.push(JournalStep::MakeDirectory { path }),
                _ => steps.push(match self.content_of(after)? {
                    ContentSource::Store(hid) => JournalStep::MaterializeFile {
                        alias,
                        path,
                        item_type: after.item_type,
                        hid,
                        attrbits: after.attrbits,
                        sparse: false,
                    },
                    ContentSource::File { path: source, hid } => JournalStep::OverwriteFromFile {
                        alias,
                        path,
                        item_type: after.item_type,
                        source,
                        hid,
                        attrbits: after.attrbits,
                        sparse: false,
                    },
                }),
            }
        }

        // pass 3: content of items that stayed
        steps.extend(updates);
        Ok(steps)
    }

    fn overwrite(
        &self,
        alias: Alias,
        path: PathBuf,
        after: &FlatEntry,
    ) -> anyhow::Result<JournalStep> {
        Ok(match self.content_of(after)? {
            ContentSource::Store(hid) => JournalStep::OverwriteFromStore {
                alias,
                path,
                item_type: after.item_type,
                hid,
                attrbits: after.attrbits,
                sparse: false,
            },
            ContentSource::File { path: source, hid } => JournalStep::OverwriteFromFile {
                alias,
                path,
                item_type: after.item_type,
                source,
                hid,
                attrbits: after.attrbits,
                sparse: false,
            },
        })
    }
}

/// Metadata steps describing a new baseline and the pending state on top of it
#[derive(Debug)]
pub struct Rebaseline<'a> {
    pub baseline: &'a FlatTree,
    pub current: &'a FlatTree,
    /// Write every baseline row anew (checkout, update, commit)
    pub replace_baseline: bool,
    pub sparse: BTreeSet<Gid>,
    pub provenance: HashMap<Gid, Provenance>,
}

impl<'a> Rebaseline<'a> {
    pub fn new(baseline: &'a FlatTree, current: &'a FlatTree) -> Self {
        Rebaseline {
            baseline,
            current,
            replace_baseline: false,
            sparse: BTreeSet::new(),
            provenance: HashMap::new(),
        }
    }

    pub fn plan(&self, aliases: &HashMap<Gid, Alias>) -> anyhow::Result<Vec<JournalStep>> {
        let alias_of = |gid: &Gid| -> anyhow::Result<Alias> {
            aliases
                .get(gid)
                .copied()
                .with_context(|| format!("item {gid} has no alias"))
        };
        let parent_alias = |entry: &FlatEntry| -> anyhow::Result<Option<Alias>> {
            entry.parent.as_ref().map(alias_of).transpose()
        };
        let mut steps = Vec::new();

        if self.replace_baseline {
            let rows = self
                .baseline
                .entries()
                .map(|entry| {
                    Ok(BaselineRow::new(
                        alias_of(&entry.gid)?,
                        parent_alias(entry)?,
                        entry.name.clone(),
                        entry.item_type,
                        entry
                            .oid
                            .clone()
                            .with_context(|| format!("baseline item {} has no id", entry.gid))?,
                        entry.attrbits,
                    ))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            steps.push(JournalStep::ReplaceBaseline(rows));
        }
        steps.push(JournalStep::ClearAllPending);

        for entry in self.current.entries() {
            let baseline = self.baseline.get(&entry.gid);
            let provenance = self.provenance.get(&entry.gid).cloned().unwrap_or_default();
            let sparse = self.sparse.contains(&entry.gid);

            let mut flags = provenance.flags;
            flags.set(PendingFlags::ADDED, baseline.is_none());
            flags.set(PendingFlags::SPARSE, sparse);
            if baseline.is_some() {
                flags.remove(PendingFlags::ADD_SPECIAL_M | PendingFlags::ADD_SPECIAL_U);
            }

            let structural = baseline.is_none_or(|baseline| {
                !baseline.same_location(entry) || baseline.item_type != entry.item_type
            });
            if !structural && flags.is_empty() && provenance.ref_hid_merge.is_none() {
                continue;
            }

            let mut row = PendingRow::new(
                alias_of(&entry.gid)?,
                parent_alias(entry)?,
                entry.name.clone(),
                entry.item_type,
                flags,
            );
            row.ref_hid_merge = provenance.ref_hid_merge;
            if sparse && !entry.is_directory() {
                let baseline_oid = baseline.and_then(|baseline| baseline.oid.as_ref());
                if entry.oid.is_some() && entry.oid.as_ref() != baseline_oid {
                    row.sparse_hid = entry.oid.clone();
                }
                if baseline.is_none_or(|baseline| baseline.attrbits != entry.attrbits) {
                    row.sparse_attrbits = Some(entry.attrbits);
                }
            }
            steps.push(JournalStep::SetPending(row));
        }

        for entry in self.baseline.entries() {
            if entry.parent.is_none() || self.current.contains(&entry.gid) {
                continue;
            }
            steps.push(JournalStep::SetPending(PendingRow::new(
                alias_of(&entry.gid)?,
                parent_alias(entry)?,
                entry.name.clone(),
                entry.item_type,
                PendingFlags::DELETED,
            )));
        }

        Ok(steps)
    }
}

/// Items of `tree` that are, or live below, one of `seeds`
pub fn sparse_closure(tree: &FlatTree, seeds: &BTreeSet<Gid>) -> BTreeSet<Gid> {
    tree.gids()
        .filter(|gid| {
            seeds.contains(*gid) || seeds.iter().any(|seed| tree.is_ancestor(seed, gid))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::tree::ItemType;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    fn oid(seed: char) -> ObjectId {
        ObjectId::try_parse(seed.to_string().repeat(40)).expect("valid object id")
    }

    struct Trees {
        root: Gid,
        dir: Gid,
        file: Gid,
        aliases: HashMap<Gid, Alias>,
    }

    impl Trees {
        fn base(&self) -> FlatTree {
            let mut tree = FlatTree::with_root(FlatEntry::new(
                self.root.clone(),
                None,
                "@".to_string(),
                ItemType::Directory,
                0,
                Some(oid('0')),
            ));
            tree.insert(FlatEntry::new(
                self.dir.clone(),
                Some(self.root.clone()),
                "src".to_string(),
                ItemType::Directory,
                0,
                Some(oid('1')),
            ));
            tree.insert(FlatEntry::new(
                self.file.clone(),
                Some(self.dir.clone()),
                "main.rs".to_string(),
                ItemType::File,
                0,
                Some(oid('2')),
            ));
            tree
        }
    }

    #[fixture]
    fn trees() -> Trees {
        let (root, dir, file) = (Gid::generate(), Gid::generate(), Gid::generate());
        let aliases = [(root.clone(), 1), (dir.clone(), 2), (file.clone(), 3)]
            .into_iter()
            .collect();

        Trees {
            root,
            dir,
            file,
            aliases,
        }
    }

    #[rstest]
    fn identical_trees_need_no_steps(trees: Trees) -> anyhow::Result<()> {
        let tree = trees.base();

        let steps = Transition::new(&tree, &tree).plan(&trees.aliases)?;

        assert_eq!(steps, Vec::new());
        Ok(())
    }

    #[rstest]
    fn checkout_from_nothing_creates_parents_first(trees: Trees) -> anyhow::Result<()> {
        let tree = trees.base();
        let empty = FlatTree::with_root(tree.get(&trees.root).cloned().expect("root"));

        let steps = Transition::new(&empty, &tree).plan(&trees.aliases)?;

        assert_eq!(
            steps,
            vec![
                JournalStep::MakeDirectory {
                    path: PathBuf::from("src")
                },
                JournalStep::MaterializeFile {
                    alias: 3,
                    path: PathBuf::from("src/main.rs"),
                    item_type: ItemType::File,
                    hid: oid('2'),
                    attrbits: 0,
                    sparse: false,
                },
            ]
        );
        Ok(())
    }

    #[rstest]
    fn moves_are_parked_then_unparked(trees: Trees) -> anyhow::Result<()> {
        let before = trees.base();
        let mut after = before.clone();
        let mut moved = after.get(&trees.file).cloned().expect("file");
        moved.parent = Some(trees.root.clone());
        moved.name = "lib.rs".to_string();
        after.insert(moved);

        let steps = Transition::new(&before, &after).plan(&trees.aliases)?;

        assert_eq!(
            steps,
            vec![
                JournalStep::Park {
                    alias: 3,
                    from: PathBuf::from("src/main.rs")
                },
                JournalStep::Unpark {
                    alias: 3,
                    to: PathBuf::from("lib.rs")
                },
            ]
        );
        Ok(())
    }

    #[rstest]
    fn removals_run_children_first_and_sparse_targets_stay_off_disk(
        trees: Trees,
    ) -> anyhow::Result<()> {
        let before = trees.base();
        let mut transition = Transition::new(&before, &before);
        transition.sparse.insert(trees.dir.clone());
        transition.sparse.insert(trees.file.clone());

        let steps = transition.plan(&trees.aliases)?;

        assert_eq!(
            steps,
            vec![
                JournalStep::RemoveFile {
                    alias: 3,
                    path: PathBuf::from("src/main.rs"),
                    sparse: false
                },
                JournalStep::RemoveDirectory {
                    path: PathBuf::from("src"),
                    sparse: false
                },
            ]
        );
        Ok(())
    }

    #[rstest]
    fn content_changes_prefer_overrides(trees: Trees) -> anyhow::Result<()> {
        let before = trees.base();
        let mut after = before.clone();
        after.set_oid(&trees.file, Some(oid('3')));
        let mut transition = Transition::new(&before, &after);
        transition.content.insert(
            trees.file.clone(),
            ContentSource::File {
                path: PathBuf::from(".grove/tmp/merge/x/result"),
                hid: oid('3'),
            },
        );

        let steps = transition.plan(&trees.aliases)?;

        assert_eq!(
            steps,
            vec![JournalStep::OverwriteFromFile {
                alias: 3,
                path: PathBuf::from("src/main.rs"),
                item_type: ItemType::File,
                source: PathBuf::from(".grove/tmp/merge/x/result"),
                hid: oid('3'),
                attrbits: 0,
                sparse: false,
            }]
        );
        Ok(())
    }

    #[rstest]
    fn rebaseline_records_adds_moves_and_deletes(trees: Trees) -> anyhow::Result<()> {
        let baseline = trees.base();
        let mut current = baseline.clone();
        let mut renamed = current.get(&trees.file).cloned().expect("file");
        renamed.name = "lib.rs".to_string();
        current.insert(renamed);
        current.remove(&trees.dir);
        let mut aliases = trees.aliases.clone();
        let added = Gid::generate();
        aliases.insert(added.clone(), 4);
        current.insert(FlatEntry::new(
            added,
            Some(trees.root.clone()),
            "README".to_string(),
            ItemType::File,
            0,
            Some(oid('4')),
        ));

        let steps = Rebaseline::new(&baseline, &current).plan(&aliases)?;

        let expected_rename =
            PendingRow::new(3, Some(2), "lib.rs".to_string(), ItemType::File, PendingFlags::empty());
        assert!(steps.contains(&JournalStep::ClearAllPending));
        assert!(steps.contains(&JournalStep::SetPending(expected_rename)));
        assert!(steps.contains(&JournalStep::SetPending(PendingRow::new(
            4,
            Some(1),
            "README".to_string(),
            ItemType::File,
            PendingFlags::ADDED
        ))));
        assert!(steps.contains(&JournalStep::SetPending(PendingRow::new(
            2,
            Some(1),
            "src".to_string(),
            ItemType::Directory,
            PendingFlags::DELETED
        ))));
        assert!(!steps.iter().any(|step| matches!(step, JournalStep::ReplaceBaseline(_))));
        Ok(())
    }

    #[rstest]
    fn sparse_directories_take_their_subtree_along(trees: Trees) {
        let tree = trees.base();
        let seeds = [trees.dir.clone()].into_iter().collect();

        let closure = sparse_closure(&tree, &seeds);

        assert_eq!(closure, [trees.dir.clone(), trees.file.clone()].into_iter().collect());
    }
}
