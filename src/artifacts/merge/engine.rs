//! Three-way tree merge
//!
//! Inputs are three flat snapshots in gid space: the ancestor (A), the baseline (B, the working
//! copy as it is now) and the other side (C). Every item is decided facet by facet (name,
//! parent, attribute bits, content) with the usual rule:
//!
//! ```text
//! B == C  -> take it
//! A == B  -> take C
//! A == C  -> take B
//! else    -> keep B, flag the facet
//! ```
//!
//! Existence follows the same idea: an item deleted on one side and left alone on the other is
//! deleted, one deleted on one side and changed on the other is kept and flagged.
//!
//! ## Repair passes
//!
//! The per-item decisions can leave a result no filesystem can hold, so three passes follow:
//!
//! 1. closure: a deleted directory that still holds surviving items is restored
//! 2. cycles: divergent moves that nest two directories into each other are undone on the other
//!    side
//! 3. collisions: two items claiming the same name (or names equal once folded by the active
//!    portability rules) are separated; two files added independently under one name collapse
//!    into a single item whose content is merged against an empty ancestor

use crate::artifacts::merge::conflict::{Conflict, ConflictFacets, ConflictStatus, MergePresence};
use crate::artifacts::objects::flat_tree::{FlatEntry, FlatTree};
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::ItemType;
use crate::artifacts::portability::PortabilityFlags;
use crate::artifacts::portability::collider::{Collision, PortabilityCollider};
use crate::error::WcError;
use anyhow::Context;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// A file whose content diverged on both sides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMerge {
    /// `None` when both sides created the file independently
    pub ancestor: Option<ObjectId>,
    pub baseline: ObjectId,
    pub other: ObjectId,
}

#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub tree: FlatTree,
    pub conflicts: BTreeMap<Gid, Conflict>,
    pub content_merges: BTreeMap<Gid, ContentMerge>,
    /// Other-side items folded into a baseline item with the same name, mapped to that item
    pub collapsed: BTreeMap<Gid, Gid>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.values().all(Conflict::is_resolved)
    }
}

/// Collision suffix appended to the other side's item
pub fn collision_name(name: &str, gid: &Gid) -> String {
    format!("{name}~{}", gid.short())
}

fn pick<T: PartialEq + Clone>(ancestor: Option<&T>, baseline: &T, other: &T) -> (T, bool) {
    if baseline == other {
        (baseline.clone(), false)
    } else if ancestor == Some(baseline) {
        (other.clone(), false)
    } else if ancestor == Some(other) {
        (baseline.clone(), false)
    } else {
        (baseline.clone(), true)
    }
}

/// Unchanged between two snapshots, ignoring directory tree ids
fn unchanged(before: &FlatEntry, after: &FlatEntry) -> bool {
    before.same_location(after)
        && before.item_type == after.item_type
        && before.attrbits == after.attrbits
        && (before.is_directory() || before.oid == after.oid)
}

fn normalized(entry: &FlatEntry) -> FlatEntry {
    let mut entry = entry.clone();
    if entry.is_directory() {
        entry.oid = None;
    }
    entry
}

struct TreeMerge<'a> {
    ancestor: &'a FlatTree,
    baseline: &'a FlatTree,
    other: &'a FlatTree,
    flags: PortabilityFlags,
    result: MergeResult,
    /// Items whose parent in the result came from the other side
    moved_by_other: BTreeSet<Gid>,
}

/// Merge `other` into `baseline`, both descended from `ancestor`
pub fn merge_trees(
    ancestor: &FlatTree,
    baseline: &FlatTree,
    other: &FlatTree,
    flags: PortabilityFlags,
) -> anyhow::Result<MergeResult> {
    let root = baseline
        .root()
        .and_then(|root| baseline.get(root))
        .context("baseline snapshot has no root")?;

    let mut merge = TreeMerge {
        ancestor,
        baseline,
        other,
        flags,
        result: MergeResult {
            tree: FlatTree::with_root(normalized(root)),
            ..Default::default()
        },
        moved_by_other: BTreeSet::new(),
    };

    merge.merge_items()?;
    loop {
        merge.close_parents()?;
        if !merge.break_cycle()? {
            break;
        }
    }
    merge.separate_collisions()?;
    merge.record_presence();

    debug!(
        items = merge.result.tree.len(),
        conflicts = merge.result.conflicts.len(),
        content_merges = merge.result.content_merges.len(),
        "merged trees"
    );
    Ok(merge.result)
}

impl TreeMerge<'_> {
    fn conflict(&mut self, gid: &Gid) -> &mut Conflict {
        self.result
            .conflicts
            .entry(gid.clone())
            .or_insert_with(|| Conflict::new(gid.clone(), MergePresence::empty()))
    }

    fn merge_items(&mut self) -> anyhow::Result<()> {
        let root = self.result.tree.root().cloned();
        let gids = self
            .ancestor
            .gids()
            .chain(self.baseline.gids())
            .chain(self.other.gids())
            .filter(|gid| Some(*gid) != root.as_ref())
            .cloned()
            .collect::<BTreeSet<_>>();

        for gid in gids {
            let (a, b, c) = (
                self.ancestor.get(&gid),
                self.baseline.get(&gid),
                self.other.get(&gid),
            );

            match (a, b, c) {
                (_, Some(b), Some(c)) => self.merge_facets(a, b, c),
                (None, Some(b), None) => self.result.tree.insert(normalized(b)),
                (None, None, Some(c)) => {
                    self.moved_by_other.insert(gid.clone());
                    self.result.tree.insert(normalized(c));
                }
                (Some(a), Some(b), None) => {
                    if !unchanged(a, b) {
                        trace!(%gid, "deleted on the other side, changed in the baseline");
                        self.result.tree.insert(normalized(b));
                        self.conflict(&gid).flag(ConflictFacets::EXISTENCE);
                    }
                }
                (Some(a), None, Some(c)) => {
                    if !unchanged(a, c) {
                        trace!(%gid, "deleted in the baseline, changed on the other side");
                        self.moved_by_other.insert(gid.clone());
                        self.result.tree.insert(normalized(c));
                        self.conflict(&gid).flag(ConflictFacets::EXISTENCE);
                    }
                }
                (_, None, None) => {}
            }
        }

        Ok(())
    }

    fn merge_facets(&mut self, a: Option<&FlatEntry>, b: &FlatEntry, c: &FlatEntry) {
        let gid = b.gid.clone();

        if b.item_type != c.item_type {
            // no sensible per-facet answer; keep the baseline item whole
            self.result.tree.insert(normalized(b));
            let conflict = self.conflict(&gid);
            conflict.flag(ConflictFacets::CONTENTS);
            conflict.status = ConflictStatus::NoRule;
            return;
        }

        let (name, name_conflict) = pick(a.map(|a| &a.name), &b.name, &c.name);
        let (parent, location_conflict) = pick(a.map(|a| &a.parent), &b.parent, &c.parent);
        let (attrbits, attrbits_conflict) =
            pick(a.map(|a| &a.attrbits), &b.attrbits, &c.attrbits);

        let (oid, contents_conflict) = if b.is_directory() {
            (None, false)
        } else {
            let ancestor_oid = a
                .filter(|a| a.item_type == b.item_type)
                .map(|a| &a.oid);
            pick(ancestor_oid, &b.oid, &c.oid)
        };

        if parent != b.parent {
            self.moved_by_other.insert(gid.clone());
        }
        self.result.tree.insert(FlatEntry::new(
            gid.clone(),
            parent,
            name,
            b.item_type,
            attrbits,
            oid,
        ));

        for (conflicted, facet) in [
            (name_conflict, ConflictFacets::NAME),
            (location_conflict, ConflictFacets::LOCATION),
            (attrbits_conflict, ConflictFacets::ATTRBITS),
        ] {
            if conflicted {
                self.conflict(&gid).flag(facet);
            }
        }

        if contents_conflict
            && let (Some(baseline), Some(other)) = (b.oid.clone(), c.oid.clone())
        {
            self.conflict(&gid).flag(ConflictFacets::CONTENTS);
            self.result.content_merges.insert(
                gid,
                ContentMerge {
                    ancestor: a.and_then(|a| a.oid.clone()),
                    baseline,
                    other,
                },
            );
        }
    }

    /// Restore every missing directory that still has a surviving child
    fn close_parents(&mut self) -> anyhow::Result<()> {
        let mut pending = self
            .result
            .tree
            .entries()
            .filter_map(|entry| entry.parent.clone())
            .collect::<BTreeSet<_>>();

        while let Some(parent) = pending.pop_first() {
            if self.result.tree.contains(&parent) {
                continue;
            }

            let restored = self
                .baseline
                .get(&parent)
                .or_else(|| self.other.get(&parent))
                .or_else(|| self.ancestor.get(&parent))
                .with_context(|| format!("parent {parent} is missing from every snapshot"))?;
            trace!(gid = %parent, "restoring deleted directory that keeps children");

            if !self.baseline.contains(&parent) {
                self.moved_by_other.insert(parent.clone());
            }
            if let Some(grandparent) = &restored.parent {
                pending.insert(grandparent.clone());
            }
            self.result.tree.insert(normalized(restored));
            self.conflict(&parent).flag(ConflictFacets::EXISTENCE);
        }

        Ok(())
    }

    /// Undo one other-side move that nests a directory inside itself
    ///
    /// Returns whether a cycle was found.
    fn break_cycle(&mut self) -> anyhow::Result<bool> {
        let tree = &self.result.tree;
        let Some(detached) = tree.gids().find(|gid| tree.path_of(gid).is_none()).cloned() else {
            return Ok(false);
        };

        let mut chain = vec![detached.clone()];
        let mut current = detached;
        let cycle = loop {
            let parent = tree
                .get(&current)
                .and_then(|entry| entry.parent.clone())
                .with_context(|| format!("item {current} is detached from the root"))?;
            if let Some(start) = chain.iter().position(|gid| *gid == parent) {
                break chain.split_off(start);
            }
            chain.push(parent.clone());
            current = parent;
        };

        let culprit = cycle
            .iter()
            .find(|gid| self.moved_by_other.contains(*gid) && self.baseline.contains(gid))
            .cloned()
            .ok_or_else(|| {
                WcError::Unsupported(format!(
                    "merge would nest {} directories inside each other",
                    cycle.len()
                ))
            })?;

        let baseline = self
            .baseline
            .get(&culprit)
            .cloned()
            .with_context(|| format!("item {culprit} has no baseline location"))?;
        debug!(gid = %culprit, "undoing move that would create a cycle");

        if let Some(mut entry) = self.result.tree.get(&culprit).cloned() {
            entry.parent = baseline.parent;
            entry.name = baseline.name;
            self.result.tree.insert(entry);
        }
        self.moved_by_other.remove(&culprit);
        self.conflict(&culprit).flag(ConflictFacets::LOCATION);
        Ok(true)
    }

    /// Where an item sat in the baseline, so baseline occupants win name clashes
    fn baseline_rank(&self, entry: &FlatEntry) -> u8 {
        match self.baseline.get(&entry.gid) {
            Some(baseline) if baseline.same_location(entry) => 0,
            Some(_) => 1,
            None => 2,
        }
    }

    fn separate_collisions(&mut self) -> anyhow::Result<()> {
        let dirs = self
            .result
            .tree
            .entries()
            .filter(|entry| entry.is_directory())
            .map(|entry| entry.gid.clone())
            .collect::<Vec<_>>();

        for dir in dirs {
            let mut children = self
                .result
                .tree
                .children(&dir)
                .cloned()
                .collect::<Vec<_>>();
            children.sort_by(|x, y| {
                self.baseline_rank(x)
                    .cmp(&self.baseline_rank(y))
                    .then_with(|| x.gid.cmp(&y.gid))
            });

            let dir_path = self.result.tree.path_of(&dir).unwrap_or_default();
            let mut collider = PortabilityCollider::new(self.flags);
            let mut holders = BTreeMap::new();
            for child in children {
                let Some(collision) = collider.add(&child.name) else {
                    holders.insert(child.name.clone(), child.gid.clone());
                    continue;
                };

                let holder_name = match &collision {
                    Collision::Exact(name) => name.clone(),
                    Collision::Folded { other, .. } => other.clone(),
                };
                let holder = holders
                    .get(&holder_name)
                    .and_then(|gid| self.result.tree.get(gid))
                    .cloned()
                    .with_context(|| format!("collision with unknown item {holder_name:?}"))?;

                if matches!(collision, Collision::Exact(_)) && self.collapsible(&holder, &child) {
                    self.collapse(&holder, &child);
                    continue;
                }

                let renamed = collision_name(&child.name, &child.gid);
                debug!(gid = %child.gid, from = %child.name, to = %renamed, "renaming colliding item");
                let mut entry = child.clone();
                entry.name = renamed.clone();
                collider
                    .add_checked(&dir_path, &renamed)
                    .with_context(|| format!("cannot move {} out of the way", child.name))?;
                self.result.tree.insert(entry);
                holders.insert(renamed, child.gid.clone());

                let conflict = self.conflict(&child.gid);
                conflict.flag(ConflictFacets::COLLISION);
                conflict.collided_name = Some(child.name.clone());
            }
        }

        Ok(())
    }

    /// Two files created independently, one on each side
    fn collapsible(&self, holder: &FlatEntry, newcomer: &FlatEntry) -> bool {
        let only_in = |gid: &Gid, tree: &FlatTree, not: &FlatTree| {
            tree.contains(gid) && !not.contains(gid) && !self.ancestor.contains(gid)
        };

        holder.item_type == ItemType::File
            && newcomer.item_type == ItemType::File
            && only_in(&holder.gid, self.baseline, self.other)
            && only_in(&newcomer.gid, self.other, self.baseline)
    }

    fn collapse(&mut self, holder: &FlatEntry, newcomer: &FlatEntry) {
        debug!(keep = %holder.gid, drop = %newcomer.gid, name = %holder.name, "collapsing items added on both sides");
        self.result.tree.remove(&newcomer.gid);
        self.result.conflicts.remove(&newcomer.gid);
        self.result
            .collapsed
            .insert(newcomer.gid.clone(), holder.gid.clone());

        if holder.attrbits != newcomer.attrbits {
            self.conflict(&holder.gid).flag(ConflictFacets::ATTRBITS);
        }
        if holder.oid == newcomer.oid {
            return;
        }
        if let (Some(baseline), Some(other)) = (holder.oid.clone(), newcomer.oid.clone()) {
            self.conflict(&holder.gid).flag(ConflictFacets::CONTENTS);
            self.result.content_merges.insert(
                holder.gid.clone(),
                ContentMerge {
                    ancestor: None,
                    baseline,
                    other,
                },
            );
        }
    }

    fn record_presence(&mut self) {
        for (gid, conflict) in &mut self.result.conflicts {
            for (tree, bit) in [
                (self.ancestor, MergePresence::ANCESTOR),
                (self.baseline, MergePresence::BASELINE),
                (self.other, MergePresence::OTHER),
                (&self.result.tree, MergePresence::RESULT),
            ] {
                conflict.presence.set(bit, tree.contains(gid));
            }
            if self.result.collapsed.values().any(|kept| kept == gid) {
                conflict.presence |= MergePresence::OTHER;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WcErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};
    use std::collections::HashMap;

    fn oid(seed: char) -> ObjectId {
        ObjectId::try_parse(seed.to_string().repeat(40)).expect("valid object id")
    }

    /// Named gids so trees can be written as lists
    struct Names {
        gids: HashMap<&'static str, Gid>,
    }

    impl Names {
        fn gid(&mut self, name: &'static str) -> Gid {
            self.gids.entry(name).or_insert_with(Gid::generate).clone()
        }

        /// `(key, parent key, entryname, content seed)`; a `None` seed makes a directory
        fn tree(&mut self, items: &[(&'static str, &'static str, &'static str, Option<char>)]) -> FlatTree {
            let root = self.gid("@");
            let mut tree = FlatTree::with_root(FlatEntry::new(
                root,
                None,
                "@".to_string(),
                ItemType::Directory,
                0,
                None,
            ));
            for (key, parent, name, seed) in items {
                let item_type = if seed.is_some() {
                    ItemType::File
                } else {
                    ItemType::Directory
                };
                tree.insert(FlatEntry::new(
                    self.gid(key),
                    Some(self.gid(parent)),
                    name.to_string(),
                    item_type,
                    0,
                    seed.map(oid),
                ));
            }
            tree
        }
    }

    #[fixture]
    fn names() -> Names {
        Names {
            gids: HashMap::new(),
        }
    }

    fn flags() -> PortabilityFlags {
        PortabilityFlags::all()
    }

    #[rstest]
    fn collision_rename_onto_a_taken_name_fails(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[]);
        let mut b = names.tree(&[("d", "@", "x", None)]);
        let c = names.tree(&[("f", "@", "x", Some('1'))]);
        b.insert(FlatEntry::new(
            names.gid("blocker"),
            Some(names.gid("@")),
            collision_name("x", &names.gid("f")),
            ItemType::File,
            0,
            Some(oid('2')),
        ));

        let error = merge_trees(&a, &b, &c, flags()).expect_err("renamed name is taken");

        assert_eq!(WcError::kind(&error), Some(WcErrorKind::AlreadyExists));
        Ok(())
    }

    #[rstest]
    fn one_sided_changes_are_taken(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[("f", "@", "a.txt", Some('1')), ("g", "@", "b.txt", Some('2'))]);
        let b = names.tree(&[("f", "@", "a.txt", Some('3')), ("g", "@", "b.txt", Some('2'))]);
        let c = names.tree(&[("f", "@", "a.txt", Some('1')), ("g", "@", "renamed.txt", Some('2'))]);

        let result = merge_trees(&a, &b, &c, flags())?;

        let f = result.tree.get(&names.gid("f")).context("f")?;
        let g = result.tree.get(&names.gid("g")).context("g")?;
        assert_eq!(f.oid, Some(oid('3')));
        assert_eq!(g.name, "renamed.txt");
        assert!(result.conflicts.is_empty());
        Ok(())
    }

    #[rstest]
    fn divergent_content_needs_a_content_merge(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[("f", "@", "a.txt", Some('1'))]);
        let b = names.tree(&[("f", "@", "a.txt", Some('2'))]);
        let c = names.tree(&[("f", "@", "a.txt", Some('3'))]);

        let result = merge_trees(&a, &b, &c, flags())?;

        let f = names.gid("f");
        assert_eq!(
            result.content_merges.get(&f),
            Some(&ContentMerge {
                ancestor: Some(oid('1')),
                baseline: oid('2'),
                other: oid('3'),
            })
        );
        assert_eq!(result.conflicts[&f].unresolved, ConflictFacets::CONTENTS);
        assert_eq!(result.conflicts[&f].presence, MergePresence::all());
        Ok(())
    }

    #[rstest]
    fn delete_against_modify_keeps_the_item(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[("f", "@", "a.txt", Some('1')), ("g", "@", "b.txt", Some('2'))]);
        let b = names.tree(&[("f", "@", "a.txt", Some('5')), ("g", "@", "b.txt", Some('2'))]);
        let c = names.tree(&[]);

        let result = merge_trees(&a, &b, &c, flags())?;

        let (f, g) = (names.gid("f"), names.gid("g"));
        assert!(result.tree.contains(&f));
        assert!(!result.tree.contains(&g));
        assert_eq!(result.conflicts[&f].unresolved, ConflictFacets::EXISTENCE);
        assert!(!result.conflicts[&f].presence.contains(MergePresence::OTHER));
        Ok(())
    }

    #[rstest]
    fn deleted_directory_with_new_children_is_restored(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[("d", "@", "dir", None)]);
        let b = names.tree(&[("d", "@", "dir", None), ("n", "d", "new.txt", Some('1'))]);
        let c = names.tree(&[]);

        let result = merge_trees(&a, &b, &c, flags())?;

        let d = names.gid("d");
        assert_eq!(
            result.tree.path_of(&names.gid("n")),
            Some(std::path::PathBuf::from("dir/new.txt"))
        );
        assert_eq!(result.conflicts[&d].unresolved, ConflictFacets::EXISTENCE);
        Ok(())
    }

    #[rstest]
    fn crossing_moves_do_not_create_a_cycle(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[("x", "@", "x", None), ("y", "@", "y", None)]);
        let b = names.tree(&[("x", "y", "x", None), ("y", "@", "y", None)]);
        let c = names.tree(&[("x", "@", "x", None), ("y", "x", "y", None)]);

        let result = merge_trees(&a, &b, &c, flags())?;

        let y = names.gid("y");
        assert_eq!(
            result.tree.path_of(&names.gid("x")),
            Some(std::path::PathBuf::from("y/x"))
        );
        assert_eq!(result.tree.path_of(&y), Some(std::path::PathBuf::from("y")));
        assert_eq!(result.conflicts[&y].unresolved, ConflictFacets::LOCATION);
        Ok(())
    }

    #[rstest]
    fn files_added_on_both_sides_collapse(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[]);
        let b = names.tree(&[("mine", "@", "x.txt", Some('1'))]);
        let c = names.tree(&[("theirs", "@", "x.txt", Some('2'))]);

        let result = merge_trees(&a, &b, &c, flags())?;

        let (mine, theirs) = (names.gid("mine"), names.gid("theirs"));
        assert!(!result.tree.contains(&theirs));
        assert_eq!(result.collapsed.get(&theirs), Some(&mine));
        assert_eq!(
            result.content_merges.get(&mine),
            Some(&ContentMerge {
                ancestor: None,
                baseline: oid('1'),
                other: oid('2'),
            })
        );
        Ok(())
    }

    #[rstest]
    fn directories_added_on_both_sides_are_renamed(mut names: Names) -> anyhow::Result<()> {
        let a = names.tree(&[]);
        let b = names.tree(&[("mine", "@", "lib", None)]);
        let c = names.tree(&[("theirs", "@", "LIB", None)]);

        let result = merge_trees(&a, &b, &c, flags())?;

        let theirs = names.gid("theirs");
        let entry = result.tree.get(&theirs).context("theirs")?;
        assert_eq!(entry.name, collision_name("LIB", &theirs));
        assert_eq!(result.conflicts[&theirs].collided_name.as_deref(), Some("LIB"));
        assert_eq!(result.conflicts[&theirs].unresolved, ConflictFacets::COLLISION);
        Ok(())
    }
}
