use crate::areas::metadata::{Alias, CsetLabel, MetadataRead, PendingFlags};
use crate::areas::transaction::WcTx;
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::commit::selection::Scope;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::journal::transition::{Provenance, Rebaseline, Transition, sparse_closure};
use crate::artifacts::liveview::WcSnapshot;
use crate::artifacts::liveview::status_flags::StatusFlags;
use crate::artifacts::objects::flat_tree::{FlatEntry, FlatTree};
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::status::status_record::StatusRecord;
use crate::error::WcError;
use anyhow::Context;
use bitflags::bitflags;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, info_span, trace};

bitflags! {
    /// Kinds of pending change a revert undoes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RevertFilters: u16 {
        const ADDED = 1 << 0;
        const DELETED = 1 << 1;
        const MODIFIED = 1 << 2;
        const ATTRBITS = 1 << 3;
        const RENAMED = 1 << 4;
        const MOVED = 1 << 5;
        const LOST = 1 << 6;
        const MERGE_CREATED = 1 << 7;
    }
}

impl Default for RevertFilters {
    fn default() -> Self {
        RevertFilters::all()
    }
}

impl RevertFilters {
    /// Parse a filter name as used on the command line, e.g. `merge-created`
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        RevertFilters::from_name(&name.to_ascii_uppercase().replace('-', "_"))
            .with_context(|| format!("unknown revert filter {name:?}"))
    }
}

/// What a revert does to the working copy, in gid space
#[derive(Debug, Default)]
struct RevertPlan {
    /// The state after the revert
    result: FlatTree,
    /// The state before, with kept-on-disk deleted items that come back
    before: FlatTree,
    unversion: BTreeSet<Gid>,
    /// Lost items that get materialized again
    restore: BTreeSet<Gid>,
    /// Items whose content is reset: a copy is kept first
    backup: Vec<PathBuf>,
    /// Every item the revert touched
    touched: BTreeSet<Gid>,
    /// Items whose content or existence came from a merge and no longer does
    drop_provenance: BTreeSet<Gid>,
}

impl WorkingCopy {
    /// Undo pending changes at or below `paths` (everything when `None`)
    ///
    /// Only the kinds of change in `filters` are undone. Added items are left on disk as
    /// uncontrolled files. Content that is about to be replaced is copied aside first unless it
    /// is a merge result that can be produced again. Reverting everything also abandons a
    /// pending merge.
    pub fn revert(
        &mut self,
        paths: Option<&[PathBuf]>,
        filters: RevertFilters,
    ) -> anyhow::Result<Vec<StatusRecord>> {
        let span = info_span!("revert", root = %self.root().display());
        let _guard = span.enter();

        let full = paths.is_none() && filters == RevertFilters::all();
        let mut tx = self.begin()?;
        let scope = match paths {
            None => Scope::everything(),
            Some(paths) => {
                let mut roots = Vec::new();
                for path in paths {
                    let alias = tx.controlled_at(path)?;
                    let gid = tx.view().get(alias)?.gid.clone().with_context(|| {
                        format!("{} is controlled but has no gid", path.display())
                    })?;
                    roots.push(gid);
                }
                Scope::new(Some(roots), None)
            }
        };
        let snapshot = {
            let (wc, view) = tx.parts();
            view.snapshot(wc)?
        };

        let mut plan = RevertPlan {
            result: snapshot.current.clone(),
            before: snapshot.current.clone(),
            ..Default::default()
        };
        let changed = snapshot
            .flags
            .iter()
            .filter(|(gid, _)| scope.covers(&snapshot, gid))
            .map(|(gid, flags)| (gid.clone(), *flags))
            .collect::<BTreeMap<_, _>>();

        for (gid, flags) in &changed {
            tx.wc().check_cancelled()?;
            if flags.contains(StatusFlags::S_ADDED) {
                let filter = match flags
                    .intersects(StatusFlags::S_MERGE_CREATED | StatusFlags::S_UPDATE_CREATED)
                {
                    true => RevertFilters::MERGE_CREATED,
                    false => RevertFilters::ADDED,
                };
                if filters.contains(filter) {
                    plan.unversion_subtree(gid);
                }
                continue;
            }
            if flags.contains(StatusFlags::S_DELETED) {
                if filters.contains(RevertFilters::DELETED) {
                    let mut on_disk = |gid: &Gid| probe(&mut tx, &snapshot, gid);
                    plan.restore_deleted(&snapshot, gid, &mut on_disk)?;
                }
                continue;
            }

            if flags.contains(StatusFlags::A_LOST) && filters.contains(RevertFilters::LOST) {
                plan.restore.insert(gid.clone());
                plan.touched.insert(gid.clone());
            }
            if flags.contains(StatusFlags::S_RENAMED) && filters.contains(RevertFilters::RENAMED) {
                plan.reset_name(&snapshot, gid)?;
            }
            if flags.contains(StatusFlags::S_MOVED) && filters.contains(RevertFilters::MOVED) {
                let mut on_disk = |gid: &Gid| probe(&mut tx, &snapshot, gid);
                plan.reset_parent(&snapshot, gid, &mut on_disk)?;
            }
            if flags.contains(StatusFlags::C_MODIFIED) && filters.contains(RevertFilters::MODIFIED)
            {
                let alias = alias_of(&snapshot, gid)?;
                let current = snapshot.current.get(gid).and_then(|entry| entry.oid.as_ref());
                let disposable = tx.view().get(alias)?.issue.as_ref().is_some_and(|issue| {
                    issue.disposable && current.is_some() && issue.result_hid.as_ref() == current
                });
                let on_disk = !flags.intersects(StatusFlags::A_SPARSE | StatusFlags::A_LOST);
                if on_disk && !disposable {
                    plan.backup.push(tx.path_of(alias)?);
                }
                plan.reset_content(&snapshot, gid)?;
            }
            if flags.contains(StatusFlags::C_ATTRBITS) && filters.contains(RevertFilters::ATTRBITS)
            {
                plan.reset_attrbits(&snapshot, gid)?;
            }
        }
        plan.check_names(&snapshot)?;

        let absent = snapshot
            .lost
            .union(&snapshot.sparse)
            .cloned()
            .collect::<BTreeSet<_>>();
        let sparse = sparse_closure(&plan.result, &snapshot.sparse);
        // lost items outside the revert stay off disk
        let off_disk = sparse
            .iter()
            .chain(snapshot.lost.difference(&plan.restore))
            .cloned()
            .collect::<BTreeSet<_>>();
        let provenance = if full {
            HashMap::new()
        } else {
            snapshot
                .provenance
                .iter()
                .filter(|(gid, _)| plan.result.contains(gid))
                .filter(|(gid, _)| !plan.drop_provenance.contains(*gid))
                .map(|(gid, row)| {
                    let provenance = Provenance {
                        flags: row.flags
                            & (PendingFlags::ADD_SPECIAL_M | PendingFlags::ADD_SPECIAL_U),
                        ref_hid_merge: row.ref_hid_merge.clone(),
                    };
                    (gid.clone(), provenance)
                })
                .collect()
        };

        let aliases = tx.alias_map([&snapshot.baseline, &plan.before, &plan.result])?;
        tx.queue_all(plan.backup.iter().map(|path| JournalStep::Backup { path: path.clone() }));

        let mut rebaseline = Rebaseline::new(&snapshot.baseline, &plan.result);
        rebaseline.sparse = sparse;
        rebaseline.provenance = provenance;
        tx.queue_all(rebaseline.plan(&aliases)?);

        let mut transition = Transition::new(&plan.before, &plan.result);
        transition.absent = absent;
        transition.sparse = off_disk;
        transition.unversion = plan.unversion.clone();
        tx.queue_all(transition.plan(&aliases)?);

        let merging = tx.wc().metadata().cset(CsetLabel::L1)?.is_some();
        if full {
            tx.queue(JournalStep::ClearAllIssues);
            if merging {
                tx.queue(JournalStep::ClearCset(CsetLabel::L1));
            }
        } else {
            for gid in plan.touched.iter().chain(&plan.unversion) {
                if let Some(alias) = snapshot.aliases.get(gid) {
                    tx.queue(JournalStep::ClearIssue(*alias));
                }
            }
        }

        let mut paths = plan
            .touched
            .iter()
            .chain(&plan.unversion)
            .filter_map(|gid| plan.result.path_of(gid).or_else(|| snapshot.path_of(gid)))
            .collect::<Vec<_>>();
        paths.sort();
        paths.dedup();
        tx.apply()?;
        let records = self.records_at(&paths)?;

        debug!(reverted = records.len(), "reverted items");
        Ok(records)
    }
}

/// Current content id of an item still on disk, `None` when it is not on disk
type Probe<'p> = dyn FnMut(&Gid) -> anyhow::Result<Option<Option<ObjectId>>> + 'p;

fn probe(
    tx: &mut WcTx<'_>,
    snapshot: &WcSnapshot,
    gid: &Gid,
) -> anyhow::Result<Option<Option<ObjectId>>> {
    let alias = alias_of(snapshot, gid)?;
    let (wc, view) = tx.parts();
    if view.get(alias)?.on_disk().is_none() {
        return Ok(None);
    }
    Ok(Some(view.current_hid(wc, alias)?))
}

fn alias_of(snapshot: &WcSnapshot, gid: &Gid) -> anyhow::Result<Alias> {
    snapshot
        .aliases
        .get(gid)
        .copied()
        .with_context(|| format!("item {gid} has no alias"))
}

fn baseline_entry<'s>(snapshot: &'s WcSnapshot, gid: &Gid) -> anyhow::Result<&'s FlatEntry> {
    snapshot
        .baseline
        .get(gid)
        .with_context(|| format!("item {gid} has no baseline"))
}

impl RevertPlan {
    fn unversion_subtree(&mut self, gid: &Gid) {
        for member in self.result.subtree(gid) {
            self.result.remove(&member);
            self.drop_provenance.insert(member.clone());
            self.unversion.insert(member);
        }
        trace!(%gid, "unversioning");
    }

    /// Bring a deleted item back along with any deleted parents
    ///
    /// Deleted items kept on disk join the old state too, so they are taken over instead of
    /// written anew.
    fn restore_deleted(
        &mut self,
        snapshot: &WcSnapshot,
        gid: &Gid,
        probe: &mut Probe<'_>,
    ) -> anyhow::Result<()> {
        let (mut chain, mut top) = (vec![gid.clone()], gid.clone());
        while let Some(parent) = baseline_entry(snapshot, &top)?.parent.clone()
            && !self.result.contains(&parent)
        {
            chain.push(parent.clone());
            top = parent;
        }

        for member in chain.into_iter().rev() {
            let entry = baseline_entry(snapshot, &member)?;
            let mut restored = entry.clone();
            if restored.is_directory() {
                restored.oid = None;
            }
            if !self.before.contains(&member)
                && let Some(current) = probe(&member)?
            {
                let mut kept = restored.clone();
                if !kept.is_directory() {
                    kept.oid = current;
                }
                self.before.insert(kept);
            }
            if !self.result.contains(&member) {
                self.result.insert(restored);
                self.touched.insert(member);
            }
        }
        Ok(())
    }

    fn reset_name(&mut self, snapshot: &WcSnapshot, gid: &Gid) -> anyhow::Result<()> {
        let name = baseline_entry(snapshot, gid)?.name.clone();
        let mut entry = self.take(gid)?;
        entry.name = name;
        self.result.insert(entry);
        self.touched.insert(gid.clone());
        Ok(())
    }

    fn reset_parent(
        &mut self,
        snapshot: &WcSnapshot,
        gid: &Gid,
        probe: &mut Probe<'_>,
    ) -> anyhow::Result<()> {
        let parent = baseline_entry(snapshot, gid)?.parent.clone();
        if let Some(parent) = &parent
            && !self.result.contains(parent)
        {
            self.restore_deleted(snapshot, parent, probe)?;
        }
        if let Some(parent) = &parent
            && self.result.is_ancestor(gid, parent)
        {
            return Err(WcError::Unsupported(format!(
                "moving {} back would put it inside itself",
                snapshot.path_of(gid).unwrap_or_default().display()
            ))
            .into());
        }

        let mut entry = self.take(gid)?;
        entry.parent = parent;
        self.result.insert(entry);
        self.touched.insert(gid.clone());
        Ok(())
    }

    fn reset_content(&mut self, snapshot: &WcSnapshot, gid: &Gid) -> anyhow::Result<()> {
        let oid = baseline_entry(snapshot, gid)?.oid.clone();
        self.result.set_oid(gid, oid);
        self.drop_provenance.insert(gid.clone());
        self.touched.insert(gid.clone());
        Ok(())
    }

    fn reset_attrbits(&mut self, snapshot: &WcSnapshot, gid: &Gid) -> anyhow::Result<()> {
        let attrbits = baseline_entry(snapshot, gid)?.attrbits;
        let mut entry = self.take(gid)?;
        entry.attrbits = attrbits;
        self.result.insert(entry);
        self.touched.insert(gid.clone());
        Ok(())
    }

    fn take(&mut self, gid: &Gid) -> anyhow::Result<FlatEntry> {
        self.result
            .get(gid)
            .cloned()
            .with_context(|| format!("item {gid} is not in the working copy"))
    }

    /// Two items ending up under one name means something else took the old place
    fn check_names(&self, snapshot: &WcSnapshot) -> anyhow::Result<()> {
        let mut seen = HashMap::new();
        for entry in self.result.entries() {
            let Some(parent) = &entry.parent else {
                continue;
            };
            if let Some(other) = seen.insert((parent.clone(), entry.name.clone()), &entry.gid) {
                let (reverted, blocker) = match self.touched.contains(&entry.gid) {
                    true => (&entry.gid, other),
                    false => (other, &entry.gid),
                };
                return Err(WcError::AlreadyExists {
                    path: self.result.path_of(reverted).unwrap_or_default(),
                    blocker: snapshot
                        .path_of(blocker)
                        .map(|path| path.display().to_string())
                        .unwrap_or_else(|| blocker.to_string()),
                }
                .into());
            }
        }
        Ok(())
    }
}
