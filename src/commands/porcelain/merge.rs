use crate::areas::metadata::{CsetLabel, MetadataRead, PendingFlags};
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::journal::transition::{Provenance, Rebaseline, Transition, sparse_closure};
use crate::artifacts::merge::auto_merge::AutoMerger;
use crate::artifacts::merge::conflict::{Conflict, MergePresence};
use crate::artifacts::merge::engine::merge_trees;
use crate::artifacts::objects::object_id::ObjectId;
use crate::error::WcError;
use anyhow::Context;
use derive_new::new;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, info_span};

/// Outcome of [`WorkingCopy::merge`]
#[derive(Debug, Clone, new)]
pub struct MergeReport {
    pub target: ObjectId,
    /// Best common ancestor, `None` when the target was already merged
    pub ancestor: Option<ObjectId>,
    /// Every conflict raised, resolved or not, by result path
    #[new(default)]
    pub conflicts: Vec<(PathBuf, Conflict)>,
}

impl MergeReport {
    pub fn is_up_to_date(&self) -> bool {
        self.ancestor.is_none()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &(PathBuf, Conflict)> {
        self.conflicts
            .iter()
            .filter(|(_, conflict)| !conflict.is_resolved())
    }
}

impl WorkingCopy {
    /// Merge `target` into the working copy
    ///
    /// The result lands as pending changes on top of the unchanged baseline with the target
    /// recorded as the pending merge changeset. Conflicting files are handed to the configured
    /// merge tools unless `no_auto_merge` is set; every conflict becomes an issue on its item.
    pub fn merge(
        &mut self,
        target: &str,
        allow_dirty: bool,
        no_auto_merge: bool,
    ) -> anyhow::Result<MergeReport> {
        let span = info_span!("merge", root = %self.root().display(), target);
        let _guard = span.enter();

        let metadata = self.metadata();
        if metadata.cset(CsetLabel::L1)?.is_some() {
            return Err(WcError::Unsupported(
                "a merge is already pending; commit or revert it first".to_string(),
            )
            .into());
        }
        let baseline = metadata
            .cset(CsetLabel::L0)?
            .context("working copy has no baseline changeset")?;
        let repository = self.repository();
        let target = repository.resolve_revision(target)?;
        if repository.is_ancestor(&target, &baseline)? {
            debug!(changeset = %target, "target is already merged");
            return Ok(MergeReport::new(target, None));
        }
        let ancestor = repository.merge_base(&baseline, &target)?.ok_or_else(|| {
            WcError::Unsupported(format!(
                "{} and {} share no history",
                baseline.to_short_oid(),
                target.to_short_oid()
            ))
        })?;

        let flags = self.portability();
        let mut tx = self.begin()?;
        let snapshot = {
            let (wc, view) = tx.parts();
            view.snapshot(wc)?
        };
        if !allow_dirty && let Some(gid) = snapshot.first_dirty() {
            return Err(WcError::Dirty(snapshot.path_of(gid).unwrap_or_default()).into());
        }

        let repository = tx.wc().repository();
        let ancestor_tree = repository.flat_tree(&ancestor)?;
        let other = repository.flat_tree(&target)?;
        let mut merged = merge_trees(&ancestor_tree, &snapshot.current, &other, flags)?;

        let absent = snapshot
            .lost
            .union(&snapshot.sparse)
            .cloned()
            .collect::<BTreeSet<_>>();
        for gid in merged.content_merges.keys() {
            let dir = tx.wc().merge_dir(gid);
            tx.add_scratch(dir);
        }

        let mut content = HashMap::new();
        {
            let merger = AutoMerger::new(tx.wc(), no_auto_merge)?;
            for (gid, merge) in &merged.content_merges {
                tx.wc().check_cancelled()?;
                let current_path = snapshot.current.path_of(gid);
                let rule_path = ancestor_tree
                    .path_of(gid)
                    .or_else(|| current_path.clone())
                    .with_context(|| format!("merged item {gid} has no path"))?;
                let on_disk = current_path.filter(|_| !absent.contains(gid));
                let conflict = merged
                    .conflicts
                    .entry(gid.clone())
                    .or_insert_with(|| Conflict::new(gid.clone(), MergePresence::empty()));

                if let Some(source) =
                    merger.merge_content(gid, &rule_path, on_disk.as_deref(), merge, conflict)?
                {
                    merged.tree.set_oid(gid, Some(source.hid().clone()));
                    content.insert(gid.clone(), source);
                }
            }
        }

        let provenance = merged
            .tree
            .entries()
            .filter_map(|entry| {
                let gid = &entry.gid;
                let theirs = other.get(gid)?;
                let mut provenance = Provenance::default();
                match snapshot.baseline.get(gid) {
                    None => provenance.flags |= PendingFlags::ADD_SPECIAL_M,
                    Some(ours) if !entry.is_directory() && ours.oid != entry.oid => {
                        provenance.ref_hid_merge = theirs.oid.clone();
                    }
                    Some(_) => return None,
                }
                Some((gid.clone(), provenance))
            })
            .collect::<HashMap<_, _>>();

        let sparse = sparse_closure(&merged.tree, &snapshot.sparse);
        let aliases = tx.alias_map([&snapshot.baseline, &snapshot.current, &merged.tree])?;

        let mut rebaseline = Rebaseline::new(&snapshot.baseline, &merged.tree);
        rebaseline.sparse = sparse.clone();
        rebaseline.provenance = provenance;
        tx.queue_all(rebaseline.plan(&aliases)?);

        let mut transition = Transition::new(&snapshot.current, &merged.tree);
        transition.absent = absent;
        // lost items stay lost
        transition.sparse = sparse
            .union(&sparse_closure(&merged.tree, &snapshot.lost))
            .cloned()
            .collect();
        transition.content = content;
        tx.queue_all(transition.plan(&aliases)?);

        let mut report = MergeReport::new(target.clone(), Some(ancestor));
        tx.queue(JournalStep::ClearAllIssues);
        for (gid, conflict) in merged.conflicts {
            let alias = tx.ensure_alias(&gid)?;
            tx.queue(JournalStep::SetIssue {
                alias,
                conflict: Box::new(conflict.clone()),
            });
            let path = merged
                .tree
                .path_of(&gid)
                .or_else(|| snapshot.path_of(&gid))
                .unwrap_or_default();
            report.conflicts.push((path, conflict));
        }
        tx.queue(JournalStep::SetCset {
            label: CsetLabel::L1,
            hid: target.clone(),
        });
        tx.apply()?;

        report.conflicts.sort_by(|(a, _), (b, _)| a.cmp(b));
        info!(
            changeset = %target,
            conflicts = report.conflicts.len(),
            unresolved = report.unresolved().count(),
            "merged"
        );
        Ok(report)
    }
}
