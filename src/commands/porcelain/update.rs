use crate::areas::metadata::{CsetLabel, MetadataRead, PendingFlags};
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::journal::transition::{Provenance, Rebaseline, Transition, sparse_closure};
use crate::artifacts::merge::conflict::ConflictFacets;
use crate::artifacts::merge::engine::merge_trees;
use crate::artifacts::objects::object_id::ObjectId;
use crate::error::WcError;
use anyhow::Context;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, info_span};

impl WorkingCopy {
    /// Move the baseline to `target` (the attached branch's head when `None`)
    ///
    /// Pending changes are carried over as long as they do not overlap with what changed
    /// between the two changesets. Locally changed items that the target deleted stay in place
    /// as update-created additions. Without `allow_dirty` any pending change refuses the update.
    pub fn update(&mut self, target: Option<&str>, allow_dirty: bool) -> anyhow::Result<ObjectId> {
        let span = info_span!("update", root = %self.root().display());
        let _guard = span.enter();

        let metadata = self.metadata();
        if metadata.cset(CsetLabel::L1)?.is_some() {
            return Err(WcError::Unsupported(
                "a merge is pending; commit or revert it before updating".to_string(),
            )
            .into());
        }
        let baseline = metadata
            .cset(CsetLabel::L0)?
            .context("working copy has no baseline changeset")?;
        let target = match target {
            Some(revision) => self.repository().resolve_revision(revision)?,
            None => {
                let branch = metadata.branch()?.ok_or_else(|| {
                    WcError::Unsupported("no branch is attached; name a revision".to_string())
                })?;
                self.repository()
                    .refs()
                    .read_head(&branch)?
                    .ok_or_else(|| WcError::NotFound(format!("branch {branch}")))?
            }
        };
        if target == baseline {
            debug!(changeset = %target, "already up to date");
            return Ok(target);
        }

        let flags = self.portability();
        let mut tx = self.begin()?;
        let snapshot = {
            let (wc, view) = tx.parts();
            view.snapshot(wc)?
        };
        if !allow_dirty && let Some(gid) = snapshot.first_dirty() {
            return Err(WcError::Dirty(snapshot.path_of(gid).unwrap_or_default()).into());
        }

        let other = tx.wc().repository().flat_tree(&target)?;
        let merged = merge_trees(&snapshot.baseline, &snapshot.current, &other, flags)?;
        let mut provenance = snapshot
            .provenance
            .iter()
            .filter(|(gid, _)| !other.contains(gid))
            .map(|(gid, row)| {
                let provenance = Provenance {
                    flags: row.flags & PendingFlags::ADD_SPECIAL_U,
                    ref_hid_merge: None,
                };
                (gid.clone(), provenance)
            })
            .collect::<HashMap<_, _>>();

        for (gid, conflict) in &merged.conflicts {
            let path = || -> PathBuf { snapshot.path_of(gid).unwrap_or_default() };
            if conflict.facets == ConflictFacets::EXISTENCE && !other.contains(gid) {
                // the target deleted what we changed: keep ours as an addition
                provenance.entry(gid.clone()).or_default().flags |= PendingFlags::ADD_SPECIAL_U;
                continue;
            }
            return Err(WcError::Dirty(path()))
                .with_context(|| format!("update conflicts with local changes: {}", conflict.summary()));
        }
        if let Some(gid) = merged.content_merges.keys().next() {
            return Err(WcError::Dirty(snapshot.path_of(gid).unwrap_or_default()))
                .context("file was changed both locally and in the target");
        }

        let absent = snapshot
            .lost
            .union(&snapshot.sparse)
            .cloned()
            .collect::<BTreeSet<_>>();
        let sparse = sparse_closure(&merged.tree, &snapshot.sparse);
        let aliases = tx.alias_map([&snapshot.current, &merged.tree, &other])?;

        let mut rebaseline = Rebaseline::new(&other, &merged.tree);
        rebaseline.replace_baseline = true;
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
        tx.queue_all(transition.plan(&aliases)?);

        tx.queue(JournalStep::SetCset {
            label: CsetLabel::L0,
            hid: target.clone(),
        });
        tx.apply()?;

        info!(from = %baseline, to = %target, "updated");
        Ok(target)
    }
}
