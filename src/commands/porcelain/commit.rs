use crate::areas::database::ObjectStore;
use crate::areas::metadata::{CsetLabel, MetadataRead, PendingFlags};
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::commit::selection::{self, Scope};
use crate::artifacts::commit::synthesis;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::journal::transition::{Provenance, Rebaseline};
use crate::artifacts::objects::changeset::{Author, Changeset};
use crate::artifacts::objects::object_id::ObjectId;
use crate::error::WcError;
use anyhow::Context;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, info_span};

impl WorkingCopy {
    /// Record pending changes as a new changeset and make it the baseline
    ///
    /// With `selection` only the changes at or below those repo paths (and within `depth` levels
    /// of them) are committed; everything else stays pending. While a merge is pending only a
    /// full commit is possible and the changeset gets both parents. The attached branch, if any,
    /// moves to the new changeset.
    pub fn commit(
        &mut self,
        selection: Option<&[PathBuf]>,
        message: &str,
        depth: Option<usize>,
    ) -> anyhow::Result<ObjectId> {
        let span = info_span!("commit", root = %self.root().display());
        let _guard = span.enter();

        let metadata = self.metadata();
        let baseline = metadata
            .cset(CsetLabel::L0)?
            .context("working copy has no baseline changeset")?;
        let merging = metadata.cset(CsetLabel::L1)?;
        let branch = metadata.branch()?;
        if let Some(branch) = &branch
            && let Some(head) = self.repository().refs().read_head(branch)?
            && head != baseline
        {
            return Err(WcError::Unsupported(format!(
                "branch {branch} has moved on to {}; update before committing",
                head.to_short_oid()
            ))
            .into());
        }

        let mut tx = self.begin()?;
        let scope = match selection {
            None => Scope::new(None, depth),
            Some(paths) => {
                let mut roots = Vec::new();
                for path in paths {
                    let alias = tx.controlled_at(path)?;
                    let gid = tx.view().get(alias)?.gid.clone().with_context(|| {
                        format!("{} is controlled but has no gid", path.display())
                    })?;
                    roots.push(gid);
                }
                Scope::new(Some(roots), depth)
            }
        };
        if merging.is_some() && scope.is_partial() {
            return Err(WcError::PartialCommitConflict {
                path: selection
                    .and_then(|paths| paths.first().cloned())
                    .unwrap_or_default(),
                reason: "a merge is pending; only the whole working copy can be committed"
                    .to_string(),
            }
            .into());
        }

        let snapshot = {
            let (wc, view) = tx.parts();
            view.snapshot(wc)?
        };
        let selected = selection::select(&snapshot, &scope)?;
        if selected.is_empty() && merging.is_none() {
            return Err(WcError::NotFound("no changes to commit".to_string()).into());
        }

        let committed = synthesis::synthesize(tx.wc(), &snapshot, &selected)?;
        let mut parents = vec![baseline];
        parents.extend(merging.clone());
        let author = Author::load(&tx.wc().config().author)?;
        let changeset = Changeset::new(
            parents,
            committed.root_oid.clone(),
            author,
            message.trim().to_string(),
        );
        let changeset_oid = tx.wc().repository().database().store_changeset(&changeset)?;

        let provenance = snapshot
            .provenance
            .iter()
            .filter(|(gid, _)| !selected.contains(*gid))
            .map(|(gid, row)| {
                let provenance = Provenance {
                    flags: row.flags & (PendingFlags::ADD_SPECIAL_M | PendingFlags::ADD_SPECIAL_U),
                    ref_hid_merge: row.ref_hid_merge.clone(),
                };
                (gid.clone(), provenance)
            })
            .collect::<HashMap<_, _>>();

        let aliases = tx.alias_map([&committed.tree, &snapshot.current])?;
        let mut rebaseline = Rebaseline::new(&committed.tree, &snapshot.current);
        rebaseline.replace_baseline = true;
        rebaseline.sparse = snapshot.sparse.clone();
        rebaseline.provenance = provenance;
        tx.queue_all(rebaseline.plan(&aliases)?);
        tx.queue(JournalStep::SetCset {
            label: CsetLabel::L0,
            hid: changeset_oid.clone(),
        });
        if merging.is_some() {
            tx.queue(JournalStep::ClearCset(CsetLabel::L1));
            tx.queue(JournalStep::ClearAllIssues);
        }

        // last, so a failing step leaves the branch where it was
        if let Some(branch) = branch {
            tx.queue(JournalStep::MoveBranchHead {
                branch,
                hid: changeset_oid.clone(),
            });
        }

        tx.apply()?;

        info!(changeset = %changeset_oid, items = selected.len(), "committed");
        Ok(changeset_oid)
    }
}
