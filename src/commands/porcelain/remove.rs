use crate::areas::metadata::{Alias, PendingFlags};
use crate::areas::transaction::WcTx;
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::liveview::item::ScanState;
use crate::artifacts::liveview::status_flags::StatusFlags;
use crate::artifacts::status::status_record::StatusRecord;
use crate::error::WcError;
use std::path::PathBuf;
use tracing::{debug, info_span};

impl WorkingCopy {
    /// Schedule items for deletion
    ///
    /// Controlled items are removed from disk unless `keep` is set. An item that was only added
    /// goes back to being uncontrolled and stays on disk. Local modifications (and uncontrolled
    /// files inside a directory) make the working copy [`WcError::Dirty`] unless `force` or
    /// `keep` is given.
    pub fn remove(
        &mut self,
        paths: &[PathBuf],
        keep: bool,
        force: bool,
    ) -> anyhow::Result<Vec<StatusRecord>> {
        let span = info_span!("remove", root = %self.root().display());
        let _guard = span.enter();

        let mut tx = self.begin()?;
        let mut removed = Vec::new();

        for path in paths {
            tx.wc().check_cancelled()?;
            let alias = tx.controlled_at(path)?;
            let item = tx.view().get(alias)?;
            if item.parent.is_none() {
                return Err(WcError::Unsupported("removing the working-copy root".to_string()).into());
            }
            if !item.is_live() {
                continue;
            }

            let mut subtree = Vec::new();
            collect(&mut tx, alias, keep || force, &mut subtree)?;
            for alias in subtree.into_iter().rev() {
                remove_one(&mut tx, alias, keep)?;
                removed.push(alias);
            }
        }

        let (wc, view) = tx.parts();
        let records = removed
            .iter()
            .map(|alias| StatusRecord::build(wc, view, *alias))
            .collect::<anyhow::Result<Vec<_>>>()?;
        tx.apply()?;

        debug!(removed = records.len(), "scheduled removals");
        Ok(records)
    }
}

/// Live items of a subtree, parents first, refusing to lose local changes unless allowed
fn collect(
    tx: &mut WcTx<'_>,
    alias: Alias,
    allow_dirty: bool,
    out: &mut Vec<Alias>,
) -> anyhow::Result<()> {
    let (wc, view) = tx.parts();
    let flags = view.status_flags(wc, alias)?;
    if !allow_dirty && flags.intersects(StatusFlags::CONTENT_MASK) {
        return Err(WcError::Dirty(view.path_of(alias)?).into());
    }
    out.push(alias);

    if !view.get(alias)?.is_directory() {
        return Ok(());
    }
    let mut live = Vec::new();
    for child in view.children(wc, alias)? {
        let item = view.get(child)?;
        if item.is_found() && !item.reserved && !allow_dirty {
            return Err(WcError::Dirty(view.path_of(child)?).into());
        }
        if item.is_live() {
            live.push(child);
        }
    }

    for child in live {
        collect(tx, child, allow_dirty, out)?;
    }
    Ok(())
}

fn remove_one(tx: &mut WcTx<'_>, alias: Alias, keep: bool) -> anyhow::Result<()> {
    let path = tx.path_of(alias)?;
    let (_, view) = tx.parts();
    let item = view.get_mut(alias)?;

    if item.is_added() {
        item.pending = None;
        item.gid = None;
        if let ScanState::Matched(entry) = item.scan.clone() {
            item.scan = ScanState::Found(entry);
        }
        tx.queue(JournalStep::ClearPending(alias));
        return Ok(());
    }

    let mut row = item.pending_row();
    row.flags.insert(PendingFlags::DELETED);
    item.pending = Some(row.clone());
    let on_disk = item.on_disk().is_some() && !item.is_sparse();
    let directory = item.is_directory();
    item.scan = ScanState::NotScanned;

    tx.queue(JournalStep::SetPending(row));
    if !keep && on_disk {
        tx.queue(match directory {
            true => JournalStep::RemoveDirectory {
                path,
                sparse: false,
            },
            false => JournalStep::RemoveFile {
                alias,
                path,
                sparse: false,
            },
        });
    }
    Ok(())
}
