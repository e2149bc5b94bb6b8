use crate::areas::metadata::{Alias, PendingFlags, PendingRow};
use crate::areas::transaction::WcTx;
use crate::areas::working_copy::WorkingCopy;
use crate::areas::workspace::METADATA_DIR;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::liveview::item::ScanState;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::status::status_record::StatusRecord;
use crate::error::WcError;
use anyhow::Context;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info_span};

impl WorkingCopy {
    /// Put uncontrolled items under version control
    ///
    /// Paths are repo paths. A directory is added with everything below it, and uncontrolled
    /// directories on the way to an added path are added too.
    pub fn add(&mut self, paths: &[PathBuf]) -> anyhow::Result<Vec<StatusRecord>> {
        let span = info_span!("add", root = %self.root().display());
        let _guard = span.enter();

        let mut tx = self.begin()?;
        let mut added = Vec::new();

        for path in paths {
            tx.wc().check_cancelled()?;
            reject_reserved(path)?;

            let (wc, view) = tx.parts();
            let alias = view.item_by_path(wc, path)?.ok_or_else(|| {
                WcError::NotFound(format!("{} does not exist", path.display()))
            })?;
            add_path(&mut tx, alias, &mut added)
                .with_context(|| format!("failed to add {}", path.display()))?;
        }

        let (wc, view) = tx.parts();
        let records = added
            .iter()
            .map(|alias| StatusRecord::build(wc, view, *alias))
            .collect::<anyhow::Result<Vec<_>>>()?;
        tx.apply()?;

        debug!(added = records.len(), "added items");
        Ok(records)
    }
}

pub(crate) fn reject_reserved(path: &Path) -> anyhow::Result<()> {
    match path.components().next() {
        Some(Component::Normal(first)) if first == METADATA_DIR => {
            Err(WcError::Reserved(path.to_path_buf()).into())
        }
        _ => Ok(()),
    }
}

fn add_path(tx: &mut WcTx<'_>, alias: Alias, added: &mut Vec<Alias>) -> anyhow::Result<()> {
    let item = tx.view().get(alias)?;
    if item.reserved {
        return Err(WcError::Reserved(tx.path_of(alias)?).into());
    }
    if item.is_controlled() && !item.is_live() {
        return Err(WcError::NotFound(format!(
            "{} is deleted and not on disk",
            tx.path_of(alias)?.display()
        ))
        .into());
    }

    if !item.is_controlled() {
        let (mut chain, mut top) = (vec![alias], alias);
        while let Some(parent) = tx.view().get(top)?.parent
            && !tx.view().get(parent)?.is_controlled()
        {
            chain.push(parent);
            top = parent;
        }
        for ancestor in chain.into_iter().rev() {
            add_one(tx, ancestor, added)?;
        }
    }

    if tx.view().get(alias)?.is_directory() {
        add_children(tx, alias, added)?;
    }
    Ok(())
}

fn add_children(tx: &mut WcTx<'_>, dir: Alias, added: &mut Vec<Alias>) -> anyhow::Result<()> {
    let children = {
        let (wc, view) = tx.parts();
        view.children(wc, dir)?
    };

    for child in children {
        let item = tx.view().get(child)?;
        let found = item.is_found() && !item.reserved;
        let (live, directory) = (item.is_live(), item.is_directory());

        if found {
            add_one(tx, child, added)?;
        }
        if (found || live) && directory {
            add_children(tx, child, added)?;
        }
    }
    Ok(())
}

/// Give one found item a gid and an ADDED pending row
fn add_one(tx: &mut WcTx<'_>, alias: Alias, added: &mut Vec<Alias>) -> anyhow::Result<()> {
    let (wc, view) = tx.parts();
    let item = view.get(alias)?;
    let parent = item
        .parent
        .context("the working-copy root is always controlled")?;
    let (name, item_type) = (item.entryname.clone(), item.item_type);

    let parent_item = view.get(parent)?;
    if parent_item.is_sparse() {
        return Err(WcError::Sparse {
            path: view.path_of(parent)?,
            reason: "items cannot be added below a sparse directory".to_string(),
        }
        .into());
    }

    let parent_path = view.path_of(parent)?;
    view.sibling_collider(wc, parent, alias)?
        .add_checked(&parent_path, &name)?;

    let gid = Gid::generate();
    view.assign_gid(alias, gid.clone())?;
    let row = PendingRow::new(alias, Some(parent), name, item_type, PendingFlags::ADDED);
    let item = view.get_mut(alias)?;
    item.pending = Some(row.clone());
    if let ScanState::Found(entry) = item.scan.clone() {
        item.scan = ScanState::Matched(entry);
    }

    tx.queue(JournalStep::InsertGid { alias, gid });
    tx.queue(JournalStep::SetPending(row));
    added.push(alias);
    Ok(())
}
