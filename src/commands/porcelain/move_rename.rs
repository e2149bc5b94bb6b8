use crate::areas::metadata::Alias;
use crate::areas::transaction::WcTx;
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::liveview::item::ScanState;
use crate::artifacts::status::status_record::StatusRecord;
use crate::commands::porcelain::add::reject_reserved;
use crate::error::WcError;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info_span};

impl WorkingCopy {
    /// Move items into a directory, or move-and-rename a single item
    ///
    /// When `destination` is a controlled directory every source moves into it under its own
    /// name. Otherwise there must be exactly one source and `destination` is its new path.
    pub fn move_items(
        &mut self,
        sources: &[PathBuf],
        destination: &Path,
    ) -> anyhow::Result<Vec<StatusRecord>> {
        let span = info_span!("move", root = %self.root().display());
        let _guard = span.enter();
        reject_reserved(destination)?;

        let mut tx = self.begin()?;
        let target_dir = {
            let (wc, view) = tx.parts();
            view.item_by_path(wc, destination)?.filter(|alias| {
                view.item(*alias)
                    .is_some_and(|item| item.is_live() && item.is_directory())
            })
        };

        let mut moved = Vec::new();
        match target_dir {
            Some(dir) => {
                for source in sources {
                    tx.wc().check_cancelled()?;
                    let alias = tx.controlled_at(source)?;
                    let name = tx.view().get(alias)?.entryname.clone();
                    relocate(&mut tx, alias, dir, name)?;
                    moved.push(alias);
                }
            }
            None => {
                let [source] = sources else {
                    return Err(WcError::NotFound(format!(
                        "{} is not a directory under version control",
                        destination.display()
                    ))
                    .into());
                };
                let (parent, name) = split_destination(&mut tx, destination)?;
                let alias = tx.controlled_at(source)?;
                relocate(&mut tx, alias, parent, name)?;
                moved.push(alias);
            }
        }

        let paths = finish(tx, moved)?;
        self.records_at(&paths)
    }

    /// Give an item a new name in the same directory
    pub fn rename(&mut self, path: &Path, new_name: &str) -> anyhow::Result<Vec<StatusRecord>> {
        let span = info_span!("rename", root = %self.root().display());
        let _guard = span.enter();

        if new_name.contains(['/', '\\']) {
            return Err(WcError::InvalidEntryname {
                name: new_name.to_string(),
                reason: "a new name cannot contain a path separator".to_string(),
            }
            .into());
        }

        let mut tx = self.begin()?;
        let alias = tx.controlled_at(path)?;
        let parent = tx
            .view()
            .get(alias)?
            .parent
            .ok_or_else(|| WcError::Unsupported("renaming the working-copy root".to_string()))?;
        if parent == tx.view().root()? {
            reject_reserved(Path::new(new_name))?;
        }
        relocate(&mut tx, alias, parent, new_name.to_string())?;

        let paths = finish(tx, vec![alias])?;
        self.records_at(&paths)
    }
}

/// Apply the queued moves and return the new paths of the moved items
///
/// Records are built afterwards: a moved file can only be hashed at its new location.
fn finish(tx: WcTx<'_>, moved: Vec<Alias>) -> anyhow::Result<Vec<PathBuf>> {
    let paths = moved
        .iter()
        .map(|alias| tx.path_of(*alias))
        .collect::<anyhow::Result<Vec<_>>>()?;
    tx.apply()?;

    debug!(moved = paths.len(), "moved items");
    Ok(paths)
}

/// Parent directory and final name of a destination path
fn split_destination(tx: &mut WcTx<'_>, destination: &Path) -> anyhow::Result<(Alias, String)> {
    let name = destination
        .file_name()
        .with_context(|| format!("{} has no final component", destination.display()))?
        .to_string_lossy()
        .into_owned();
    let parent_path = destination.parent().unwrap_or(Path::new(""));

    let (wc, view) = tx.parts();
    let parent = view
        .item_by_path(wc, parent_path)?
        .filter(|alias| {
            view.item(*alias)
                .is_some_and(|item| item.is_live() && item.is_directory())
        })
        .ok_or_else(|| {
            WcError::NotFound(format!(
                "{} is not a directory under version control",
                parent_path.display()
            ))
        })?;

    Ok((parent, name))
}

/// Move one item in the liveview and queue the matching steps
///
/// A lost item whose destination holds a found item of the same type adopts it: the user moved
/// the file with a plain filesystem command and is now telling us about it.
fn relocate(tx: &mut WcTx<'_>, alias: Alias, parent: Alias, name: String) -> anyhow::Result<()> {
    let (wc, view) = tx.parts();
    let item = view.get(alias)?;
    if !item.is_live() {
        return Err(WcError::NotFound(format!(
            "{} is deleted",
            view.path_of(alias)?.display()
        ))
        .into());
    }
    if item.parent.is_none() {
        return Err(WcError::Unsupported("moving the working-copy root".to_string()).into());
    }
    if item.parent == Some(parent) && item.entryname == name {
        return Ok(());
    }
    let (item_type, lost, sparse, on_disk) = (
        item.item_type,
        item.is_lost(),
        item.is_sparse(),
        item.on_disk().is_some(),
    );

    let mut ancestor = Some(parent);
    while let Some(current) = ancestor {
        if current == alias {
            return Err(WcError::Unsupported(format!(
                "moving {} into itself",
                view.path_of(alias)?.display()
            ))
            .into());
        }
        ancestor = view.get(current)?.parent;
    }

    let parent_item = view.get(parent)?;
    if parent_item.is_sparse() && !sparse {
        return Err(WcError::Sparse {
            path: view.path_of(parent)?,
            reason: "only sparse items can move into a sparse directory".to_string(),
        }
        .into());
    }

    let from = view.path_of(alias)?;
    let dir_path = view.path_of(parent)?;
    let to = dir_path.join(&name);
    view.sibling_collider(wc, parent, alias)?
        .add_checked(&dir_path, &name)?;

    let adopted = match lost {
        true => view.found_at(wc, &to)?.filter(|found| {
            view.item(*found)
                .is_some_and(|item| item.item_type == item_type)
        }),
        false => None,
    };
    if adopted.is_none()
        && let Some(blocker) = view.found_at(wc, &to)?
        && !wc.workspace().same_file(&from, &to)
    {
        return Err(WcError::AlreadyExists {
            path: to,
            blocker: format!("an uncontrolled {}", view.get(blocker)?.item_type),
        }
        .into());
    }

    view.relocate(wc, alias, parent, name)?;
    if let Some(found) = adopted {
        let entry = view.get(found)?.on_disk().cloned();
        view.forget(found)?;
        if let Some(entry) = entry {
            view.get_mut(alias)?.scan = ScanState::Matched(entry);
        }
    }

    let item = view.get_mut(alias)?;
    let pending = item.pending_row();
    item.pending = Some(pending.clone());
    let needs_row = item.needs_pending_row();
    if !needs_row {
        item.pending = None;
    }

    if adopted.is_none() && on_disk && !sparse {
        tx.queue(JournalStep::MoveRename {
            from,
            to: to.clone(),
        });
    }
    tx.queue(match needs_row {
        true => JournalStep::SetPending(pending),
        false => JournalStep::ClearPending(alias),
    });

    debug!(to = %to.display(), adopted = adopted.is_some(), "relocated item");
    Ok(())
}
