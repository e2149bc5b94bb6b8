use crate::areas::metadata::Alias;
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::status::status_record::StatusRecord;
use crate::error::WcError;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info_span};

impl WorkingCopy {
    /// Report every interesting item below `paths` (the whole working copy when empty)
    ///
    /// `depth` limits how far below each path the walk goes: `Some(0)` reports the named items
    /// only, `None` is unlimited. Uncontrolled directories are reported as a whole, not entered.
    /// Records come back ordered by path.
    pub fn status(
        &mut self,
        paths: &[PathBuf],
        depth: Option<usize>,
    ) -> anyhow::Result<Vec<StatusRecord>> {
        let span = info_span!("status", root = %self.root().display());
        let _guard = span.enter();

        let mut tx = self.begin()?;
        let mut starts = Vec::new();
        {
            let (wc, view) = tx.parts();
            if paths.is_empty() {
                starts.push(view.root()?);
            }
            for path in paths {
                let alias = view.item_by_path(wc, path)?.ok_or_else(|| {
                    WcError::NotFound(format!("{} is neither on disk nor controlled", path.display()))
                })?;
                starts.push(alias);
            }
        }

        let mut seen = BTreeSet::new();
        let mut records = Vec::new();
        let mut stack = starts
            .into_iter()
            .rev()
            .map(|alias| (alias, 0))
            .collect::<Vec<(Alias, usize)>>();

        while let Some((alias, level)) = stack.pop() {
            if !seen.insert(alias) {
                continue;
            }
            let (wc, view) = tx.parts();
            wc.check_cancelled()?;

            let record = StatusRecord::build(wc, view, alias)?;
            let item = view.get(alias)?;
            let descend = item.is_directory()
                && item.is_controlled()
                && depth.is_none_or(|limit| level < limit);
            // the metadata directory only shows up when asked for by name
            if record.flags.is_interesting() && !(item.reserved && level > 0) {
                records.push(record);
            }

            if descend {
                let children = view.children(wc, alias)?;
                stack.extend(children.into_iter().rev().map(|child| (child, level + 1)));
            }
        }

        tx.apply()?;
        records.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(records = records.len(), "collected status");
        Ok(records)
    }

    /// Fresh records for items a verb just touched, looked up by their repo path
    pub(crate) fn records_at(&mut self, paths: &[PathBuf]) -> anyhow::Result<Vec<StatusRecord>> {
        let mut tx = self.begin()?;
        let mut records = Vec::new();
        for path in paths {
            let (wc, view) = tx.parts();
            if let Some(alias) = view.item_by_path(wc, path)? {
                records.push(StatusRecord::build(wc, view, alias)?);
            }
        }
        tx.cancel();

        Ok(records)
    }
}
