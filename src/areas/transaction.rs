//! Working-copy transactions
//!
//! A [`WcTx`] is the queue half of the queue/apply protocol. Verbs reconcile through its
//! liveview and push [`JournalStep`]s; nothing reaches the filesystem or the metadata store
//! until [`WcTx::apply`] runs the journal in order inside one SQLite transaction while holding
//! the exclusive working-copy lock.
//!
//! ## Failure
//!
//! The first failing step aborts the apply. The metadata transaction is rolled back by drop and
//! the error carries the step and the path it touched. Dropping a transaction without applying
//! it (or calling [`WcTx::cancel`]) leaves the working tree and the metadata untouched; scratch
//! files created while queueing are removed.

use crate::areas::metadata::{Alias, MetadataRead};
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::journal::apply::Applier;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::liveview::LiveView;
use crate::artifacts::objects::flat_tree::FlatTree;
use crate::artifacts::objects::gid::Gid;
use crate::error::WcError;
use anyhow::Context;
use file_guard::Lock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct WcTx<'wc> {
    wc: &'wc mut WorkingCopy,
    view: LiveView,
    journal: Vec<JournalStep>,
    /// Scratch directories (relative to the root) to discard unless the journal is applied
    scratch: Vec<PathBuf>,
    /// Aliases handed out to gids the liveview has not loaded
    fresh: HashMap<Gid, Alias>,
    applied: bool,
}

impl<'wc> WcTx<'wc> {
    pub(crate) fn new(wc: &'wc mut WorkingCopy) -> anyhow::Result<Self> {
        let view = LiveView::load(wc)?;

        Ok(WcTx {
            wc,
            view,
            journal: Vec::new(),
            scratch: Vec::new(),
            fresh: HashMap::new(),
            applied: false,
        })
    }

    pub fn wc(&self) -> &WorkingCopy {
        &*self.wc
    }

    pub fn view(&self) -> &LiveView {
        &self.view
    }

    /// The session and the liveview, borrowed together
    pub fn parts(&mut self) -> (&WorkingCopy, &mut LiveView) {
        (&*self.wc, &mut self.view)
    }

    pub fn journal(&self) -> &[JournalStep] {
        &self.journal
    }

    pub fn queue(&mut self, step: JournalStep) {
        self.journal.push(step);
    }

    pub fn queue_all(&mut self, steps: impl IntoIterator<Item = JournalStep>) {
        self.journal.extend(steps);
    }

    pub fn add_scratch(&mut self, dir: PathBuf) {
        self.scratch.push(dir);
    }

    /// Resolve a repo path to a live or deleted controlled item
    pub fn controlled_at(&mut self, path: &Path) -> anyhow::Result<Alias> {
        let (wc, view) = self.parts();
        match view.item_by_path(wc, path)? {
            Some(alias) if view.get(alias)?.is_controlled() => Ok(alias),
            _ => Err(WcError::NotFound(format!("{} is not under version control", path.display()))
                .into()),
        }
    }

    /// Alias of an item by gid, allocating one for items new to this working copy
    ///
    /// A fresh alias has its `InsertGid` step queued right away so later steps can use it.
    pub fn ensure_alias(&mut self, gid: &Gid) -> anyhow::Result<Alias> {
        if let Some(alias) = self.view.alias_of(gid).or_else(|| self.fresh.get(gid).copied()) {
            return Ok(alias);
        }
        if let Some(alias) = self.wc.metadata().alias_for_gid(gid)? {
            self.fresh.insert(gid.clone(), alias);
            return Ok(alias);
        }

        let alias = self.view.allocate_alias();
        self.fresh.insert(gid.clone(), alias);
        self.queue(JournalStep::InsertGid {
            alias,
            gid: gid.clone(),
        });
        Ok(alias)
    }

    /// Aliases for every gid of the given trees
    pub fn alias_map<'t>(
        &mut self,
        trees: impl IntoIterator<Item = &'t FlatTree>,
    ) -> anyhow::Result<HashMap<Gid, Alias>> {
        let mut aliases = HashMap::new();
        for tree in trees {
            for gid in tree.gids() {
                if !aliases.contains_key(gid) {
                    aliases.insert(gid.clone(), self.ensure_alias(gid)?);
                }
            }
        }
        Ok(aliases)
    }

    pub fn path_of(&self, alias: Alias) -> anyhow::Result<PathBuf> {
        self.view.path_of(alias)
    }

    /// Execute the journal
    ///
    /// Hashes gathered while reconciling are cached first so that later steps removing or
    /// rewriting a file win over a stale cache entry.
    pub fn apply(mut self) -> anyhow::Result<()> {
        self.wc.check_cancelled()?;

        let mut journal = self
            .view
            .take_timestamps()
            .into_iter()
            .map(JournalStep::SetTimestamp)
            .collect::<Vec<_>>();
        journal.append(&mut self.journal);

        let lock_path = self.wc.lock_path();
        let mut lock_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;
        let _lock = file_guard::lock(&mut lock_file, Lock::Exclusive, 0, 1)
            .context("failed to lock the working copy")?;

        let park_dir = self.wc.park_dir();
        let (workspace, repository, metadata) = self.wc.apply_parts();
        let writer = metadata.begin_write()?;
        {
            let applier = Applier::new(
                workspace,
                repository.database(),
                repository.refs(),
                &writer,
                park_dir,
            );
            for (index, step) in journal.iter().enumerate() {
                applier.apply(step).with_context(|| match step.path() {
                    Some(path) => format!(
                        "journal step {index} ({}) failed on {}",
                        step.name(),
                        path.display()
                    ),
                    None => format!("journal step {index} ({}) failed", step.name()),
                })?;
            }
        }
        writer.commit()?;

        self.applied = true;
        debug!(steps = journal.len(), "applied journal");
        Ok(())
    }

    /// Discard the queued journal
    pub fn cancel(self) {}
}

impl Drop for WcTx<'_> {
    fn drop(&mut self) {
        if self.applied {
            return;
        }

        for dir in &self.scratch {
            let absolute = self.wc.workspace().absolute(dir);
            if let Err(error) = std::fs::remove_dir_all(&absolute)
                && error.kind() != std::io::ErrorKind::NotFound
            {
                warn!(dir = %absolute.display(), %error, "failed to remove scratch directory");
            }
        }

        // parents go too once nothing else lives in them
        let parents = self
            .scratch
            .iter()
            .filter_map(|dir| dir.parent())
            .filter(|parent| !parent.as_os_str().is_empty())
            .collect::<BTreeSet<_>>();
        for parent in parents {
            std::fs::remove_dir(self.wc.workspace().absolute(parent)).ok();
        }
    }
}
