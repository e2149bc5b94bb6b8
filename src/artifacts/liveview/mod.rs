//! Liveview reconciliation
//!
//! A [`LiveView`] answers "what does this path look like right now" for the duration of one
//! transaction. It merges three sources per item:
//!
//! - the baseline row (state as of the last checkout, update or commit)
//! - the pending-change row (structural overrides, flags, sparse fields)
//! - a live scan of the parent directory on disk
//!
//! Items live in an arena (`Vec<LiveViewItem>`) addressed by alias; directories keep their
//! children as alias sets, so parent and children links are plain lookups. A directory's view
//! is built the first time it is touched and its scan runs at most once per transaction.
//! Queue operations mutate the view in place so later operations in the same transaction see
//! the post-state; nothing here is ever persisted directly.

pub mod item;
pub mod status_flags;

use crate::areas::metadata::{Alias, MetadataRead, PendingFlags, PendingRow, TimestampRow};
use crate::areas::working_copy::WorkingCopy;
use crate::areas::workspace::METADATA_DIR;
use crate::artifacts::liveview::item::{LiveViewDir, LiveViewItem, ScanState};
use crate::artifacts::liveview::status_flags::StatusFlags;
use crate::artifacts::objects::flat_tree::{FlatEntry, FlatTree};
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::portability::collider::PortabilityCollider;
use crate::error::WcError;
use anyhow::Context;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Snapshot of the whole working copy in gid space
///
/// `current` holds every controlled, non-deleted item at its current location with its current
/// content hash; `baseline` mirrors the baseline rows.
#[derive(Debug, Clone, Default)]
pub struct WcSnapshot {
    pub current: FlatTree,
    pub baseline: FlatTree,
    pub aliases: HashMap<Gid, Alias>,
    pub lost: BTreeSet<Gid>,
    pub sparse: BTreeSet<Gid>,
    pub flags: BTreeMap<Gid, StatusFlags>,
    /// Pending rows carrying merge or update provenance
    pub provenance: HashMap<Gid, PendingRow>,
}

impl WcSnapshot {
    /// Items with a structural or content change, in gid order
    pub fn changed(&self) -> impl Iterator<Item = (&Gid, &StatusFlags)> {
        self.flags.iter().filter(|(_, flags)| {
            flags.intersects(StatusFlags::STRUCTURE_MASK | StatusFlags::CONTENT_MASK)
        })
    }

    /// First pending change that keeps a merge or update from running: a structural or content
    /// change, or an item missing from disk
    pub fn first_dirty(&self) -> Option<&Gid> {
        self.changed()
            .map(|(gid, _)| gid)
            .next()
            .or_else(|| self.lost.iter().next())
    }

    /// Repo path of an item, preferring its current location
    pub fn path_of(&self, gid: &Gid) -> Option<PathBuf> {
        self.current
            .path_of(gid)
            .or_else(|| self.baseline.path_of(gid))
    }
}

#[derive(Debug, Default)]
pub struct LiveView {
    items: Vec<LiveViewItem>,
    index: HashMap<Alias, usize>,
    gids: HashMap<Gid, Alias>,
    dirs: HashMap<Alias, LiveViewDir>,
    root: Option<Alias>,
    next_alias: Alias,
    timestamps: Vec<TimestampRow>,
}

fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

const NANOS_PER_SECOND: i64 = 1_000_000_000;

impl LiveView {
    /// Start an empty view; the root is loaded eagerly, everything else on demand
    pub fn load(wc: &WorkingCopy) -> anyhow::Result<Self> {
        let metadata = wc.metadata();
        let mut view = LiveView {
            next_alias: metadata.next_alias()?,
            ..Default::default()
        };

        if let Some(root) = metadata.baseline_root()? {
            let alias = view.load_item(wc, root.alias)?;
            if let Some(entry) = wc.workspace().stat(Path::new(""))? {
                view.get_mut(alias)?.scan = ScanState::Matched(entry);
            }
            view.root = Some(alias);
        }

        Ok(view)
    }

    pub fn root(&self) -> anyhow::Result<Alias> {
        self.root
            .ok_or_else(|| WcError::NotFound("working copy has no baseline".to_string()).into())
    }

    pub fn allocate_alias(&mut self) -> Alias {
        let alias = self.next_alias;
        self.next_alias += 1;
        alias
    }

    pub fn item(&self, alias: Alias) -> Option<&LiveViewItem> {
        self.index.get(&alias).map(|idx| &self.items[*idx])
    }

    pub fn get(&self, alias: Alias) -> anyhow::Result<&LiveViewItem> {
        self.item(alias)
            .with_context(|| format!("alias {alias} is not loaded in the liveview"))
    }

    pub fn get_mut(&mut self, alias: Alias) -> anyhow::Result<&mut LiveViewItem> {
        let idx = *self
            .index
            .get(&alias)
            .with_context(|| format!("alias {alias} is not loaded in the liveview"))?;
        Ok(&mut self.items[idx])
    }

    pub fn alias_of(&self, gid: &Gid) -> Option<Alias> {
        self.gids.get(gid).copied()
    }

    /// Register a gid for an item that was found or created in this transaction
    pub fn assign_gid(&mut self, alias: Alias, gid: Gid) -> anyhow::Result<()> {
        self.gids.insert(gid.clone(), alias);
        self.get_mut(alias)?.gid = Some(gid);
        Ok(())
    }

    fn insert(&mut self, item: LiveViewItem) -> Alias {
        let alias = item.alias;
        if let Some(gid) = &item.gid {
            self.gids.insert(gid.clone(), alias);
        }
        self.index.insert(alias, self.items.len());
        self.items.push(item);
        alias
    }

    /// Load a controlled item and its whole parent chain
    pub fn load_item(&mut self, wc: &WorkingCopy, alias: Alias) -> anyhow::Result<Alias> {
        let mut chain = vec![alias];

        while let Some(&current) = chain.last() {
            if self.index.contains_key(&current) {
                chain.pop();
                continue;
            }
            let metadata = wc.metadata();
            let gid = metadata
                .gid_for_alias(current)?
                .with_context(|| format!("alias {current} has no gid"))?;
            let item = LiveViewItem::controlled(
                current,
                gid,
                metadata.baseline_row(current)?,
                metadata.pending_row(current)?,
                metadata.issue(current)?,
            )?;

            match item.parent {
                Some(parent) if !self.index.contains_key(&parent) && !chain.contains(&parent) => {
                    // park this item until its parent is in
                    chain.push(parent);
                    continue;
                }
                _ => {}
            }

            chain.pop();
            self.insert(item);
        }

        Ok(alias)
    }

    /// Build the directory view of `dir` and scan it, once
    pub fn ensure_dir(&mut self, wc: &WorkingCopy, dir: Alias) -> anyhow::Result<()> {
        if self.dirs.contains_key(&dir) {
            return Ok(());
        }

        let mut lvd = LiveViewDir::new(dir);
        if self.get(dir)?.is_controlled() {
            let metadata = wc.metadata();
            for row in metadata.baseline_children(dir)? {
                let alias = self.load_item(wc, row.alias)?;
                if self.get(alias)?.parent == Some(dir) {
                    lvd.children.insert(alias);
                } else {
                    lvd.moved_out.insert(alias);
                }
            }
            for row in metadata.pending_children(dir)? {
                let alias = self.load_item(wc, row.alias)?;
                if self.get(alias)?.parent == Some(dir) {
                    lvd.children.insert(alias);
                }
            }
        }

        self.dirs.insert(dir, lvd);
        self.scan_dir(wc, dir)
    }

    fn scan_dir(&mut self, wc: &WorkingCopy, dir: Alias) -> anyhow::Result<()> {
        let children = match self.dirs.get_mut(&dir) {
            Some(lvd) if !lvd.scanned => {
                lvd.scanned = true;
                lvd.children.iter().copied().collect::<Vec<_>>()
            }
            _ => return Ok(()),
        };

        let dir_item = self.get(dir)?;
        if dir_item.is_sparse() || dir_item.is_deleted() {
            return Ok(());
        }
        let on_disk = dir_item
            .on_disk()
            .is_some_and(|entry| entry.item_type.is_directory());
        if !on_disk {
            for child in children {
                let item = self.get_mut(child)?;
                if item.is_live() && !item.is_sparse() {
                    item.scan = ScanState::Lost;
                }
            }
            return Ok(());
        }

        let path = self.path_of(dir)?;
        let mut entries = wc
            .workspace()
            .scan_dir(&path)?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect::<BTreeMap<_, _>>();

        for child in children {
            let item = self.get_mut(child)?;
            if !item.is_live() || item.is_sparse() {
                continue;
            }

            item.scan = match entries.remove(&item.entryname) {
                Some(entry) if entry.item_type == item.item_type => ScanState::Matched(entry),
                Some(entry) => {
                    entries.insert(entry.name.clone(), entry);
                    ScanState::Lost
                }
                None => ScanState::Lost,
            };
        }

        let is_root = self.root == Some(dir);
        for (name, entry) in entries {
            let reserved = is_root && name == METADATA_DIR;
            let alias = self.allocate_alias();
            self.insert(LiveViewItem::found(alias, dir, entry, reserved));
            if let Some(lvd) = self.dirs.get_mut(&dir) {
                lvd.children.insert(alias);
            }
        }

        trace!(dir = %path.display(), "reconciled directory");
        Ok(())
    }

    pub fn dir(&self, dir: Alias) -> Option<&LiveViewDir> {
        self.dirs.get(&dir)
    }

    /// Children of a directory ordered by entryname, deleted items included
    pub fn children(&mut self, wc: &WorkingCopy, dir: Alias) -> anyhow::Result<Vec<Alias>> {
        self.ensure_dir(wc, dir)?;
        let mut children = self
            .dirs
            .get(&dir)
            .map(|lvd| lvd.children.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        children.sort_by(|a, b| {
            let name = |alias: &Alias| self.item(*alias).map(|item| item.entryname.clone());
            name(a).cmp(&name(b))
        });

        Ok(children)
    }

    pub fn moved_out(&mut self, wc: &WorkingCopy, dir: Alias) -> anyhow::Result<Vec<Alias>> {
        self.ensure_dir(wc, dir)?;
        Ok(self
            .dirs
            .get(&dir)
            .map(|lvd| lvd.moved_out.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Collider primed with the names of the live items in `dir`, `except` left out
    pub fn sibling_collider(
        &mut self,
        wc: &WorkingCopy,
        dir: Alias,
        except: Alias,
    ) -> anyhow::Result<PortabilityCollider> {
        let mut collider = PortabilityCollider::new(wc.portability());
        for child in self.children(wc, dir)? {
            let item = self.get(child)?;
            if child != except && item.is_live() {
                collider.add(&item.entryname);
            }
        }
        Ok(collider)
    }

    /// Move an item between directory views, keeping both sides consistent
    pub fn relocate(
        &mut self,
        wc: &WorkingCopy,
        alias: Alias,
        parent: Alias,
        entryname: String,
    ) -> anyhow::Result<()> {
        let item = self.get(alias)?;
        let old_parent = item.parent;
        let baseline_parent = item.baseline.as_ref().and_then(|row| row.parent);

        if let Some(old_parent) = old_parent {
            self.ensure_dir(wc, old_parent)?;
        }
        self.ensure_dir(wc, parent)?;
        if let Some(baseline_parent) = baseline_parent {
            self.ensure_dir(wc, baseline_parent)?;
        }

        if let Some(old_parent) = old_parent
            && let Some(lvd) = self.dirs.get_mut(&old_parent)
        {
            lvd.children.remove(&alias);
        }
        if let Some(lvd) = self.dirs.get_mut(&parent) {
            lvd.children.insert(alias);
            lvd.moved_out.remove(&alias);
        }
        if let Some(baseline_parent) = baseline_parent
            && baseline_parent != parent
            && let Some(lvd) = self.dirs.get_mut(&baseline_parent)
        {
            lvd.moved_out.insert(alias);
        }

        let item = self.get_mut(alias)?;
        item.parent = Some(parent);
        item.entryname = entryname;
        Ok(())
    }

    /// Drop a found item from the view, e.g. when a lost item adopts it
    pub fn forget(&mut self, alias: Alias) -> anyhow::Result<()> {
        if let Some(parent) = self.get(alias)?.parent
            && let Some(lvd) = self.dirs.get_mut(&parent)
        {
            lvd.children.remove(&alias);
        }
        Ok(())
    }

    /// Repo path of a loaded item from its current parent chain
    pub fn path_of(&self, alias: Alias) -> anyhow::Result<PathBuf> {
        let mut names = Vec::new();
        let mut current = self.get(alias)?;

        while let Some(parent) = current.parent {
            if names.len() > self.items.len() {
                anyhow::bail!("parent chain of alias {alias} loops");
            }
            names.push(current.entryname.as_str());
            current = self.get(parent)?;
        }

        Ok(names.iter().rev().collect())
    }

    /// Baseline path of an item, when it has one
    pub fn baseline_path_of(&self, alias: Alias) -> anyhow::Result<Option<PathBuf>> {
        let mut names = Vec::new();
        let mut current = self.get(alias)?;

        loop {
            let Some(baseline) = &current.baseline else {
                return Ok(None);
            };
            let Some(parent) = baseline.parent else {
                break;
            };
            if names.len() > self.items.len() {
                anyhow::bail!("baseline chain of alias {alias} loops");
            }
            names.push(baseline.entryname.as_str());
            current = self.get(parent)?;
        }

        Ok(Some(names.iter().rev().collect()))
    }

    /// Resolve a repo-relative path top-down, building directory views on the way
    ///
    /// When several items share the name (a deleted item and a found one, say) a live controlled
    /// item wins over a found item, which wins over a deleted one.
    pub fn item_by_path(&mut self, wc: &WorkingCopy, path: &Path) -> anyhow::Result<Option<Alias>> {
        let mut current = self.root()?;

        for component in path.components() {
            let name = match component {
                Component::Normal(name) => name.to_string_lossy(),
                Component::CurDir => continue,
                _ => anyhow::bail!("{} is not a repo-relative path", path.display()),
            };

            if !self.get(current)?.is_directory() {
                return Ok(None);
            }
            self.ensure_dir(wc, current)?;

            let candidates = self
                .dirs
                .get(&current)
                .map(|lvd| lvd.children.iter().copied().collect::<Vec<_>>())
                .unwrap_or_default();
            let best = candidates
                .into_iter()
                .filter_map(|alias| self.item(alias))
                .filter(|item| item.entryname == name)
                .min_by_key(|item| {
                    if item.is_live() {
                        0
                    } else if !item.is_controlled() {
                        1
                    } else {
                        2
                    }
                })
                .map(|item| item.alias);

            match best {
                Some(alias) => current = alias,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// A found item sitting at `path`, if any
    pub fn found_at(&mut self, wc: &WorkingCopy, path: &Path) -> anyhow::Result<Option<Alias>> {
        let (Some(parent_path), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(None);
        };
        let Some(parent) = self.item_by_path(wc, parent_path)? else {
            return Ok(None);
        };
        if !self.get(parent)?.is_directory() {
            return Ok(None);
        }

        let name = name.to_string_lossy();
        Ok(self
            .children(wc, parent)?
            .into_iter()
            .filter_map(|alias| self.item(alias))
            .find(|item| item.is_found() && item.entryname == name)
            .map(|item| item.alias))
    }

    /// Content hash of a file or symlink as it is now
    ///
    /// Uses the timestamp cache when size and mtime match; freshly computed hashes of files not
    /// modified within the current second are queued for caching.
    pub fn current_hid(
        &mut self,
        wc: &WorkingCopy,
        alias: Alias,
    ) -> anyhow::Result<Option<ObjectId>> {
        let item = self.get(alias)?;
        if item.is_directory() {
            return Ok(None);
        }
        if let Some(hid) = &item.current_hid {
            return Ok(Some(hid.clone()));
        }
        if item.is_sparse() {
            return Ok(item
                .pending
                .as_ref()
                .and_then(|pending| pending.sparse_hid.clone())
                .or_else(|| item.baseline.as_ref().map(|row| row.hid.clone())));
        }
        if item.scan == ScanState::NotScanned
            && let Some(parent) = item.parent
        {
            self.ensure_dir(wc, parent)?;
        }

        let item = self.get(alias)?;
        let Some(entry) = item.on_disk().cloned() else {
            return Ok(None);
        };
        let (controlled, item_type) = (item.is_controlled(), item.item_type);

        let cached = if controlled {
            wc.metadata()
                .timestamp(alias)?
                .filter(|row| row.mtime_ns == entry.mtime_ns && row.size == entry.size)
                .map(|row| row.hid)
        } else {
            None
        };

        let hid = match cached {
            Some(hid) => hid,
            None => {
                let path = self.path_of(alias)?;
                let hid = wc.workspace().hash(&path, item_type)?;
                if controlled && entry.mtime_ns / NANOS_PER_SECOND < now_ns() / NANOS_PER_SECOND {
                    self.timestamps.push(TimestampRow::new(
                        alias,
                        entry.mtime_ns,
                        entry.size,
                        hid.clone(),
                    ));
                }
                hid
            }
        };

        self.get_mut(alias)?.current_hid = Some(hid.clone());
        Ok(Some(hid))
    }

    pub fn current_attrbits(&self, wc: &WorkingCopy, alias: Alias) -> anyhow::Result<Option<u64>> {
        let item = self.get(alias)?;
        let baseline = item.baseline.as_ref().map(|row| row.attrbits);

        if item.is_sparse() {
            return Ok(item
                .pending
                .as_ref()
                .and_then(|pending| pending.sparse_attrbits)
                .or(baseline));
        }
        if item.is_directory() {
            return Ok(Some(baseline.unwrap_or_default()));
        }

        Ok(item
            .on_disk()
            .map(|entry| entry.attrbits & wc.config().attributes.mask()))
    }

    /// Timestamp rows gathered while hashing, for the caller to persist
    pub fn take_timestamps(&mut self) -> Vec<TimestampRow> {
        std::mem::take(&mut self.timestamps)
    }

    pub fn status_flags(&mut self, wc: &WorkingCopy, alias: Alias) -> anyhow::Result<StatusFlags> {
        let item = self.get(alias)?;
        let mut flags = StatusFlags::for_type(item.item_type);

        if item.reserved {
            return Ok(flags | StatusFlags::A_RESERVED);
        }
        if !item.is_controlled() {
            return Ok(flags | StatusFlags::A_FOUND);
        }

        let pending = item.flags();
        flags.set(StatusFlags::A_SPARSE, item.is_sparse());
        flags.set(StatusFlags::A_LOST, item.is_lost());
        flags.set(StatusFlags::S_ADDED, pending.contains(PendingFlags::ADDED));
        flags.set(StatusFlags::S_DELETED, pending.contains(PendingFlags::DELETED));
        flags.set(StatusFlags::S_MERGE_CREATED, pending.contains(PendingFlags::ADD_SPECIAL_M));
        flags.set(StatusFlags::S_UPDATE_CREATED, pending.contains(PendingFlags::ADD_SPECIAL_U));
        if !item.is_added() && !item.is_deleted() {
            flags.set(StatusFlags::S_RENAMED, item.is_renamed());
            flags.set(StatusFlags::S_MOVED, item.is_moved());
        }
        if let Some(issue) = &item.issue {
            flags |= StatusFlags::for_conflict(issue);
        }
        if let Some(gid) = &item.gid {
            flags |= wc.lock_inspector().lock_flags(gid, &self.path_of(alias)?);
        }

        let comparable = !item.is_added() && !item.is_deleted() && !item.is_lost();
        if let (true, Some(baseline)) = (comparable, item.baseline.clone()) {
            if !item.is_directory() {
                let current = self.current_hid(wc, alias)?;
                flags.set(StatusFlags::C_MODIFIED, current.as_ref() != Some(&baseline.hid));
                let attrbits = self.current_attrbits(wc, alias)?;
                flags.set(StatusFlags::C_ATTRBITS, attrbits != Some(baseline.attrbits));
            }
        }

        Ok(flags)
    }

    /// Load every controlled directory reachable from the root
    ///
    /// Directories already built by earlier lookups are still descended into: their
    /// subdirectories may not be.
    pub fn load_all(&mut self, wc: &WorkingCopy) -> anyhow::Result<()> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![self.root()?];

        while let Some(dir) = stack.pop() {
            if !visited.insert(dir) {
                continue;
            }
            wc.check_cancelled()?;
            self.ensure_dir(wc, dir)?;
            let lvd = &self.dirs[&dir];
            let next = lvd
                .children
                .iter()
                .chain(lvd.moved_out.iter())
                .filter_map(|alias| self.item(*alias))
                .filter(|item| item.is_controlled() && item.is_directory())
                .filter(|item| !visited.contains(&item.alias))
                .map(|item| item.alias)
                .collect::<Vec<_>>();
            stack.extend(next);
        }

        Ok(())
    }

    /// Aliases of every loaded controlled item
    pub fn controlled(&self) -> Vec<Alias> {
        self.items
            .iter()
            .filter(|item| item.is_controlled())
            .map(|item| item.alias)
            .collect()
    }

    /// Reconcile everything and express the working copy in gid space
    pub fn snapshot(&mut self, wc: &WorkingCopy) -> anyhow::Result<WcSnapshot> {
        self.load_all(wc)?;
        let mut snapshot = WcSnapshot {
            baseline: baseline_tree(wc)?,
            ..Default::default()
        };
        let root = self.root()?;

        for alias in self.controlled() {
            let flags = self.status_flags(wc, alias)?;
            let item = self.get(alias)?;
            let Some(gid) = item.gid.clone() else {
                continue;
            };
            snapshot.aliases.insert(gid.clone(), alias);
            snapshot.flags.insert(gid.clone(), flags);
            if item.is_sparse() {
                snapshot.sparse.insert(gid.clone());
            }
            if item.is_lost() {
                snapshot.lost.insert(gid.clone());
            }
            if let Some(pending) = &item.pending
                && (pending
                    .flags
                    .intersects(PendingFlags::ADD_SPECIAL_M | PendingFlags::ADD_SPECIAL_U)
                    || pending.ref_hid_merge.is_some())
            {
                snapshot.provenance.insert(gid.clone(), pending.clone());
            }
        }

        let mut entries = Vec::new();
        for alias in self.controlled() {
            let item = self.get(alias)?;
            if item.is_deleted() {
                continue;
            }
            let (Some(gid), baseline) = (item.gid.clone(), item.baseline.clone()) else {
                continue;
            };
            let (is_directory, entryname, item_type, parent) = (
                item.is_directory(),
                item.entryname.clone(),
                item.item_type,
                item.parent,
            );
            let parent = match parent {
                Some(parent) => Some(
                    self.get(parent)?
                        .gid
                        .clone()
                        .with_context(|| format!("parent of {gid} is not controlled"))?,
                ),
                None => None,
            };
            let oid = match self.current_hid(wc, alias)? {
                Some(hid) => Some(hid),
                None => baseline.as_ref().map(|row| row.hid.clone()),
            };
            let attrbits = self
                .current_attrbits(wc, alias)?
                .or(baseline.as_ref().map(|row| row.attrbits))
                .unwrap_or_default();
            let oid = if is_directory { None } else { oid };

            entries.push(FlatEntry::new(
                gid, parent, entryname, item_type, attrbits, oid,
            ));
        }

        let root_gid = self
            .get(root)?
            .gid
            .clone()
            .context("root item has no gid")?;
        let root_entry = entries
            .iter()
            .find(|entry| entry.gid == root_gid)
            .cloned()
            .context("root item missing from the snapshot")?;
        snapshot.current = FlatTree::with_root(root_entry);
        for entry in entries.into_iter().filter(|entry| entry.gid != root_gid) {
            snapshot.current.insert(entry);
        }

        Ok(snapshot)
    }
}

/// The baseline rows as a flat tree
pub fn baseline_tree(wc: &WorkingCopy) -> anyhow::Result<FlatTree> {
    let metadata = wc.metadata();
    let gids = metadata.gid_map()?.into_iter().collect::<HashMap<_, _>>();
    let gid_of = |alias: Alias| -> anyhow::Result<Gid> {
        gids.get(&alias)
            .cloned()
            .with_context(|| format!("baseline alias {alias} has no gid"))
    };

    let rows = metadata.baseline_rows()?;
    let Some(root) = rows.iter().find(|row| row.parent.is_none()) else {
        return Ok(FlatTree::default());
    };

    let mut tree = FlatTree::with_root(FlatEntry::new(
        gid_of(root.alias)?,
        None,
        root.entryname.clone(),
        root.item_type,
        root.attrbits,
        Some(root.hid.clone()),
    ));
    for row in rows.iter().filter(|row| row.parent.is_some()) {
        tree.insert(FlatEntry::new(
            gid_of(row.alias)?,
            row.parent.map(gid_of).transpose()?,
            row.entryname.clone(),
            row.item_type,
            row.attrbits,
            Some(row.hid.clone()),
        ));
    }

    Ok(tree)
}
