use crate::areas::metadata::{Alias, BaselineRow, PendingFlags, PendingRow};
use crate::areas::workspace::ScanEntry;
use crate::artifacts::merge::conflict::Conflict;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::ItemType;
use std::collections::BTreeSet;

/// What the directory scan said about an item
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanState {
    /// The parent was not scanned (sparse, lost or not yet visited)
    #[default]
    NotScanned,
    /// Controlled and present on disk with the expected type
    Matched(ScanEntry),
    /// Controlled but missing on disk
    Lost,
    /// On disk but not controlled
    Found(ScanEntry),
}

/// Reconciled view of one item for the lifetime of a transaction
#[derive(Debug, Clone)]
pub struct LiveViewItem {
    pub alias: Alias,
    /// `None` for found items that were never added
    pub gid: Option<Gid>,
    pub parent: Option<Alias>,
    pub entryname: String,
    pub item_type: ItemType,
    pub baseline: Option<BaselineRow>,
    pub pending: Option<PendingRow>,
    pub scan: ScanState,
    /// The metadata directory and anything else the working copy owns
    pub reserved: bool,
    pub issue: Option<Conflict>,
    /// Content hash observed during this transaction
    pub current_hid: Option<ObjectId>,
}

impl LiveViewItem {
    pub fn found(alias: Alias, parent: Alias, entry: ScanEntry, reserved: bool) -> Self {
        LiveViewItem {
            alias,
            gid: None,
            parent: Some(parent),
            entryname: entry.name.clone(),
            item_type: entry.item_type,
            baseline: None,
            pending: None,
            scan: ScanState::Found(entry),
            reserved,
            issue: None,
            current_hid: None,
        }
    }

    pub fn controlled(
        alias: Alias,
        gid: Gid,
        baseline: Option<BaselineRow>,
        pending: Option<PendingRow>,
        issue: Option<Conflict>,
    ) -> anyhow::Result<Self> {
        let (parent, entryname, item_type) = match (&pending, &baseline) {
            (Some(pending), _) => (pending.parent, pending.entryname.clone(), pending.item_type),
            (None, Some(baseline)) => (baseline.parent, baseline.entryname.clone(), baseline.item_type),
            (None, None) => anyhow::bail!("item {gid} (alias {alias}) has no metadata rows"),
        };

        Ok(LiveViewItem {
            alias,
            gid: Some(gid),
            parent,
            entryname,
            item_type,
            baseline,
            pending,
            scan: ScanState::NotScanned,
            reserved: false,
            issue,
            current_hid: None,
        })
    }

    pub fn is_controlled(&self) -> bool {
        self.gid.is_some()
    }

    pub fn flags(&self) -> PendingFlags {
        self.pending
            .as_ref()
            .map(|pending| pending.flags)
            .unwrap_or_default()
    }

    pub fn is_added(&self) -> bool {
        self.flags().contains(PendingFlags::ADDED)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags().contains(PendingFlags::DELETED)
    }

    pub fn is_sparse(&self) -> bool {
        self.flags().contains(PendingFlags::SPARSE)
    }

    pub fn is_lost(&self) -> bool {
        self.scan == ScanState::Lost && !self.is_deleted() && !self.is_sparse()
    }

    pub fn is_found(&self) -> bool {
        matches!(self.scan, ScanState::Found(_)) && !self.is_controlled()
    }

    /// Controlled and not pending deletion
    pub fn is_live(&self) -> bool {
        self.is_controlled() && !self.is_deleted()
    }

    pub fn is_directory(&self) -> bool {
        self.item_type.is_directory()
    }

    /// The scan entry when the item is materialized on disk
    pub fn on_disk(&self) -> Option<&ScanEntry> {
        match &self.scan {
            ScanState::Matched(entry) | ScanState::Found(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_renamed(&self) -> bool {
        self.baseline
            .as_ref()
            .is_some_and(|baseline| baseline.entryname != self.entryname)
    }

    pub fn is_moved(&self) -> bool {
        self.baseline
            .as_ref()
            .is_some_and(|baseline| baseline.parent != self.parent)
    }

    /// Whether the structure or flags differ enough from the baseline to need a pending row
    pub fn needs_pending_row(&self) -> bool {
        let pending = self.pending.as_ref();
        self.baseline.is_none()
            || self.is_renamed()
            || self.is_moved()
            || pending.is_some_and(|pending| {
                !pending.flags.is_empty() || pending.ref_hid_merge.is_some()
            })
    }

    /// Pending row describing the current structure with the given flags
    pub fn pending_row(&self) -> PendingRow {
        let mut row = self.pending.clone().unwrap_or_else(|| {
            PendingRow::new(
                self.alias,
                self.parent,
                self.entryname.clone(),
                self.item_type,
                PendingFlags::empty(),
            )
        });
        row.parent = self.parent;
        row.entryname = self.entryname.clone();
        row.item_type = self.item_type;
        row
    }
}

/// Reconciled children of one directory
#[derive(Debug, Clone, Default)]
pub struct LiveViewDir {
    pub alias: Alias,
    /// Items currently inside the directory, controlled or found
    pub children: BTreeSet<Alias>,
    /// Items whose baseline parent is this directory but which now live elsewhere
    pub moved_out: BTreeSet<Alias>,
    pub scanned: bool,
}

impl LiveViewDir {
    pub fn new(alias: Alias) -> Self {
        LiveViewDir {
            alias,
            ..Default::default()
        }
    }
}
