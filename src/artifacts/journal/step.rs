use crate::areas::metadata::{Alias, BaselineRow, CsetLabel, PendingRow, TimestampRow};
use crate::artifacts::branch::branch_name::{BranchName, BranchPolicy};
use crate::artifacts::merge::conflict::Conflict;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::ItemType;
use std::path::{Path, PathBuf};

/// One queued mutation
///
/// Paths are repo paths relative to the working-copy root. Content steps carry a `sparse`
/// marker: a sparse item only has its dynamic metadata updated, the filesystem is not touched.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalStep {
    InsertGid {
        alias: Alias,
        gid: Gid,
    },
    SetPending(PendingRow),
    ClearPending(Alias),
    ClearAllPending,
    UpsertBaseline(BaselineRow),
    DeleteBaseline(Alias),
    ReplaceBaseline(Vec<BaselineRow>),
    SetCset {
        label: CsetLabel,
        hid: ObjectId,
    },
    ClearCset(CsetLabel),
    AttachBranch {
        name: String,
        policy: BranchPolicy,
    },
    DetachBranch,
    /// Point a repository branch at a changeset
    MoveBranchHead {
        branch: BranchName,
        hid: ObjectId,
    },
    SetTimestamp(TimestampRow),
    ClearTimestamp(Alias),
    SetIssue {
        alias: Alias,
        conflict: Box<Conflict>,
    },
    ClearIssue(Alias),
    ClearAllIssues,
    MakeDirectory {
        path: PathBuf,
    },
    RemoveFile {
        alias: Alias,
        path: PathBuf,
        sparse: bool,
    },
    RemoveDirectory {
        path: PathBuf,
        sparse: bool,
    },
    MoveRename {
        from: PathBuf,
        to: PathBuf,
    },
    /// Move an item out of the way into `.grove/tmp/park/<alias>`
    Park {
        alias: Alias,
        from: PathBuf,
    },
    /// Move a parked item to its final location
    Unpark {
        alias: Alias,
        to: PathBuf,
    },
    /// Create a file or symlink that must not exist yet
    MaterializeFile {
        alias: Alias,
        path: PathBuf,
        item_type: ItemType,
        hid: ObjectId,
        attrbits: u64,
        sparse: bool,
    },
    OverwriteFromStore {
        alias: Alias,
        path: PathBuf,
        item_type: ItemType,
        hid: ObjectId,
        attrbits: u64,
        sparse: bool,
    },
    /// Replace content with a scratch file, typically a merge result
    OverwriteFromFile {
        alias: Alias,
        path: PathBuf,
        item_type: ItemType,
        source: PathBuf,
        hid: ObjectId,
        attrbits: u64,
        sparse: bool,
    },
    SetAttrbits {
        alias: Alias,
        path: PathBuf,
        attrbits: u64,
        sparse: bool,
    },
    /// Copy a file to a `~groveNN~` sibling
    Backup {
        path: PathBuf,
    },
}

impl JournalStep {
    /// The working-tree path a step touches, for error context
    pub fn path(&self) -> Option<&Path> {
        match self {
            JournalStep::MakeDirectory { path }
            | JournalStep::RemoveFile { path, .. }
            | JournalStep::RemoveDirectory { path, .. }
            | JournalStep::MaterializeFile { path, .. }
            | JournalStep::OverwriteFromStore { path, .. }
            | JournalStep::OverwriteFromFile { path, .. }
            | JournalStep::SetAttrbits { path, .. }
            | JournalStep::Backup { path } => Some(path),
            JournalStep::MoveRename { to, .. } | JournalStep::Unpark { to, .. } => Some(to),
            JournalStep::Park { from, .. } => Some(from),
            JournalStep::SetPending(row) => Some(Path::new(row.entryname.as_str())),
            JournalStep::UpsertBaseline(row) => Some(Path::new(row.entryname.as_str())),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JournalStep::InsertGid { .. } => "insert-gid",
            JournalStep::SetPending(_) => "set-pending",
            JournalStep::ClearPending(_) => "clear-pending",
            JournalStep::ClearAllPending => "clear-all-pending",
            JournalStep::UpsertBaseline(_) => "upsert-baseline",
            JournalStep::DeleteBaseline(_) => "delete-baseline",
            JournalStep::ReplaceBaseline(_) => "replace-baseline",
            JournalStep::SetCset { .. } => "set-cset",
            JournalStep::ClearCset(_) => "clear-cset",
            JournalStep::AttachBranch { .. } => "attach-branch",
            JournalStep::DetachBranch => "detach-branch",
            JournalStep::MoveBranchHead { .. } => "move-branch-head",
            JournalStep::SetTimestamp(_) => "set-timestamp",
            JournalStep::ClearTimestamp(_) => "clear-timestamp",
            JournalStep::SetIssue { .. } => "set-issue",
            JournalStep::ClearIssue(_) => "clear-issue",
            JournalStep::ClearAllIssues => "clear-all-issues",
            JournalStep::MakeDirectory { .. } => "make-directory",
            JournalStep::RemoveFile { .. } => "remove-file",
            JournalStep::RemoveDirectory { .. } => "remove-directory",
            JournalStep::MoveRename { .. } => "move-rename",
            JournalStep::Park { .. } => "park",
            JournalStep::Unpark { .. } => "unpark",
            JournalStep::MaterializeFile { .. } => "materialize-file",
            JournalStep::OverwriteFromStore { .. } => "overwrite-from-store",
            JournalStep::OverwriteFromFile { .. } => "overwrite-from-file",
            JournalStep::SetAttrbits { .. } => "set-attrbits",
            JournalStep::Backup { .. } => "backup",
        }
    }

    /// Whether the step touches the working tree (as opposed to metadata only)
    pub fn touches_disk(&self) -> bool {
        match self {
            JournalStep::RemoveFile { sparse, .. }
            | JournalStep::RemoveDirectory { sparse, .. }
            | JournalStep::MaterializeFile { sparse, .. }
            | JournalStep::OverwriteFromStore { sparse, .. }
            | JournalStep::OverwriteFromFile { sparse, .. }
            | JournalStep::SetAttrbits { sparse, .. } => !sparse,
            JournalStep::MakeDirectory { .. }
            | JournalStep::MoveRename { .. }
            | JournalStep::Park { .. }
            | JournalStep::Unpark { .. }
            | JournalStep::Backup { .. } => true,
            _ => false,
        }
    }
}
