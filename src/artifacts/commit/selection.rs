use crate::artifacts::liveview::WcSnapshot;
use crate::artifacts::liveview::status_flags::StatusFlags;
use crate::artifacts::objects::flat_tree::FlatTree;
use crate::artifacts::objects::gid::Gid;
use crate::error::WcError;
use std::collections::BTreeSet;

/// Which part of the working copy a commit looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// `None` means the root
    roots: Option<Vec<Gid>>,
    /// Levels below each root; `None` is unlimited, `Some(0)` the root item alone
    depth: Option<usize>,
}

impl Scope {
    pub fn everything() -> Self {
        Scope::default()
    }

    pub fn new(roots: Option<Vec<Gid>>, depth: Option<usize>) -> Self {
        Scope { roots, depth }
    }

    pub fn is_partial(&self) -> bool {
        self.roots.is_some() || self.depth.is_some()
    }

    fn covers_in(&self, tree: &FlatTree, gid: &Gid) -> bool {
        let Some(depth) = tree.depth_of(gid) else {
            return false;
        };
        let tree_root = tree.root().cloned().into_iter().collect::<Vec<_>>();
        let roots = self.roots.as_ref().unwrap_or(&tree_root);

        roots.iter().any(|root| {
            let within = root == gid || tree.is_ancestor(root, gid);
            let shallow = self.depth.is_none_or(|limit| {
                tree.depth_of(root)
                    .and_then(|root_depth| depth.checked_sub(root_depth))
                    .is_some_and(|below| below <= limit)
            });
            within && shallow
        })
    }

    /// In scope at its current location or, for deleted and moved-out items, its baseline one
    pub fn covers(&self, snapshot: &WcSnapshot, gid: &Gid) -> bool {
        self.covers_in(&snapshot.current, gid) || self.covers_in(&snapshot.baseline, gid)
    }
}

fn conflict(snapshot: &WcSnapshot, gid: &Gid, reason: String) -> anyhow::Error {
    WcError::PartialCommitConflict {
        path: snapshot.path_of(gid).unwrap_or_default(),
        reason,
    }
    .into()
}

fn display_path(snapshot: &WcSnapshot, gid: &Gid) -> String {
    snapshot
        .path_of(gid)
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| gid.to_string())
}

/// Changed items in `scope`, checked for a selection the store can represent
pub fn select(snapshot: &WcSnapshot, scope: &Scope) -> anyhow::Result<BTreeSet<Gid>> {
    if let Some((gid, _)) = snapshot
        .flags
        .iter()
        .find(|(_, flags)| flags.contains(StatusFlags::X_UNRESOLVED))
    {
        return Err(WcError::Unresolved(snapshot.path_of(gid).unwrap_or_default()).into());
    }
    if let Some(gid) = snapshot.lost.iter().find(|gid| scope.covers(snapshot, gid)) {
        return Err(WcError::NotFound(format!(
            "{} is missing from disk; restore or remove it before committing",
            display_path(snapshot, gid)
        ))
        .into());
    }

    let selected = snapshot
        .changed()
        .map(|(gid, _)| gid)
        .filter(|gid| scope.covers(snapshot, gid))
        .cloned()
        .collect::<BTreeSet<_>>();

    validate(snapshot, &selected)?;
    Ok(selected)
}

fn validate(snapshot: &WcSnapshot, selected: &BTreeSet<Gid>) -> anyhow::Result<()> {
    let flags_of = |gid: &Gid| snapshot.flags.get(gid).copied().unwrap_or_default();

    for gid in selected {
        let flags = flags_of(gid);

        if let Some(parent) = snapshot
            .current
            .get(gid)
            .and_then(|entry| entry.parent.as_ref())
            && !selected.contains(parent)
            && flags_of(parent).contains(StatusFlags::S_ADDED)
        {
            let what = if flags.contains(StatusFlags::S_ADDED) {
                "added"
            } else {
                "moved"
            };
            return Err(conflict(
                snapshot,
                gid,
                format!(
                    "{what} into the added directory {}, which is not part of the commit",
                    display_path(snapshot, parent)
                ),
            ));
        }

        let deleted_directory = flags.contains(StatusFlags::S_DELETED)
            && snapshot
                .baseline
                .get(gid)
                .is_some_and(|entry| entry.is_directory());
        if deleted_directory
            && let Some(left_behind) = snapshot
                .baseline
                .subtree(gid)
                .into_iter()
                .skip(1)
                .find(|child| {
                    flags_of(child).contains(StatusFlags::S_DELETED) && !selected.contains(child)
                })
        {
            return Err(conflict(
                snapshot,
                gid,
                format!(
                    "the deleted item {} inside it is not part of the commit",
                    display_path(snapshot, &left_behind)
                ),
            ));
        }
    }

    Ok(())
}
