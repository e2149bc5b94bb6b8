use crate::areas::database::ObjectStore;
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::liveview::WcSnapshot;
use crate::artifacts::objects::flat_tree::{FlatTree, ROOT_ENTRY_NAME};
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::{ItemType, Tree, TreeEntry};
use crate::artifacts::portability::collider::{Collision, PortabilityCollider};
use crate::error::WcError;
use anyhow::Context;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// The snapshot a commit records
#[derive(Debug, Clone)]
pub struct CommitTree {
    /// Baseline with the selected changes applied; every directory carries its tree id
    pub tree: FlatTree,
    /// Id of the super-root tree holding the `@` entry
    pub root_oid: ObjectId,
}

/// Build and store the trees for a commit of `selected`
pub fn synthesize(
    wc: &WorkingCopy,
    snapshot: &WcSnapshot,
    selected: &BTreeSet<Gid>,
) -> anyhow::Result<CommitTree> {
    let store = wc.repository().database();
    let mut hybrid = snapshot.baseline.clone();

    for gid in selected {
        wc.check_cancelled()?;
        let Some(entry) = snapshot.current.get(gid) else {
            hybrid.remove(gid);
            continue;
        };

        let mut entry = entry.clone();
        let content_changed = snapshot.baseline.get(gid).is_none_or(|old| old.oid != entry.oid);
        if !entry.is_directory() && content_changed && !snapshot.sparse.contains(gid) {
            entry.oid = Some(store_content(wc, snapshot, gid, entry.item_type, entry.oid.as_ref())?);
        }
        hybrid.insert(entry);
    }

    check_attached(snapshot, &hybrid)?;

    let bubble = bubble_set(snapshot, &hybrid, selected);
    let mut dirs = bubble
        .iter()
        .map(|gid| (hybrid.depth_of(gid).unwrap_or_default(), gid.clone()))
        .collect::<Vec<_>>();
    dirs.sort_by(|(a, x), (b, y)| b.cmp(a).then_with(|| x.cmp(y)));

    for (_, dir) in dirs {
        let tree = directory_tree(wc, &hybrid, &dir)?;
        let oid = store.store_tree(&tree)?;
        trace!(dir = %dir, tree = %oid, entries = tree.len(), "synthesized tree");
        hybrid.set_oid(&dir, Some(oid));
    }

    let root = hybrid
        .root()
        .and_then(|root| hybrid.get(root))
        .context("commit snapshot has no root")?;
    let mut super_root = Tree::default();
    super_root.insert(TreeEntry::new(
        root.gid.clone(),
        ROOT_ENTRY_NAME.to_string(),
        ItemType::Directory,
        root.attrbits,
        root.oid.clone().context("root tree was not synthesized")?,
    ))?;
    let root_oid = store.store_tree(&super_root)?;

    debug!(selected = selected.len(), root = %root_oid, "synthesized commit snapshot");
    Ok(CommitTree {
        tree: hybrid,
        root_oid,
    })
}

/// Store the on-disk content of a file, checking it still hashes to what reconciliation saw
fn store_content(
    wc: &WorkingCopy,
    snapshot: &WcSnapshot,
    gid: &Gid,
    item_type: ItemType,
    observed: Option<&ObjectId>,
) -> anyhow::Result<ObjectId> {
    let path = snapshot
        .current
        .path_of(gid)
        .with_context(|| format!("item {gid} is detached from the root"))?;
    let content = wc.workspace().read_content(&path, item_type)?;
    let stored = wc.repository().database().store_blob(content)?;

    match observed {
        Some(observed) if *observed != stored => Err(WcError::Integrity {
            path,
            expected: observed.to_string(),
            actual: stored.to_string(),
        }
        .into()),
        _ => Ok(stored),
    }
}

/// Every item must hang off the root; mixing old and new locations can break that
fn check_attached(snapshot: &WcSnapshot, hybrid: &FlatTree) -> anyhow::Result<()> {
    for entry in hybrid.entries() {
        if entry.parent.is_some() && hybrid.path_of(&entry.gid).is_none() {
            return Err(WcError::PartialCommitConflict {
                path: snapshot.path_of(&entry.gid).unwrap_or_default(),
                reason: "its parent directory change is not part of the commit".to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Directories whose tree changes: selected ones, and every directory above a selected item at
/// its old or new location
fn bubble_set(snapshot: &WcSnapshot, hybrid: &FlatTree, selected: &BTreeSet<Gid>) -> BTreeSet<Gid> {
    let mut bubble = hybrid.root().cloned().into_iter().collect::<BTreeSet<_>>();
    let climb = |start: Option<&Gid>, bubble: &mut BTreeSet<Gid>| {
        let mut current = start.cloned();
        while let Some(gid) = current {
            if !hybrid.contains(&gid) || !bubble.insert(gid.clone()) {
                break;
            }
            current = hybrid.get(&gid).and_then(|entry| entry.parent.clone());
        }
    };

    for gid in selected {
        if let Some(entry) = hybrid.get(gid) {
            if entry.is_directory() {
                climb(Some(gid), &mut bubble);
            }
            climb(entry.parent.as_ref(), &mut bubble);
        }
        let old_parent = snapshot.baseline.get(gid).and_then(|entry| entry.parent.as_ref());
        climb(old_parent, &mut bubble);
    }

    bubble
}

fn directory_tree(wc: &WorkingCopy, hybrid: &FlatTree, dir: &Gid) -> anyhow::Result<Tree> {
    let dir_path = hybrid.path_of(dir).unwrap_or_default();
    let mut collider = PortabilityCollider::new(wc.portability());
    let mut tree = Tree::default();

    for child in hybrid.children(dir) {
        match collider.add(&child.name) {
            None => {}
            Some(Collision::Exact(name)) => {
                return Err(WcError::PartialCommitConflict {
                    path: dir_path.join(&child.name),
                    reason: format!("another item named '{name}' stays in the directory"),
                }
                .into());
            }
            Some(Collision::Folded { other, rule }) => {
                return Err(WcError::PortabilityCollision {
                    dir: dir_path,
                    name: child.name.clone(),
                    other,
                    rule: rule.to_string(),
                }
                .into());
            }
        }

        let oid = child
            .oid
            .clone()
            .with_context(|| format!("{} has no content id", dir_path.join(&child.name).display()))?;
        tree.insert(TreeEntry::new(
            child.gid.clone(),
            child.name.clone(),
            child.item_type,
            child.attrbits,
            oid,
        ))?;
    }

    Ok(tree)
}
