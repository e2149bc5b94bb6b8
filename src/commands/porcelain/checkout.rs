use crate::areas::metadata::CsetLabel;
use crate::areas::repository::Repository;
use crate::areas::working_copy::WorkingCopy;
use crate::areas::workspace::METADATA_DIR;
use crate::artifacts::branch::DEFAULT_BRANCH;
use crate::artifacts::branch::branch_name::{BranchName, BranchPolicy};
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::journal::transition::{Rebaseline, Transition, sparse_closure};
use crate::artifacts::merge::tool::glob_to_regex;
use crate::artifacts::objects::flat_tree::FlatTree;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::error::WcError;
use anyhow::Context;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::Path;
use tracing::{info, info_span, warn};

impl WorkingCopy {
    /// Create a working copy of `revision` (the default branch when `None`) at `target`
    ///
    /// Items whose path matches one of `sparse_patterns` are recorded but not written to disk,
    /// and neither is anything below them. When the checkout fails, whatever it had created
    /// under `target` is removed again.
    pub fn checkout(
        repo: &Path,
        target: &Path,
        revision: Option<&str>,
        sparse_patterns: &[String],
    ) -> anyhow::Result<WorkingCopy> {
        let span = info_span!("checkout", target = %target.display());
        let _guard = span.enter();

        let repository = Repository::open(repo)?;
        let revision = revision.unwrap_or(DEFAULT_BRANCH);
        let changeset = repository.resolve_revision(revision)?;
        let branch = branch_for(&repository, revision)?;

        if target.join(METADATA_DIR).exists() {
            return Err(WcError::AlreadyExists {
                path: target.to_path_buf(),
                blocker: "an existing working copy".to_string(),
            }
            .into());
        }
        let created = !target.exists();
        std::fs::create_dir_all(target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        let before = dir_entries(target)?;

        match Self::populate(target, &repository, &changeset, branch, sparse_patterns) {
            Ok(wc) => {
                info!(changeset = %changeset, "checked out");
                Ok(wc)
            }
            Err(error) => {
                discard_partial(target, created, &before);
                Err(error)
            }
        }
    }

    fn populate(
        target: &Path,
        repository: &Repository,
        changeset: &ObjectId,
        branch: Option<BranchName>,
        sparse_patterns: &[String],
    ) -> anyhow::Result<WorkingCopy> {
        let mut wc = WorkingCopy::create(target, repository)?;
        let tree = repository.flat_tree(changeset)?;
        let root = tree
            .root()
            .and_then(|root| tree.get(root))
            .cloned()
            .context("changeset snapshot has no root")?;
        let sparse = sparse_closure(&tree, &sparse_seeds(&tree, sparse_patterns)?);
        let empty = FlatTree::with_root(root);

        let mut tx = wc.begin()?;
        let aliases = tx.alias_map([&tree])?;

        let mut rebaseline = Rebaseline::new(&tree, &tree);
        rebaseline.replace_baseline = true;
        rebaseline.sparse = sparse.clone();
        tx.queue_all(rebaseline.plan(&aliases)?);

        let mut transition = Transition::new(&empty, &tree);
        transition.sparse = sparse;
        tx.queue_all(transition.plan(&aliases)?);

        tx.queue(JournalStep::SetCset {
            label: CsetLabel::L0,
            hid: changeset.clone(),
        });
        if let Some(branch) = branch {
            tx.queue(JournalStep::AttachBranch {
                name: branch.to_string(),
                policy: BranchPolicy::Validate,
            });
        }
        tx.apply()?;

        Ok(wc)
    }
}

/// The branch to attach when the revision names one
fn branch_for(repository: &Repository, revision: &str) -> anyhow::Result<Option<BranchName>> {
    let Ok(name) = BranchName::try_parse(revision.to_string()) else {
        return Ok(None);
    };
    Ok(repository.refs().read_head(&name)?.map(|_| name))
}

/// Items whose repo path matches a sparse pattern
fn sparse_seeds(tree: &FlatTree, patterns: &[String]) -> anyhow::Result<BTreeSet<Gid>> {
    let patterns = patterns
        .iter()
        .map(|pattern| glob_to_regex(pattern.trim_end_matches('/')))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if patterns.is_empty() {
        return Ok(BTreeSet::new());
    }

    Ok(tree
        .entries()
        .filter(|entry| entry.parent.is_some())
        .filter(|entry| {
            tree.path_of(&entry.gid).is_some_and(|path| {
                let path = path.to_string_lossy().replace('\\', "/");
                patterns.iter().any(|pattern| pattern.is_match(&path))
            })
        })
        .map(|entry| entry.gid.clone())
        .collect())
}

fn dir_entries(dir: &Path) -> anyhow::Result<BTreeSet<OsString>> {
    std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .map(|entry| Ok(entry?.file_name()))
        .collect()
}

/// Remove what a failed checkout left behind
fn discard_partial(target: &Path, created: bool, before: &BTreeSet<OsString>) {
    let result = if created {
        std::fs::remove_dir_all(target)
    } else {
        dir_entries(target)
            .map_err(std::io::Error::other)
            .and_then(|entries| {
                entries
                    .difference(before)
                    .map(|name| target.join(name))
                    .try_for_each(|path| match path.is_dir() && !path.is_symlink() {
                        true => std::fs::remove_dir_all(&path),
                        false => std::fs::remove_file(&path),
                    })
            })
    };

    if let Err(error) = result {
        warn!(target = %target.display(), %error, "failed to clean up after a failed checkout");
    }
}
