use crate::areas::database::ObjectStore;
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::journal::transition::ContentSource;
use crate::artifacts::merge::conflict::{Conflict, ConflictHids, ConflictPaths, ConflictStatus};
use crate::artifacts::merge::engine::ContentMerge;
use crate::artifacts::merge::tool::{ToolChoice, ToolSelector, ToolStatus};
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::tree::ItemType;
use anyhow::Context;
use bytes::Bytes;
use std::path::Path;
use tracing::{debug, warn};

const ANCESTOR_FILE: &str = "ancestor";
const BASELINE_FILE: &str = "baseline";
const OTHER_FILE: &str = "other";
const RESULT_FILE: &str = "result";

/// Runs content merges for the files a tree merge could not decide
///
/// Each merge works in `.grove/tmp/merge/<gid>/`; the caller registers that directory as
/// transaction scratch before calling in.
pub struct AutoMerger<'a> {
    wc: &'a WorkingCopy,
    selector: ToolSelector,
    no_auto_merge: bool,
}

impl<'a> AutoMerger<'a> {
    pub fn new(wc: &'a WorkingCopy, no_auto_merge: bool) -> anyhow::Result<Self> {
        Ok(AutoMerger {
            wc,
            selector: ToolSelector::new(&wc.config().merge)?,
            no_auto_merge,
        })
    }

    /// Prepare the inputs, run the selected tool and settle the conflict
    ///
    /// `rule_path` picks the merge rule (the ancestor's path when there is one). When the
    /// baseline version is materialized, `baseline_on_disk` points at it so local edits take
    /// part in the merge. Returns where the merged content is, if a result was produced.
    pub fn merge_content(
        &self,
        gid: &Gid,
        rule_path: &Path,
        baseline_on_disk: Option<&Path>,
        merge: &ContentMerge,
        conflict: &mut Conflict,
    ) -> anyhow::Result<Option<ContentSource>> {
        let store = self.wc.repository().database();
        let workspace = self.wc.workspace();
        let dir = self.wc.merge_dir(gid);
        std::fs::create_dir_all(workspace.absolute(&dir))
            .with_context(|| format!("failed to create merge directory {}", dir.display()))?;

        let ancestor = match &merge.ancestor {
            Some(oid) => store.fetch_blob(oid)?,
            None => Bytes::new(),
        };
        let baseline = match baseline_on_disk {
            Some(path) => workspace.read_content(path, ItemType::File)?,
            None => store.fetch_blob(&merge.baseline)?,
        };
        let other = store.fetch_blob(&merge.other)?;
        // local edits must stay recoverable once the file is overwritten
        let baseline_hid = store.store_blob(baseline.clone())?;

        let paths = ConflictPaths {
            ancestor: Some(dir.join(ANCESTOR_FILE)),
            baseline: Some(dir.join(BASELINE_FILE)),
            other: Some(dir.join(OTHER_FILE)),
            result: Some(dir.join(RESULT_FILE)),
        };
        for (path, content) in [
            (&paths.ancestor, &ancestor),
            (&paths.baseline, &baseline),
            (&paths.other, &other),
        ] {
            if let Some(path) = path {
                let absolute = workspace.absolute(path);
                std::fs::write(&absolute, content)
                    .with_context(|| format!("failed to write merge input {}", absolute.display()))?;
            }
        }
        let result = dir.join(RESULT_FILE);

        conflict.hids = ConflictHids {
            ancestor: merge.ancestor.clone(),
            baseline: Some(baseline_hid),
            other: Some(merge.other.clone()),
        };
        conflict.paths = paths;

        if self.no_auto_merge {
            return Ok(None);
        }

        let contents = [Blob::new(ancestor), Blob::new(baseline), Blob::new(other)];
        let tool = match self.selector.select(rule_path, &contents)? {
            ToolChoice::Tool(tool) => tool,
            ToolChoice::NoRule => {
                debug!(%gid, path = %rule_path.display(), "no merge rule applies");
                conflict.settle(ConflictStatus::NoRule)?;
                return Ok(None);
            }
        };
        conflict.tool = Some(tool.name().to_string());

        let outcome = tool.invoke(
            &workspace.absolute(&dir.join(ANCESTOR_FILE)),
            &workspace.absolute(&dir.join(BASELINE_FILE)),
            &workspace.absolute(&dir.join(OTHER_FILE)),
            &workspace.absolute(&result),
        );
        let status = match outcome {
            Ok(outcome) => match (outcome.status, outcome.result_exists) {
                (ToolStatus::Clean, true) => ConflictStatus::AutoClean,
                (ToolStatus::Conflicts, true) => ConflictStatus::AutoWithMarkers,
                _ => ConflictStatus::ToolError,
            },
            Err(error) => {
                warn!(%gid, tool = tool.name(), %error, "merge tool failed");
                ConflictStatus::ToolError
            }
        };
        conflict.settle(status)?;
        if status == ConflictStatus::ToolError {
            return Ok(None);
        }

        let merged = workspace.read_content(&result, ItemType::File)?;
        let hid = store.store_blob(merged)?;
        conflict.result_hid = Some(hid.clone());
        conflict.disposable = tool.automatic();

        debug!(%gid, tool = tool.name(), %status, "content merged");
        Ok(Some(ContentSource::File { path: result, hid }))
    }
}
