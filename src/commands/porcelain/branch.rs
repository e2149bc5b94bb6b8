use crate::areas::metadata::{CsetLabel, MetadataRead};
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::branch::branch_name::{BranchName, BranchPolicy};
use crate::artifacts::journal::step::JournalStep;
use crate::error::WcError;
use anyhow::Context;
use tracing::{info, info_span};

impl WorkingCopy {
    /// Attach the working copy to branch `name`
    ///
    /// A missing branch is created at the baseline changeset. An existing one must point at the
    /// baseline, otherwise the next commit could not advance it.
    pub fn attach_branch(&mut self, name: &str, policy: BranchPolicy) -> anyhow::Result<BranchName> {
        let span = info_span!("attach_branch", root = %self.root().display(), name);
        let _guard = span.enter();

        let branch = BranchName::parse_with_policy(name, policy)?;
        let baseline = self
            .metadata()
            .cset(CsetLabel::L0)?
            .context("working copy has no baseline changeset")?;
        let refs = self.repository().refs();
        match refs.read_head(&branch)? {
            None => refs.create_branch(&branch, &baseline)?,
            Some(head) if head == baseline => {}
            Some(head) => {
                return Err(WcError::Unsupported(format!(
                    "branch {branch} points at {}, not at the baseline {}",
                    head.to_short_oid(),
                    baseline.to_short_oid()
                ))
                .into());
            }
        }

        let mut tx = self.begin()?;
        tx.queue(JournalStep::AttachBranch {
            name: branch.to_string(),
            policy,
        });
        tx.apply()?;

        info!(%branch, "attached");
        Ok(branch)
    }

    pub fn detach_branch(&mut self) -> anyhow::Result<()> {
        let span = info_span!("detach_branch", root = %self.root().display());
        let _guard = span.enter();

        let mut tx = self.begin()?;
        tx.queue(JournalStep::DetachBranch);
        tx.apply()?;

        info!("detached");
        Ok(())
    }
}
