use crate::areas::database::ObjectStore;
use crate::areas::metadata::{Alias, MetadataRead, MetadataWriter, TimestampRow};
use crate::areas::refs::Refs;
use crate::areas::workspace::Workspace;
use crate::artifacts::journal::step::JournalStep;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::ItemType;
use crate::error::WcError;
use anyhow::Context;
use derive_new::new;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Executes journal steps against the working tree and an open metadata transaction
#[derive(new)]
pub struct Applier<'a, 'tx> {
    workspace: &'a Workspace,
    store: &'a dyn ObjectStore,
    refs: &'a Refs,
    writer: &'a MetadataWriter<'tx>,
    /// Parking area relative to the root
    park_dir: PathBuf,
}

impl Applier<'_, '_> {
    pub fn apply(&self, step: &JournalStep) -> anyhow::Result<()> {
        trace!(step = step.name(), path = ?step.path(), "applying journal step");

        match step {
            JournalStep::InsertGid { alias, gid } => self.writer.insert_gid(*alias, gid),
            JournalStep::SetPending(row) => self.writer.upsert_pending(row),
            JournalStep::ClearPending(alias) => self.writer.delete_pending(*alias),
            JournalStep::ClearAllPending => self.writer.clear_pending(),
            JournalStep::UpsertBaseline(row) => self.writer.upsert_baseline(row),
            JournalStep::DeleteBaseline(alias) => self.writer.delete_baseline(*alias),
            JournalStep::ReplaceBaseline(rows) => self.writer.replace_baseline(rows),
            JournalStep::SetCset { label, hid } => self.writer.set_cset(*label, hid),
            JournalStep::ClearCset(label) => self.writer.clear_cset(*label),
            JournalStep::AttachBranch { name, policy } => {
                self.writer.attach_branch(name, *policy).map(|_| ())
            }
            JournalStep::DetachBranch => self.writer.detach_branch(),
            JournalStep::MoveBranchHead { branch, hid } => self.refs.update_head(branch, hid),
            JournalStep::SetTimestamp(row) => self.writer.set_timestamp(row),
            JournalStep::ClearTimestamp(alias) => self.writer.clear_timestamp(*alias),
            JournalStep::SetIssue { alias, conflict } => self.writer.set_issue(*alias, conflict),
            JournalStep::ClearIssue(alias) => self.writer.clear_issue(*alias),
            JournalStep::ClearAllIssues => self.writer.clear_issues(),
            JournalStep::MakeDirectory { path } => self.workspace.make_directory(path),
            JournalStep::RemoveFile {
                alias,
                path,
                sparse,
            } => {
                if !sparse {
                    self.workspace.remove_file(path)?;
                }
                self.writer.clear_timestamp(*alias)
            }
            JournalStep::RemoveDirectory { path, sparse } => {
                if !sparse {
                    self.workspace.remove_directory(path)?;
                }
                Ok(())
            }
            JournalStep::MoveRename { from, to } => {
                self.ensure_vacant(to, from)?;
                self.workspace.rename(from, to)
            }
            JournalStep::Park { alias, from } => {
                std::fs::create_dir_all(self.workspace.absolute(&self.park_dir))?;
                self.workspace.rename(from, &self.parked(*alias))
            }
            JournalStep::Unpark { alias, to } => {
                let parked = self.parked(*alias);
                self.ensure_vacant(to, &parked)?;
                self.workspace.rename(&parked, to)
            }
            JournalStep::MaterializeFile {
                alias,
                path,
                item_type,
                hid,
                attrbits,
                sparse,
            } => {
                if *sparse {
                    return self.writer.set_sparse_fields(*alias, hid, *attrbits);
                }
                if let Some(entry) = self.workspace.stat(path)? {
                    return Err(WcError::AlreadyExists {
                        path: path.clone(),
                        blocker: format!("an uncontrolled {}", entry.item_type),
                    }
                    .into());
                }
                self.write_from_store(*alias, path, *item_type, hid, *attrbits)
            }
            JournalStep::OverwriteFromStore {
                alias,
                path,
                item_type,
                hid,
                attrbits,
                sparse,
            } => {
                if *sparse {
                    return self.writer.set_sparse_fields(*alias, hid, *attrbits);
                }
                self.write_from_store(*alias, path, *item_type, hid, *attrbits)
            }
            JournalStep::OverwriteFromFile {
                alias,
                path,
                item_type,
                source,
                hid,
                attrbits,
                sparse,
            } => {
                if *sparse {
                    return self.writer.set_sparse_fields(*alias, hid, *attrbits);
                }
                let content = self.workspace.read_content(source, ItemType::File)?;
                self.workspace
                    .write_content(path, *item_type, &content, *attrbits)?;
                self.record_timestamp(*alias, path, hid)
            }
            JournalStep::SetAttrbits {
                alias,
                path,
                attrbits,
                sparse,
            } => {
                if *sparse {
                    let hid = self
                        .writer
                        .pending_row(*alias)?
                        .and_then(|row| row.sparse_hid)
                        .or(self.writer.baseline_row(*alias)?.map(|row| row.hid));
                    return match hid {
                        Some(hid) => self.writer.set_sparse_fields(*alias, &hid, *attrbits),
                        None => Ok(()),
                    };
                }
                self.workspace.set_attrbits(path, *attrbits)
            }
            JournalStep::Backup { path } => self.workspace.backup(path).map(|_| ()),
        }
    }

    fn parked(&self, alias: Alias) -> PathBuf {
        self.park_dir.join(alias.to_string())
    }

    /// The destination must be free unless it is the very same file (a case-only rename)
    fn ensure_vacant(&self, to: &Path, from: &Path) -> anyhow::Result<()> {
        match self.workspace.stat(to)? {
            Some(entry) if !self.workspace.same_file(to, from) => Err(WcError::AlreadyExists {
                path: to.to_path_buf(),
                blocker: format!("an existing {} '{}'", entry.item_type, entry.name),
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn write_from_store(
        &self,
        alias: Alias,
        path: &Path,
        item_type: ItemType,
        hid: &ObjectId,
        attrbits: u64,
    ) -> anyhow::Result<()> {
        let content = self
            .store
            .fetch_blob(hid)
            .with_context(|| format!("failed to fetch content {hid} for {}", path.display()))?;
        self.workspace
            .write_content(path, item_type, &content, attrbits)?;
        self.record_timestamp(alias, path, hid)
    }

    /// Cache the hash of freshly written content, unless the write landed in the current second
    fn record_timestamp(&self, alias: Alias, path: &Path, hid: &ObjectId) -> anyhow::Result<()> {
        self.writer.clear_timestamp(alias)?;
        let Some(entry) = self.workspace.stat(path)? else {
            return Ok(());
        };

        let now = chrono::Utc::now().timestamp();
        if entry.mtime_ns / 1_000_000_000 < now {
            self.writer.set_timestamp(&TimestampRow::new(
                alias,
                entry.mtime_ns,
                entry.size,
                hid.clone(),
            ))?;
        }
        Ok(())
    }
}
