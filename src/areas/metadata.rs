//! Working-copy metadata store
//!
//! Everything the working copy knows beyond the files themselves lives in one SQLite database,
//! `.grove/wc.db`:
//!
//! | table           | contents                                                        |
//! |-----------------|-----------------------------------------------------------------|
//! | `tbl_gid`       | alias ⇄ gid map                                                 |
//! | `tbl_baseline`  | one row per item of the baseline changeset                      |
//! | `tbl_pc`        | pending-change overrides (structure, flags, sparse fields)      |
//! | `tbl_branch`    | the attached branch, if any                                     |
//! | `tbl_cset`      | changeset labels: `L0` baseline, `L1` pending merge             |
//! | `tbl_timestamp` | mtime/size/hash cache for materialized files                    |
//! | `tbl_issue`     | merge conflicts, as JSON                                        |
//! | `tbl_meta`      | key/value settings such as the repository path                  |
//!
//! Reads are available on both [`MetadataStore`] and [`MetadataWriter`] through
//! [`MetadataRead`]. Writes exist only on [`MetadataWriter`], which wraps an open
//! `rusqlite::Transaction`: holding a writer is the proof that a write transaction is open.

use crate::artifacts::branch::branch_name::{BranchName, BranchPolicy};
use crate::artifacts::merge::conflict::Conflict;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::ItemType;
use anyhow::Context;
use bitflags::bitflags;
use derive_new::new;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Local integer handle of an item, the row id of `tbl_gid`
pub type Alias = i64;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const META_REPO_PATH: &str = "repo_path";
const META_SCHEMA_VERSION: &str = "schema_version";
const SCHEMA_VERSION: &str = "1";

const SCHEMA: &str = r"
CREATE TABLE tbl_gid (
    alias INTEGER PRIMARY KEY,
    gid TEXT NOT NULL UNIQUE
);
CREATE TABLE tbl_baseline (
    alias INTEGER PRIMARY KEY,
    parent INTEGER,
    entryname TEXT NOT NULL,
    type INTEGER NOT NULL,
    hid TEXT NOT NULL,
    attrbits INTEGER NOT NULL
);
CREATE INDEX idx_baseline_parent ON tbl_baseline (parent);
CREATE TABLE tbl_pc (
    alias INTEGER PRIMARY KEY,
    parent INTEGER,
    entryname TEXT NOT NULL,
    type INTEGER NOT NULL,
    flags INTEGER NOT NULL,
    ref_hid_merge TEXT,
    sparse_hid TEXT,
    sparse_attrbits INTEGER
);
CREATE INDEX idx_pc_parent ON tbl_pc (parent);
CREATE TABLE tbl_branch (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    name TEXT NOT NULL
);
CREATE TABLE tbl_cset (
    label TEXT PRIMARY KEY,
    hid TEXT NOT NULL
);
CREATE TABLE tbl_timestamp (
    alias INTEGER PRIMARY KEY,
    mtime_ns INTEGER NOT NULL,
    size INTEGER NOT NULL,
    hid TEXT NOT NULL
);
CREATE TABLE tbl_issue (
    alias INTEGER PRIMARY KEY,
    data TEXT NOT NULL
);
CREATE TABLE tbl_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PendingFlags: u32 {
        const ADDED = 1 << 0;
        const DELETED = 1 << 1;
        const SPARSE = 1 << 2;
        /// Created by a merge
        const ADD_SPECIAL_M = 1 << 3;
        /// Kept by an update although the new baseline no longer has it
        const ADD_SPECIAL_U = 1 << 4;
    }
}

/// Changeset labels stored in `tbl_cset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsetLabel {
    /// The baseline changeset
    L0,
    /// The changeset being merged in, while a merge is pending
    L1,
}

impl CsetLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CsetLabel::L0 => "L0",
            CsetLabel::L1 => "L1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct BaselineRow {
    pub alias: Alias,
    pub parent: Option<Alias>,
    pub entryname: String,
    pub item_type: ItemType,
    pub hid: ObjectId,
    pub attrbits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct PendingRow {
    pub alias: Alias,
    pub parent: Option<Alias>,
    pub entryname: String,
    pub item_type: ItemType,
    pub flags: PendingFlags,
    #[new(default)]
    pub ref_hid_merge: Option<ObjectId>,
    #[new(default)]
    pub sparse_hid: Option<ObjectId>,
    #[new(default)]
    pub sparse_attrbits: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct TimestampRow {
    pub alias: Alias,
    pub mtime_ns: i64,
    pub size: u64,
    pub hid: ObjectId,
}

type RawBaseline = (i64, Option<i64>, String, i64, String, i64);
type RawPending = (
    i64,
    Option<i64>,
    String,
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<i64>,
);

fn baseline_from_raw(raw: RawBaseline) -> anyhow::Result<BaselineRow> {
    let (alias, parent, entryname, item_type, hid, attrbits) = raw;

    Ok(BaselineRow {
        alias,
        parent,
        entryname,
        item_type: ItemType::try_from_i64(item_type)?,
        hid: ObjectId::try_parse(hid)?,
        attrbits: attrbits as u64,
    })
}

fn pending_from_raw(raw: RawPending) -> anyhow::Result<PendingRow> {
    let (alias, parent, entryname, item_type, flags, ref_hid_merge, sparse_hid, sparse_attrbits) =
        raw;

    Ok(PendingRow {
        alias,
        parent,
        entryname,
        item_type: ItemType::try_from_i64(item_type)?,
        flags: PendingFlags::from_bits(flags as u32)
            .with_context(|| format!("invalid pending flags {flags:#x} for alias {alias}"))?,
        ref_hid_merge: ref_hid_merge.map(ObjectId::try_parse).transpose()?,
        sparse_hid: sparse_hid.map(ObjectId::try_parse).transpose()?,
        sparse_attrbits: sparse_attrbits.map(|bits| bits as u64),
    })
}

const BASELINE_COLUMNS: &str = "alias, parent, entryname, type, hid, attrbits";
const PENDING_COLUMNS: &str =
    "alias, parent, entryname, type, flags, ref_hid_merge, sparse_hid, sparse_attrbits";

fn read_baseline(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawBaseline> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn read_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPending> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

/// Read access shared by the store and its writer
///
/// Optional data comes back as `None`; only real I/O or corruption is an error.
pub trait MetadataRead {
    fn connection(&self) -> &Connection;

    fn gid_for_alias(&self, alias: Alias) -> anyhow::Result<Option<Gid>> {
        self.connection()
            .query_row(
                "SELECT gid FROM tbl_gid WHERE alias = ?1",
                params![alias],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(Gid::try_parse)
            .transpose()
    }

    fn alias_for_gid(&self, gid: &Gid) -> anyhow::Result<Option<Alias>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT alias FROM tbl_gid WHERE gid = ?1",
                params![gid.as_ref()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Every alias ⇄ gid pair
    fn gid_map(&self) -> anyhow::Result<Vec<(Alias, Gid)>> {
        let mut statement = self
            .connection()
            .prepare("SELECT alias, gid FROM tbl_gid ORDER BY alias")?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(alias, gid)| Ok((alias, Gid::try_parse(gid)?)))
            .collect()
    }

    /// First alias not yet present in `tbl_gid`
    fn next_alias(&self) -> anyhow::Result<Alias> {
        let max: Option<i64> =
            self.connection()
                .query_row("SELECT MAX(alias) FROM tbl_gid", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    fn baseline_row(&self, alias: Alias) -> anyhow::Result<Option<BaselineRow>> {
        self.connection()
            .query_row(
                &format!("SELECT {BASELINE_COLUMNS} FROM tbl_baseline WHERE alias = ?1"),
                params![alias],
                read_baseline,
            )
            .optional()?
            .map(baseline_from_raw)
            .transpose()
    }

    fn baseline_root(&self) -> anyhow::Result<Option<BaselineRow>> {
        self.connection()
            .query_row(
                &format!("SELECT {BASELINE_COLUMNS} FROM tbl_baseline WHERE parent IS NULL"),
                [],
                read_baseline,
            )
            .optional()?
            .map(baseline_from_raw)
            .transpose()
    }

    fn baseline_children(&self, parent: Alias) -> anyhow::Result<Vec<BaselineRow>> {
        let mut statement = self.connection().prepare(&format!(
            "SELECT {BASELINE_COLUMNS} FROM tbl_baseline WHERE parent = ?1 ORDER BY entryname"
        ))?;
        let rows = statement
            .query_map(params![parent], read_baseline)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(baseline_from_raw).collect()
    }

    fn baseline_rows(&self) -> anyhow::Result<Vec<BaselineRow>> {
        let mut statement = self.connection().prepare(&format!(
            "SELECT {BASELINE_COLUMNS} FROM tbl_baseline ORDER BY alias"
        ))?;
        let rows = statement
            .query_map([], read_baseline)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(baseline_from_raw).collect()
    }

    fn pending_row(&self, alias: Alias) -> anyhow::Result<Option<PendingRow>> {
        self.connection()
            .query_row(
                &format!("SELECT {PENDING_COLUMNS} FROM tbl_pc WHERE alias = ?1"),
                params![alias],
                read_pending,
            )
            .optional()?
            .map(pending_from_raw)
            .transpose()
    }

    fn pending_children(&self, parent: Alias) -> anyhow::Result<Vec<PendingRow>> {
        let mut statement = self.connection().prepare(&format!(
            "SELECT {PENDING_COLUMNS} FROM tbl_pc WHERE parent = ?1 ORDER BY entryname"
        ))?;
        let rows = statement
            .query_map(params![parent], read_pending)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(pending_from_raw).collect()
    }

    fn pending_rows(&self) -> anyhow::Result<Vec<PendingRow>> {
        let mut statement = self
            .connection()
            .prepare(&format!("SELECT {PENDING_COLUMNS} FROM tbl_pc ORDER BY alias"))?;
        let rows = statement
            .query_map([], read_pending)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(pending_from_raw).collect()
    }

    /// The attached branch; a detached working copy yields `None`
    fn branch(&self) -> anyhow::Result<Option<BranchName>> {
        self.connection()
            .query_row("SELECT name FROM tbl_branch WHERE id = 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .map(|name| BranchName::parse_with_policy(&name, BranchPolicy::Legacy))
            .transpose()
    }

    fn cset(&self, label: CsetLabel) -> anyhow::Result<Option<ObjectId>> {
        self.connection()
            .query_row(
                "SELECT hid FROM tbl_cset WHERE label = ?1",
                params![label.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(ObjectId::try_parse)
            .transpose()
    }

    fn timestamp(&self, alias: Alias) -> anyhow::Result<Option<TimestampRow>> {
        let raw = self
            .connection()
            .query_row(
                "SELECT mtime_ns, size, hid FROM tbl_timestamp WHERE alias = ?1",
                params![alias],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(mtime_ns, size, hid)| {
            Ok(TimestampRow::new(alias, mtime_ns, size as u64, ObjectId::try_parse(hid)?))
        })
        .transpose()
    }

    fn issue(&self, alias: Alias) -> anyhow::Result<Option<Conflict>> {
        self.connection()
            .query_row(
                "SELECT data FROM tbl_issue WHERE alias = ?1",
                params![alias],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|data| {
                serde_json::from_str(&data)
                    .with_context(|| format!("corrupt issue record for alias {alias}"))
            })
            .transpose()
    }

    fn issues(&self) -> anyhow::Result<Vec<(Alias, Conflict)>> {
        let mut statement = self
            .connection()
            .prepare("SELECT alias, data FROM tbl_issue ORDER BY alias")?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(alias, data)| {
                let conflict = serde_json::from_str(&data)
                    .with_context(|| format!("corrupt issue record for alias {alias}"))?;
                Ok((alias, conflict))
            })
            .collect()
    }

    fn repo_path(&self) -> anyhow::Result<Option<PathBuf>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT value FROM tbl_meta WHERE key = ?1",
                params![META_REPO_PATH],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(PathBuf::from))
    }
}

/// Create every table; only possible inside an open transaction
pub fn create_schema(tx: &Transaction<'_>) -> anyhow::Result<()> {
    tx.execute_batch(SCHEMA)
        .context("failed to create working-copy schema")?;
    tx.execute(
        "INSERT INTO tbl_meta (key, value) VALUES (?1, ?2)",
        params![META_SCHEMA_VERSION, SCHEMA_VERSION],
    )?;

    Ok(())
}

#[derive(Debug)]
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open an existing database with WAL journaling and a busy timeout
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open metadata store {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", false)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(db = %db_path.display(), journal_mode = %mode, "opened metadata store");

        Ok(MetadataStore { conn })
    }

    /// Create a fresh database bound to a repository
    pub fn create(db_path: &Path, repo_path: &Path) -> anyhow::Result<Self> {
        let mut store = Self::open(db_path)?;
        let writer = store.begin_write()?;
        create_schema(&writer.tx)?;
        writer.set_meta(META_REPO_PATH, &repo_path.to_string_lossy())?;
        writer.commit()?;

        Ok(store)
    }

    /// Start the single write transaction of an apply
    pub fn begin_write(&mut self) -> anyhow::Result<MetadataWriter<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin metadata write transaction")?;

        Ok(MetadataWriter { tx })
    }
}

impl MetadataRead for MetadataStore {
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Write handle; dropping it without [`MetadataWriter::commit`] rolls everything back
pub struct MetadataWriter<'a> {
    tx: Transaction<'a>,
}

impl MetadataRead for MetadataWriter<'_> {
    fn connection(&self) -> &Connection {
        &self.tx
    }
}

impl MetadataWriter<'_> {
    pub fn commit(self) -> anyhow::Result<()> {
        self.tx
            .commit()
            .context("failed to commit metadata transaction")
    }

    pub fn insert_gid(&self, alias: Alias, gid: &Gid) -> anyhow::Result<()> {
        self.tx.execute(
            "INSERT OR REPLACE INTO tbl_gid (alias, gid) VALUES (?1, ?2)",
            params![alias, gid.as_ref()],
        )?;
        Ok(())
    }

    pub fn upsert_baseline(&self, row: &BaselineRow) -> anyhow::Result<()> {
        self.tx.execute(
            &format!(
                "INSERT OR REPLACE INTO tbl_baseline ({BASELINE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                row.alias,
                row.parent,
                row.entryname,
                row.item_type.as_i64(),
                row.hid.as_ref(),
                row.attrbits as i64
            ],
        )?;
        Ok(())
    }

    pub fn delete_baseline(&self, alias: Alias) -> anyhow::Result<()> {
        self.tx
            .execute("DELETE FROM tbl_baseline WHERE alias = ?1", params![alias])?;
        Ok(())
    }

    /// Swap the whole baseline for a new changeset's rows
    pub fn replace_baseline(&self, rows: &[BaselineRow]) -> anyhow::Result<()> {
        self.tx.execute("DELETE FROM tbl_baseline", [])?;
        rows.iter().try_for_each(|row| self.upsert_baseline(row))
    }

    pub fn upsert_pending(&self, row: &PendingRow) -> anyhow::Result<()> {
        self.tx.execute(
            &format!(
                "INSERT OR REPLACE INTO tbl_pc ({PENDING_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                row.alias,
                row.parent,
                row.entryname,
                row.item_type.as_i64(),
                row.flags.bits() as i64,
                row.ref_hid_merge.as_ref().map(|hid| hid.as_ref()),
                row.sparse_hid.as_ref().map(|hid| hid.as_ref()),
                row.sparse_attrbits.map(|bits| bits as i64)
            ],
        )?;
        Ok(())
    }

    pub fn delete_pending(&self, alias: Alias) -> anyhow::Result<()> {
        self.tx
            .execute("DELETE FROM tbl_pc WHERE alias = ?1", params![alias])?;
        Ok(())
    }

    pub fn clear_pending(&self) -> anyhow::Result<()> {
        self.tx.execute("DELETE FROM tbl_pc", [])?;
        Ok(())
    }

    /// Update the dynamic fields of a sparse item
    pub fn set_sparse_fields(
        &self,
        alias: Alias,
        hid: &ObjectId,
        attrbits: u64,
    ) -> anyhow::Result<()> {
        self.tx.execute(
            "UPDATE tbl_pc SET sparse_hid = ?2, sparse_attrbits = ?3 WHERE alias = ?1",
            params![alias, hid.as_ref(), attrbits as i64],
        )?;
        Ok(())
    }

    pub fn set_cset(&self, label: CsetLabel, hid: &ObjectId) -> anyhow::Result<()> {
        self.tx.execute(
            "INSERT OR REPLACE INTO tbl_cset (label, hid) VALUES (?1, ?2)",
            params![label.as_str(), hid.as_ref()],
        )?;
        Ok(())
    }

    pub fn clear_cset(&self, label: CsetLabel) -> anyhow::Result<()> {
        self.tx.execute(
            "DELETE FROM tbl_cset WHERE label = ?1",
            params![label.as_str()],
        )?;
        Ok(())
    }

    /// Attach a branch, validating the name unless the legacy policy is requested
    ///
    /// The name is normalized before it is persisted under either policy.
    pub fn attach_branch(&self, name: &str, policy: BranchPolicy) -> anyhow::Result<BranchName> {
        let name = BranchName::parse_with_policy(name, policy)?;
        self.tx.execute(
            "INSERT OR REPLACE INTO tbl_branch (id, name) VALUES (1, ?1)",
            params![name.as_ref()],
        )?;

        Ok(name)
    }

    pub fn detach_branch(&self) -> anyhow::Result<()> {
        self.tx.execute("DELETE FROM tbl_branch", [])?;
        Ok(())
    }

    pub fn set_timestamp(&self, row: &TimestampRow) -> anyhow::Result<()> {
        self.tx.execute(
            "INSERT OR REPLACE INTO tbl_timestamp (alias, mtime_ns, size, hid) \
             VALUES (?1, ?2, ?3, ?4)",
            params![row.alias, row.mtime_ns, row.size as i64, row.hid.as_ref()],
        )?;
        Ok(())
    }

    pub fn clear_timestamp(&self, alias: Alias) -> anyhow::Result<()> {
        self.tx
            .execute("DELETE FROM tbl_timestamp WHERE alias = ?1", params![alias])?;
        Ok(())
    }

    pub fn set_issue(&self, alias: Alias, conflict: &Conflict) -> anyhow::Result<()> {
        let data = serde_json::to_string(conflict)?;
        self.tx.execute(
            "INSERT OR REPLACE INTO tbl_issue (alias, data) VALUES (?1, ?2)",
            params![alias, data],
        )?;
        Ok(())
    }

    pub fn clear_issue(&self, alias: Alias) -> anyhow::Result<()> {
        self.tx
            .execute("DELETE FROM tbl_issue WHERE alias = ?1", params![alias])?;
        Ok(())
    }

    pub fn clear_issues(&self) -> anyhow::Result<()> {
        self.tx.execute("DELETE FROM tbl_issue", [])?;
        Ok(())
    }

    pub fn set_meta(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.tx.execute(
            "INSERT OR REPLACE INTO tbl_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::merge::conflict::{ConflictFacets, MergePresence};
    use crate::artifacts::objects::blob::Blob;
    use crate::artifacts::objects::object::Object;
    use assert_fs::TempDir;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    struct Fixture {
        _dir: TempDir,
        store: MetadataStore,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = MetadataStore::create(&dir.path().join("wc.db"), Path::new("/repo"))
            .expect("Failed to create metadata store");
        Fixture { _dir: dir, store }
    }

    fn hid(content: &'static [u8]) -> ObjectId {
        Blob::new(Bytes::from_static(content)).object_id().unwrap()
    }

    #[rstest]
    fn optional_lookups_are_none_on_a_fresh_store(fixture: Fixture) -> anyhow::Result<()> {
        let store = &fixture.store;

        assert_eq!(store.branch()?, None);
        assert_eq!(store.cset(CsetLabel::L0)?, None);
        assert_eq!(store.gid_for_alias(1)?, None);
        assert_eq!(store.timestamp(1)?, None);
        assert_eq!(store.issue(1)?, None);
        assert_eq!(store.next_alias()?, 1);
        assert_eq!(store.repo_path()?, Some(PathBuf::from("/repo")));
        Ok(())
    }

    #[rstest]
    fn dropped_writer_rolls_back(mut fixture: Fixture) -> anyhow::Result<()> {
        {
            let writer = fixture.store.begin_write()?;
            writer.insert_gid(1, &Gid::generate())?;
            writer.set_cset(CsetLabel::L0, &hid(b"x"))?;
        }

        assert_eq!(fixture.store.next_alias()?, 1);
        assert_eq!(fixture.store.cset(CsetLabel::L0)?, None);
        Ok(())
    }

    #[rstest]
    fn rows_are_written_and_read_back(mut fixture: Fixture) -> anyhow::Result<()> {
        let gid = Gid::generate();
        let root = BaselineRow::new(1, None, "@".to_string(), ItemType::Directory, hid(b"r"), 0);
        let file = BaselineRow::new(2, Some(1), "a.txt".to_string(), ItemType::File, hid(b"a"), 1);
        let mut pending = PendingRow::new(
            2,
            Some(1),
            "b.txt".to_string(),
            ItemType::File,
            PendingFlags::SPARSE,
        );
        pending.sparse_hid = Some(hid(b"a"));
        let mut conflict = Conflict::new(gid.clone(), MergePresence::all());
        conflict.flag(ConflictFacets::NAME);

        let writer = fixture.store.begin_write()?;
        writer.insert_gid(2, &gid)?;
        writer.replace_baseline(&[root.clone(), file.clone()])?;
        writer.upsert_pending(&pending)?;
        writer.set_sparse_fields(2, &hid(b"b"), 1)?;
        writer.set_issue(2, &conflict)?;
        writer.commit()?;

        let store = &fixture.store;
        assert_eq!(store.alias_for_gid(&gid)?, Some(2));
        assert_eq!(store.baseline_root()?, Some(root));
        assert_eq!(store.baseline_children(1)?, vec![file]);
        let read = store.pending_row(2)?.context("pending row")?;
        assert_eq!(read.sparse_hid, Some(hid(b"b")));
        assert_eq!(read.sparse_attrbits, Some(1));
        assert_eq!(store.pending_children(1)?.len(), 1);
        assert_eq!(store.issue(2)?, Some(conflict));
        assert_eq!(store.next_alias()?, 3);
        Ok(())
    }

    #[rstest]
    #[case(BranchPolicy::Validate, "refs/heads/main", Some("main"))]
    #[case(BranchPolicy::Validate, "bad name", None)]
    #[case(BranchPolicy::Legacy, " refs/heads/bad name ", Some("bad name"))]
    fn branch_attach_normalizes_and_validates_per_policy(
        mut fixture: Fixture,
        #[case] policy: BranchPolicy,
        #[case] raw: &str,
        #[case] expected: Option<&str>,
    ) -> anyhow::Result<()> {
        let writer = fixture.store.begin_write()?;
        let attached = writer.attach_branch(raw, policy);
        assert_eq!(attached.is_ok(), expected.is_some());
        writer.commit()?;

        assert_eq!(
            fixture.store.branch()?.map(|name| name.to_string()),
            expected.map(str::to_string)
        );
        Ok(())
    }
}
