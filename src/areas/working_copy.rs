//! Working-copy session
//!
//! A [`WorkingCopy`] ties together everything one checkout needs: the workspace on disk, the
//! metadata store in `.grove/wc.db`, the repository it was checked out from and the parsed
//! configuration. Verbs are methods on the session (see `commands::porcelain`); each verb opens a
//! [`WcTx`], queues its journal and applies it.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! └── .grove/
//!     ├── wc.db            metadata store
//!     ├── config.toml      working-copy configuration
//!     ├── lock             held exclusively while a journal is applied
//!     └── tmp/
//!         ├── park/<alias> items in flight between two locations
//!         └── merge/<gid>/ ancestor, baseline, other and result of a content merge
//! ```

use crate::areas::metadata::{MetadataRead, MetadataStore};
use crate::areas::repository::Repository;
use crate::areas::transaction::WcTx;
use crate::areas::workspace::{METADATA_DIR, Workspace};
use crate::artifacts::liveview::status_flags::StatusFlags;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::portability::PortabilityFlags;
use crate::config::WcConfig;
use crate::error::WcError;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DATABASE_FILE: &str = "wc.db";
pub const CONFIG_FILE: &str = "config.toml";
pub const LOCK_FILE: &str = "lock";
const TMP_DIR: &str = "tmp";
const PARK_DIR: &str = "park";
const MERGE_DIR: &str = "merge";

/// Source of the lock bits in status records
///
/// Distributed locks live on a server this crate does not talk to; a session reports no locks
/// unless an inspector is installed.
pub trait LockInspector {
    fn lock_flags(&self, gid: &Gid, path: &Path) -> StatusFlags;
}

#[derive(Debug, Default)]
pub struct NoLocks;

impl LockInspector for NoLocks {
    fn lock_flags(&self, _gid: &Gid, _path: &Path) -> StatusFlags {
        StatusFlags::empty()
    }
}

type CancelCheck = Box<dyn Fn() -> bool>;

pub struct WorkingCopy {
    root: Box<Path>,
    workspace: Workspace,
    metadata: MetadataStore,
    repository: Repository,
    config: WcConfig,
    portability: PortabilityFlags,
    cancel_check: Option<CancelCheck>,
    lock_inspector: Box<dyn LockInspector>,
}

impl std::fmt::Debug for WorkingCopy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingCopy")
            .field("root", &self.root)
            .field("repository", &self.repository.path())
            .finish_non_exhaustive()
    }
}

impl WorkingCopy {
    /// Open the working copy rooted exactly at `root`
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("working copy {} does not exist", root.display()))?;
        let metadata_dir = root.join(METADATA_DIR);
        let db_path = metadata_dir.join(DATABASE_FILE);
        if !db_path.is_file() {
            return Err(WcError::NotFound(format!("working copy at {}", root.display())).into());
        }

        let metadata = MetadataStore::open(&db_path)?;
        let repo_path = metadata
            .repo_path()?
            .context("metadata store does not record its repository")?;
        let repository = Repository::open(&repo_path)?;
        let config = WcConfig::load(&metadata_dir.join(CONFIG_FILE))?;

        debug!(root = %root.display(), repo = %repo_path.display(), "opened working copy");
        Ok(WorkingCopy {
            workspace: Workspace::new(root.clone().into_boxed_path()),
            root: root.into_boxed_path(),
            portability: config.portability.flags()?,
            metadata,
            repository,
            config,
            cancel_check: None,
            lock_inspector: Box::new(NoLocks),
        })
    }

    /// Open the working copy containing `start`, walking up parent directories
    pub fn find(start: &Path) -> anyhow::Result<Self> {
        let start = start
            .canonicalize()
            .with_context(|| format!("{} does not exist", start.display()))?;

        start
            .ancestors()
            .find(|dir| dir.join(METADATA_DIR).join(DATABASE_FILE).is_file())
            .map(Self::open)
            .unwrap_or_else(|| {
                Err(WcError::NotFound(format!(
                    "no working copy contains {}",
                    start.display()
                ))
                .into())
            })
    }

    /// Lay down an empty metadata directory for a new checkout
    pub(crate) fn create(root: &Path, repository: &Repository) -> anyhow::Result<Self> {
        let metadata_dir = root.join(METADATA_DIR);
        std::fs::create_dir_all(metadata_dir.join(TMP_DIR))
            .with_context(|| format!("failed to create {}", metadata_dir.display()))?;

        MetadataStore::create(&metadata_dir.join(DATABASE_FILE), repository.path())?;
        let config_path = metadata_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            WcConfig::default().save(&config_path)?;
        }

        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn config(&self) -> &WcConfig {
        &self.config
    }

    pub fn portability(&self) -> PortabilityFlags {
        self.portability
    }

    pub fn lock_inspector(&self) -> &dyn LockInspector {
        self.lock_inspector.as_ref()
    }

    pub fn set_lock_inspector(&mut self, inspector: Box<dyn LockInspector>) {
        self.lock_inspector = inspector;
    }

    /// Install a predicate polled between top-level items of long walks
    pub fn set_cancel_check(&mut self, check: impl Fn() -> bool + 'static) {
        self.cancel_check = Some(Box::new(check));
    }

    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        match &self.cancel_check {
            Some(check) if check() => Err(WcError::Cancelled.into()),
            _ => Ok(()),
        }
    }

    /// Metadata directory, relative to the root
    pub fn metadata_dir(&self) -> PathBuf {
        PathBuf::from(METADATA_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(METADATA_DIR).join(LOCK_FILE)
    }

    /// Parking area, relative to the root
    pub fn park_dir(&self) -> PathBuf {
        self.metadata_dir().join(TMP_DIR).join(PARK_DIR)
    }

    /// Scratch directory for the content merge of one item, relative to the root
    pub fn merge_dir(&self, gid: &Gid) -> PathBuf {
        self.metadata_dir()
            .join(TMP_DIR)
            .join(MERGE_DIR)
            .join(gid.as_ref())
    }

    /// Convert a user-supplied path (absolute or relative to the current directory) into a
    /// repo path relative to the root
    pub fn repo_path(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let absolute = normalize(&absolute);

        absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| {
                WcError::NotFound(format!(
                    "{} is outside the working copy {}",
                    path.display(),
                    self.root.display()
                ))
                .into()
            })
    }

    /// Disjoint borrows needed while a journal is applied
    pub(crate) fn apply_parts(&mut self) -> (&Workspace, &Repository, &mut MetadataStore) {
        (&self.workspace, &self.repository, &mut self.metadata)
    }

    /// Start a transaction; nothing touches disk or metadata until it is applied
    pub fn begin(&mut self) -> anyhow::Result<WcTx<'_>> {
        WcTx::new(self)
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    // the root itself may be reached through a symlinked prefix
    match (normalized.parent(), normalized.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or(normalized),
        _ => normalized.canonicalize().unwrap_or(normalized),
    }
}
