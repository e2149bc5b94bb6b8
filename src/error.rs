//! Typed error taxonomy for working-copy operations
//!
//! Every fallible function in the crate returns `anyhow::Result`. When a caller needs to branch on
//! the *kind* of failure (a partial commit that must be widened, a sparse item that must be
//! populated first, ...) the failure is raised as a [`WcError`] and wrapped with context naming
//! the repo-path. [`WcError::kind`] digs the typed error back out of the chain.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WcError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {path} is occupied by {blocker}")]
    AlreadyExists { path: PathBuf, blocker: String },

    #[error("sparse item: {path} is not populated on disk ({reason})")]
    Sparse { path: PathBuf, reason: String },

    #[error("reserved name: {0}")]
    Reserved(PathBuf),

    #[error("partial commit conflict on {path}: {reason}")]
    PartialCommitConflict { path: PathBuf, reason: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("portability collision in {dir}: '{name}' collides with '{other}' ({rule})")]
    PortabilityCollision {
        dir: PathBuf,
        name: String,
        other: String,
        rule: String,
    },

    #[error("invalid entryname '{name}': {reason}")]
    InvalidEntryname { name: String, reason: String },

    #[error("working copy is dirty: {0} has local changes")]
    Dirty(PathBuf),

    #[error("unresolved conflict on {0}")]
    Unresolved(PathBuf),

    #[error("operation cancelled")]
    Cancelled,
}

/// Discriminant of [`WcError`] used by callers and tests to branch on failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WcErrorKind {
    NotFound,
    AlreadyExists,
    Sparse,
    Reserved,
    PartialCommitConflict,
    Unsupported,
    Integrity,
    PortabilityCollision,
    InvalidEntryname,
    Dirty,
    Unresolved,
    Cancelled,
}

impl WcError {
    pub fn as_kind(&self) -> WcErrorKind {
        match self {
            WcError::NotFound(_) => WcErrorKind::NotFound,
            WcError::AlreadyExists { .. } => WcErrorKind::AlreadyExists,
            WcError::Sparse { .. } => WcErrorKind::Sparse,
            WcError::Reserved(_) => WcErrorKind::Reserved,
            WcError::PartialCommitConflict { .. } => WcErrorKind::PartialCommitConflict,
            WcError::Unsupported(_) => WcErrorKind::Unsupported,
            WcError::Integrity { .. } => WcErrorKind::Integrity,
            WcError::PortabilityCollision { .. } => WcErrorKind::PortabilityCollision,
            WcError::InvalidEntryname { .. } => WcErrorKind::InvalidEntryname,
            WcError::Dirty(_) => WcErrorKind::Dirty,
            WcError::Unresolved(_) => WcErrorKind::Unresolved,
            WcError::Cancelled => WcErrorKind::Cancelled,
        }
    }

    /// Find the first typed working-copy error in an `anyhow` chain
    ///
    /// # Returns
    ///
    /// The kind of the innermost [`WcError`] wrapped by `error`, or `None` for plain I/O, SQL and
    /// other untyped failures.
    pub fn kind(error: &anyhow::Error) -> Option<WcErrorKind> {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<WcError>())
            .map(WcError::as_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_is_found_through_context_layers() {
        let result: anyhow::Result<()> = Err(WcError::Reserved(PathBuf::from(".grove")).into());
        let error = result
            .context("while adding .grove")
            .context("add failed")
            .unwrap_err();

        assert_eq!(WcError::kind(&error), Some(WcErrorKind::Reserved));
    }

    #[test]
    fn untyped_errors_have_no_kind() {
        let error = anyhow::anyhow!("disk on fire");

        assert_eq!(WcError::kind(&error), None);
    }
}
