//! grove: the working-copy engine of a distributed version-control system
//!
//! A working copy is a checked-out tree plus a metadata store (`.grove/wc.db`) describing how
//! it relates to its baseline changeset. Verbs on [`WorkingCopy`](areas::working_copy::WorkingCopy)
//! reconcile the metadata with the disk through a transaction-scoped liveview, queue journal
//! steps, and apply them in one metadata transaction.
//!
//! - `areas`: stores (objects, refs, metadata) and the session types
//! - `artifacts`: data structures and algorithms (liveview, journal, merge, commit, ...)
//! - `commands`: the verbs
//! - `config`: `.grove/config.toml`
//! - `error`: typed errors callers can branch on
//! - `logging`: subscriber setup for the binary

pub mod areas;
pub mod artifacts;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
