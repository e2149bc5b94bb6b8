//! Stores and session state
//!
//! - `database`: content-addressed object store
//! - `refs`: branch heads
//! - `repository`: the repository a working copy is checked out from
//! - `metadata`: the working copy's SQLite metadata (baseline, pending changes, issues, ...)
//! - `workspace`: file system access below the working-copy root
//! - `working_copy`: an open working copy and its configuration
//! - `transaction`: the queue/apply session every verb runs in

pub mod database;
pub mod metadata;
pub mod refs;
pub mod repository;
pub mod transaction;
pub mod working_copy;
pub mod workspace;
