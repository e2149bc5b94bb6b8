//! Verbs on a working copy
//!
//! Every verb is an inherent method on [`WorkingCopy`](crate::areas::working_copy::WorkingCopy)
//! that opens a transaction, reads the liveview, queues journal steps and applies them at the
//! end. A verb that fails before `apply` leaves the working tree and the metadata untouched.
//!
//! ## Verbs
//!
//! - `checkout`: create a working copy of a changeset, optionally sparse
//! - `status`: report changed, lost, found and conflicted items
//! - `add`, `remove`, `move_rename`: structural edits
//! - `commit`: record pending changes (all or a selection) as a new changeset
//! - `update`: move the baseline to another changeset, carrying pending changes over
//! - `merge`: three-way merge of another changeset into the working copy
//! - `revert`: undo pending changes, by kind
//! - `resolve`: settle conflicts left by a merge
//! - `branch`: attach to or detach from a branch

pub mod add;
pub mod branch;
pub mod checkout;
pub mod commit;
pub mod merge;
pub mod move_rename;
pub mod remove;
pub mod resolve;
pub mod revert;
pub mod status;
pub mod update;
