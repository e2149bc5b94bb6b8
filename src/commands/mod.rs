//! Working-copy verbs
//!
//! - `porcelain`: the user-facing operations (checkout, commit, update, merge, ...)

pub mod porcelain;
