//! Three-way merge
//!
//! - `bca_finder`: best common ancestor of two changesets
//! - `engine`: tree-level merge of three flat snapshots
//! - `conflict`: conflict records persisted as issues
//! - `diff3`: line-level merge of file contents
//! - `tool`: built-in and external merge tools and rule-based selection
//! - `auto_merge`: runs the selected tool for every divergent file

pub mod auto_merge;
pub mod bca_finder;
pub mod conflict;
pub mod diff3;
pub mod engine;
pub mod tool;
