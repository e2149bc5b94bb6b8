//! Data structures and algorithms of the working-copy engine
//!
//! - `branch`: branch names and revision parsing
//! - `commit`: partial-commit selection and tree synthesis
//! - `diff`: Myers' line diff
//! - `journal`: journal steps, their application and transition planning
//! - `liveview`: reconciliation of the metadata with the working tree
//! - `merge`: tree merge, content merge and merge tools
//! - `objects`: immutable object types (blob, tree, changeset) and gid-space snapshots
//! - `portability`: name collision rules across filesystems
//! - `status`: status records reported by the verbs

pub mod branch;
pub mod commit;
pub mod diff;
pub mod journal;
pub mod liveview;
pub mod merge;
pub mod objects;
pub mod portability;
pub mod status;
