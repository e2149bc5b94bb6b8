//! Immutable, content-addressed objects
//!
//! Everything the object store holds is identified by the SHA-1 of its serialized form:
//!
//! - **Blob**: raw file (or symlink target) bytes
//! - **Tree**: one directory listing; each entry carries the item's gid, type, attribute bits,
//!   name and the id of the child object
//! - **Changeset**: a snapshot pointing at a super-root tree, its parents, author and message
//!
//! All objects share the `<type> <size>\0<content>` envelope.

pub mod blob;
pub mod changeset;
pub mod flat_tree;
pub mod gid;
pub mod object;
pub mod object_id;
pub mod object_type;
pub mod tree;

/// Length of a SHA-1 hash in hexadecimal format
pub const OBJECT_ID_LENGTH: usize = 40;
