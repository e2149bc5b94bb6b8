//! Transaction journal
//!
//! - `step`: the journal step enum
//! - `apply`: executes steps against the working tree and the metadata writer
//! - `transition`: plans the steps moving the working copy between two snapshots

pub mod apply;
pub mod step;
pub mod transition;
