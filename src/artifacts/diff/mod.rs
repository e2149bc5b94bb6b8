//! Line diffing
//!
//! - `myers`: Myers' shortest edit script, used by the diff3 content merge

pub mod myers;
