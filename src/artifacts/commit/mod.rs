//! Commit engine
//!
//! A commit takes some or all of the pending changes and turns them into immutable tree objects.
//!
//! ## Partial commits
//!
//! Only the selected changes go into the new snapshot; everything else keeps its baseline state
//! and stays pending afterwards. Directories on the path from a selected item to the root get new
//! tree hashes ("bubble-up") even though they were not selected themselves. A selection that would
//! produce a snapshot no checkout could reproduce (an added file without its added parent, a
//! deleted directory whose deleted children stay behind) is rejected before anything is stored.

pub mod selection;
pub mod synthesis;
