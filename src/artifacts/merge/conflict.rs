//! Merge conflict records
//!
//! A [`Conflict`] is attached to every item whose three-way merge could not be decided by the
//! per-facet rule alone. It is persisted as JSON in the metadata store (`tbl_issue`) so that the
//! conflict survives until it is resolved, reverted or committed.
//!
//! ## Content state machine
//!
//! ```text
//! Pending ──► AutoClean
//!        ├──► AutoWithMarkers
//!        ├──► ToolError
//!        └──► NoRule
//! ```
//!
//! Once a terminal state is reached it never changes again.

use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

bitflags! {
    /// The aspects of an item that diverged between baseline and other
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ConflictFacets: u32 {
        const EXISTENCE = 1 << 0;
        const NAME = 1 << 1;
        const LOCATION = 1 << 2;
        const ATTRBITS = 1 << 3;
        const CONTENTS = 1 << 4;
        const COLLISION = 1 << 5;
    }
}

bitflags! {
    /// Which of the four merge snapshots contain the item
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MergePresence: u8 {
        const ANCESTOR = 1 << 0;
        const BASELINE = 1 << 1;
        const OTHER = 1 << 2;
        const RESULT = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictStatus {
    #[default]
    Pending,
    AutoClean,
    AutoWithMarkers,
    ToolError,
    NoRule,
}

impl ConflictStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConflictStatus::Pending)
    }
}

impl std::fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConflictStatus::Pending => "pending",
            ConflictStatus::AutoClean => "auto-merged",
            ConflictStatus::AutoWithMarkers => "auto-merged with markers",
            ConflictStatus::ToolError => "merge tool failed",
            ConflictStatus::NoRule => "no merge rule",
        };
        write!(f, "{label}")
    }
}

/// Object ids of the three merge inputs for a content conflict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictHids {
    pub ancestor: Option<ObjectId>,
    pub baseline: Option<ObjectId>,
    pub other: Option<ObjectId>,
}

/// Temp files prepared for the merge tool, under `.grove/tmp/merge/<gid>/`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPaths {
    pub ancestor: Option<PathBuf>,
    pub baseline: Option<PathBuf>,
    pub other: Option<PathBuf>,
    pub result: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub gid: Gid,
    /// Every facet that diverged
    pub facets: ConflictFacets,
    /// Facets still awaiting a decision; always a subset of `facets`
    pub unresolved: ConflictFacets,
    pub presence: MergePresence,
    pub status: ConflictStatus,
    pub hids: ConflictHids,
    pub paths: ConflictPaths,
    pub tool: Option<String>,
    pub result_hid: Option<ObjectId>,
    /// The merge result can be regenerated without user input
    pub disposable: bool,
    /// Original entryname when the item was renamed to settle a collision
    pub collided_name: Option<String>,
}

impl Conflict {
    pub fn new(gid: Gid, presence: MergePresence) -> Self {
        Conflict {
            gid,
            facets: ConflictFacets::empty(),
            unresolved: ConflictFacets::empty(),
            presence,
            status: ConflictStatus::Pending,
            hids: ConflictHids::default(),
            paths: ConflictPaths::default(),
            tool: None,
            result_hid: None,
            disposable: false,
            collided_name: None,
        }
    }

    /// Record a facet that needs the user's attention
    pub fn flag(&mut self, facet: ConflictFacets) {
        self.facets |= facet;
        self.unresolved |= facet;
    }

    pub fn resolve_facet(&mut self, facet: ConflictFacets) {
        self.unresolved.remove(facet);
    }

    pub fn resolve_all(&mut self) {
        self.unresolved = ConflictFacets::empty();
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Move the content state machine out of `Pending`
    ///
    /// A terminal status is never overwritten.
    pub fn settle(&mut self, status: ConflictStatus) -> anyhow::Result<()> {
        if self.status.is_terminal() {
            anyhow::bail!(
                "conflict on {} already settled as {}, cannot become {}",
                self.gid,
                self.status,
                status
            );
        }

        self.status = status;
        if status == ConflictStatus::AutoClean {
            self.resolve_facet(ConflictFacets::CONTENTS);
        }
        Ok(())
    }

    /// One-line description used by status records
    pub fn summary(&self) -> String {
        let facets = self
            .unresolved
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect::<Vec<_>>();

        if facets.is_empty() {
            format!("resolved ({})", self.status)
        } else {
            format!("unresolved: {} ({})", facets.join(", "), self.status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn clean_auto_merge_resolves_the_contents_facet() -> anyhow::Result<()> {
        let mut conflict = Conflict::new(Gid::generate(), MergePresence::BASELINE);
        conflict.flag(ConflictFacets::CONTENTS);
        conflict.flag(ConflictFacets::NAME);

        conflict.settle(ConflictStatus::AutoClean)?;

        assert_eq!(conflict.unresolved, ConflictFacets::NAME);
        assert_eq!(conflict.facets, ConflictFacets::CONTENTS | ConflictFacets::NAME);
        assert!(!conflict.is_resolved());
        Ok(())
    }

    #[test]
    fn terminal_states_are_final() {
        let mut conflict = Conflict::new(Gid::generate(), MergePresence::all());
        conflict.flag(ConflictFacets::CONTENTS);

        conflict.settle(ConflictStatus::ToolError).unwrap();

        assert!(conflict.settle(ConflictStatus::AutoClean).is_err());
        assert_eq!(conflict.status, ConflictStatus::ToolError);
    }

    #[test]
    fn conflicts_survive_json_persistence() -> anyhow::Result<()> {
        let mut conflict = Conflict::new(
            Gid::generate(),
            MergePresence::BASELINE | MergePresence::OTHER | MergePresence::RESULT,
        );
        conflict.flag(ConflictFacets::COLLISION);
        conflict.collided_name = Some("x.txt".to_string());

        let json = serde_json::to_string(&conflict)?;

        assert_eq!(serde_json::from_str::<Conflict>(&json)?, conflict);
        Ok(())
    }
}
