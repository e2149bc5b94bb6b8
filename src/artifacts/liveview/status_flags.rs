//! Status word of a reconciled item
//!
//! Bits are grouped by concern; the prefix names the group:
//!
//! - `T_`: item type, exactly one is set
//! - `A_`: existence on disk (found, lost, sparse, reserved)
//! - `S_`: structural change against the baseline
//! - `C_`: content change against the baseline
//! - `M_`: which merge snapshots hold the item, while a merge is pending
//! - `L_`: lock state reported by a [`crate::areas::working_copy::LockInspector`]
//! - `X_`/`XU_`: overall conflict state and the unresolved facets

use crate::artifacts::merge::conflict::{Conflict, ConflictFacets, MergePresence};
use crate::artifacts::objects::tree::ItemType;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u64 {
        const T_FILE = 1 << 0;
        const T_DIRECTORY = 1 << 1;
        const T_SYMLINK = 1 << 2;

        const A_FOUND = 1 << 8;
        const A_LOST = 1 << 9;
        const A_SPARSE = 1 << 10;
        const A_RESERVED = 1 << 11;

        const S_ADDED = 1 << 16;
        const S_DELETED = 1 << 17;
        const S_RENAMED = 1 << 18;
        const S_MOVED = 1 << 19;
        const S_MERGE_CREATED = 1 << 20;
        const S_UPDATE_CREATED = 1 << 21;

        const C_MODIFIED = 1 << 24;
        const C_ATTRBITS = 1 << 25;

        const M_ANCESTOR = 1 << 32;
        const M_BASELINE = 1 << 33;
        const M_OTHER = 1 << 34;
        const M_RESULT = 1 << 35;

        const L_LOCKED_BY_USER = 1 << 40;
        const L_LOCKED_BY_OTHER = 1 << 41;
        const L_WAITING = 1 << 42;

        const X_UNRESOLVED = 1 << 48;
        const X_RESOLVED = 1 << 49;
        const XU_EXISTENCE = 1 << 50;
        const XU_NAME = 1 << 51;
        const XU_LOCATION = 1 << 52;
        const XU_ATTRBITS = 1 << 53;
        const XU_CONTENTS = 1 << 54;
        const XU_COLLISION = 1 << 55;

        const TYPE_MASK = Self::T_FILE.bits() | Self::T_DIRECTORY.bits() | Self::T_SYMLINK.bits();
        const STRUCTURE_MASK = Self::S_ADDED.bits()
            | Self::S_DELETED.bits()
            | Self::S_RENAMED.bits()
            | Self::S_MOVED.bits()
            | Self::S_MERGE_CREATED.bits()
            | Self::S_UPDATE_CREATED.bits();
        const CONTENT_MASK = Self::C_MODIFIED.bits() | Self::C_ATTRBITS.bits();
        const UNRESOLVED_MASK = Self::XU_EXISTENCE.bits()
            | Self::XU_NAME.bits()
            | Self::XU_LOCATION.bits()
            | Self::XU_ATTRBITS.bits()
            | Self::XU_CONTENTS.bits()
            | Self::XU_COLLISION.bits();
        const CONFLICT_MASK = Self::X_UNRESOLVED.bits()
            | Self::X_RESOLVED.bits()
            | Self::UNRESOLVED_MASK.bits();
    }
}

impl StatusFlags {
    pub fn for_type(item_type: ItemType) -> Self {
        match item_type {
            ItemType::File => StatusFlags::T_FILE,
            ItemType::Directory => StatusFlags::T_DIRECTORY,
            ItemType::Symlink => StatusFlags::T_SYMLINK,
        }
    }

    /// Conflict bits derived from an open issue
    pub fn for_conflict(conflict: &Conflict) -> Self {
        let mut flags = StatusFlags::empty();
        let presence = [
            (MergePresence::ANCESTOR, StatusFlags::M_ANCESTOR),
            (MergePresence::BASELINE, StatusFlags::M_BASELINE),
            (MergePresence::OTHER, StatusFlags::M_OTHER),
            (MergePresence::RESULT, StatusFlags::M_RESULT),
        ];
        for (bit, flag) in presence {
            flags.set(flag, conflict.presence.contains(bit));
        }

        let facets = [
            (ConflictFacets::EXISTENCE, StatusFlags::XU_EXISTENCE),
            (ConflictFacets::NAME, StatusFlags::XU_NAME),
            (ConflictFacets::LOCATION, StatusFlags::XU_LOCATION),
            (ConflictFacets::ATTRBITS, StatusFlags::XU_ATTRBITS),
            (ConflictFacets::CONTENTS, StatusFlags::XU_CONTENTS),
            (ConflictFacets::COLLISION, StatusFlags::XU_COLLISION),
        ];
        for (facet, flag) in facets {
            flags.set(flag, conflict.unresolved.contains(facet));
        }

        if conflict.is_resolved() {
            flags | StatusFlags::X_RESOLVED
        } else {
            flags | StatusFlags::X_UNRESOLVED
        }
    }

    /// Anything beyond the type bits worth reporting
    pub fn is_interesting(&self) -> bool {
        !self.difference(StatusFlags::TYPE_MASK).is_empty()
    }

    /// Check the mutual-exclusion rules between groups
    pub fn validate(&self) -> anyhow::Result<()> {
        let violated = |rule: &str| -> anyhow::Result<()> {
            anyhow::bail!("inconsistent status {self:?}: {rule}")
        };

        if self.intersection(StatusFlags::TYPE_MASK).bits().count_ones() != 1 {
            return violated("exactly one type bit must be set");
        }
        if self.contains(StatusFlags::S_ADDED)
            && self.intersects(StatusFlags::S_DELETED | StatusFlags::S_RENAMED | StatusFlags::S_MOVED)
        {
            return violated("an added item cannot be deleted, renamed or moved");
        }
        if self.contains(StatusFlags::S_DELETED)
            && self.intersects(StatusFlags::A_LOST | StatusFlags::CONTENT_MASK)
        {
            return violated("a deleted item cannot be lost or modified");
        }
        if self.intersects(StatusFlags::S_MERGE_CREATED | StatusFlags::S_UPDATE_CREATED)
            && !self.contains(StatusFlags::S_ADDED)
        {
            return violated("merge- and update-created items are added items");
        }
        if self.contains(StatusFlags::A_FOUND)
            && self.intersects(
                StatusFlags::STRUCTURE_MASK | StatusFlags::CONTENT_MASK | StatusFlags::CONFLICT_MASK,
            )
        {
            return violated("an uncontrolled item has no changes or conflicts");
        }
        if self.contains(StatusFlags::A_SPARSE) && self.contains(StatusFlags::A_LOST) {
            return violated("a sparse item cannot be lost");
        }
        if self.contains(StatusFlags::X_RESOLVED) && self.contains(StatusFlags::X_UNRESOLVED) {
            return violated("resolved and unresolved are exclusive");
        }
        if self.intersects(StatusFlags::UNRESOLVED_MASK) && !self.contains(StatusFlags::X_UNRESOLVED)
        {
            return violated("unresolved facets require the unresolved bit");
        }
        if self.contains(StatusFlags::X_UNRESOLVED) && !self.intersects(StatusFlags::UNRESOLVED_MASK)
        {
            return violated("an unresolved item needs at least one unresolved facet");
        }

        Ok(())
    }

    /// Short labels for the set change bits, for display
    pub fn labels(&self) -> Vec<&'static str> {
        [
            (StatusFlags::S_ADDED, "added"),
            (StatusFlags::S_DELETED, "deleted"),
            (StatusFlags::S_RENAMED, "renamed"),
            (StatusFlags::S_MOVED, "moved"),
            (StatusFlags::S_MERGE_CREATED, "merge-created"),
            (StatusFlags::S_UPDATE_CREATED, "update-created"),
            (StatusFlags::C_MODIFIED, "modified"),
            (StatusFlags::C_ATTRBITS, "attributes"),
            (StatusFlags::A_FOUND, "found"),
            (StatusFlags::A_LOST, "lost"),
            (StatusFlags::A_SPARSE, "sparse"),
            (StatusFlags::A_RESERVED, "reserved"),
            (StatusFlags::X_UNRESOLVED, "unresolved"),
            (StatusFlags::X_RESOLVED, "resolved"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, label)| label)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::gid::Gid;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(StatusFlags::T_FILE | StatusFlags::S_ADDED)]
    #[case(StatusFlags::T_FILE | StatusFlags::S_RENAMED | StatusFlags::S_MOVED | StatusFlags::C_MODIFIED)]
    #[case(StatusFlags::T_DIRECTORY | StatusFlags::S_ADDED | StatusFlags::S_MERGE_CREATED)]
    #[case(StatusFlags::T_SYMLINK | StatusFlags::A_FOUND)]
    #[case(StatusFlags::T_FILE | StatusFlags::A_SPARSE | StatusFlags::S_MOVED)]
    #[case(StatusFlags::T_FILE | StatusFlags::X_UNRESOLVED | StatusFlags::XU_CONTENTS)]
    fn consistent_words_validate(#[case] flags: StatusFlags) {
        assert!(flags.validate().is_ok());
    }

    #[rstest]
    #[case(StatusFlags::S_ADDED)]
    #[case(StatusFlags::T_FILE | StatusFlags::T_DIRECTORY)]
    #[case(StatusFlags::T_FILE | StatusFlags::S_ADDED | StatusFlags::S_DELETED)]
    #[case(StatusFlags::T_FILE | StatusFlags::S_DELETED | StatusFlags::A_LOST)]
    #[case(StatusFlags::T_FILE | StatusFlags::S_DELETED | StatusFlags::C_MODIFIED)]
    #[case(StatusFlags::T_FILE | StatusFlags::S_UPDATE_CREATED)]
    #[case(StatusFlags::T_FILE | StatusFlags::A_FOUND | StatusFlags::C_MODIFIED)]
    #[case(StatusFlags::T_FILE | StatusFlags::A_SPARSE | StatusFlags::A_LOST)]
    #[case(StatusFlags::T_FILE | StatusFlags::X_RESOLVED | StatusFlags::X_UNRESOLVED | StatusFlags::XU_NAME)]
    #[case(StatusFlags::T_FILE | StatusFlags::X_UNRESOLVED)]
    #[case(StatusFlags::T_FILE | StatusFlags::XU_NAME)]
    fn inconsistent_words_are_rejected(#[case] flags: StatusFlags) {
        assert!(flags.validate().is_err());
    }

    #[test]
    fn conflict_bits_follow_the_unresolved_facets() {
        let mut conflict = Conflict::new(
            Gid::generate(),
            MergePresence::BASELINE | MergePresence::OTHER | MergePresence::RESULT,
        );
        conflict.flag(ConflictFacets::CONTENTS);

        let flags = StatusFlags::for_conflict(&conflict);
        assert_eq!(
            flags,
            StatusFlags::M_BASELINE
                | StatusFlags::M_OTHER
                | StatusFlags::M_RESULT
                | StatusFlags::X_UNRESOLVED
                | StatusFlags::XU_CONTENTS
        );

        conflict.resolve_all();
        assert!(StatusFlags::for_conflict(&conflict).contains(StatusFlags::X_RESOLVED));
    }
}
