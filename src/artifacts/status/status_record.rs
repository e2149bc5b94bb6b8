use crate::areas::metadata::Alias;
use crate::areas::working_copy::WorkingCopy;
use crate::artifacts::liveview::LiveView;
use crate::artifacts::liveview::status_flags::StatusFlags;
use crate::artifacts::objects::gid::Gid;
use crate::artifacts::objects::object_id::ObjectId;
use std::path::PathBuf;

/// One line of status: where an item is, where it was, and what happened to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub path: PathBuf,
    pub baseline_path: Option<PathBuf>,
    /// `None` for uncontrolled items
    pub gid: Option<Gid>,
    pub alias: Alias,
    pub flags: StatusFlags,
    pub current_hid: Option<ObjectId>,
    pub baseline_hid: Option<ObjectId>,
    pub issue: Option<String>,
}

impl StatusRecord {
    pub fn build(wc: &WorkingCopy, view: &mut LiveView, alias: Alias) -> anyhow::Result<Self> {
        let flags = view.status_flags(wc, alias)?;
        let current_hid = if flags.intersects(StatusFlags::A_LOST | StatusFlags::S_DELETED) {
            None
        } else {
            view.current_hid(wc, alias)?
        };
        let item = view.get(alias)?;

        Ok(StatusRecord {
            path: view.path_of(alias)?,
            baseline_path: view.baseline_path_of(alias)?,
            gid: item.gid.clone(),
            alias,
            flags,
            current_hid,
            baseline_hid: item.baseline.as_ref().map(|row| row.hid.clone()),
            issue: item.issue.as_ref().map(|issue| issue.summary()),
        })
    }

    /// Two-column code: structure/existence first, content second
    pub fn code(&self) -> String {
        let flags = self.flags;
        let first = if flags.contains(StatusFlags::X_UNRESOLVED) {
            'C'
        } else if flags.contains(StatusFlags::A_RESERVED) {
            '#'
        } else if flags.contains(StatusFlags::A_FOUND) {
            '?'
        } else if flags.contains(StatusFlags::A_LOST) {
            '!'
        } else if flags.contains(StatusFlags::S_ADDED) {
            'A'
        } else if flags.contains(StatusFlags::S_DELETED) {
            'D'
        } else if flags.intersects(StatusFlags::S_RENAMED | StatusFlags::S_MOVED) {
            'R'
        } else if flags.contains(StatusFlags::A_SPARSE) {
            'S'
        } else {
            ' '
        };
        let second = if flags.contains(StatusFlags::C_MODIFIED) {
            'M'
        } else if flags.contains(StatusFlags::C_ATTRBITS) {
            'X'
        } else if flags.contains(StatusFlags::X_RESOLVED) {
            'r'
        } else {
            ' '
        };

        format!("{first}{second}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn record(flags: StatusFlags) -> StatusRecord {
        StatusRecord {
            path: PathBuf::from("a.txt"),
            baseline_path: None,
            gid: None,
            alias: 1,
            flags,
            current_hid: None,
            baseline_hid: None,
            issue: None,
        }
    }

    #[rstest]
    #[case::found(StatusFlags::T_FILE | StatusFlags::A_FOUND, "? ")]
    #[case::added(StatusFlags::T_FILE | StatusFlags::S_ADDED, "A ")]
    #[case::renamed_and_modified(
        StatusFlags::T_FILE | StatusFlags::S_RENAMED | StatusFlags::C_MODIFIED,
        "RM"
    )]
    #[case::conflict_wins(
        StatusFlags::T_FILE
            | StatusFlags::C_MODIFIED
            | StatusFlags::X_UNRESOLVED
            | StatusFlags::XU_CONTENTS,
        "CM"
    )]
    #[case::lost(StatusFlags::T_DIRECTORY | StatusFlags::A_LOST, "! ")]
    fn codes_summarize_the_flags(#[case] flags: StatusFlags, #[case] expected: &str) {
        assert_eq!(record(flags).code(), expected);
    }
}
