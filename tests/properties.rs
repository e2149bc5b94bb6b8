mod common;

use common::session::{commit_files, entry_at, paths, read, sandbox, status, write};
use grove::commands::porcelain::revert::RevertFilters;
use grove::error::{WcError, WcErrorKind};
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

const FILES: [&str; 4] = ["a.txt", "b.txt", "dir/c.txt", "dir/sub/d.txt"];

fn originals() -> Vec<(&'static str, &'static str)> {
    FILES.iter().map(|path| (*path, "original\n")).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn partial_commit_takes_exactly_the_selection(
        edited in prop::collection::btree_set(0..FILES.len(), 1..=FILES.len()),
        picked in prop::collection::btree_set(0..FILES.len(), 1..=FILES.len()),
    ) {
        let sandbox = sandbox();
        let mut wc = sandbox.checkout("wc");
        let first = commit_files(&mut wc, &originals(), "setup");
        for index in &edited {
            write(&wc, FILES[*index], "edited\n");
        }
        let committed = edited.intersection(&picked).copied().collect::<BTreeSet<_>>();
        let selection = picked.iter().map(|index| FILES[*index]).collect::<Vec<_>>();

        let result = wc.commit(Some(&paths(&selection)), "partial", None);

        if committed.is_empty() {
            prop_assert!(result.is_err());
            return Ok(());
        }
        let second = result.unwrap();
        let old = sandbox.tree(&first);
        let new = sandbox.tree(&second);
        for (index, path) in FILES.iter().enumerate() {
            let changed = entry_at(&old, path).unwrap().oid != entry_at(&new, path).unwrap().oid;
            prop_assert_eq!(changed, committed.contains(&index));
        }
        let pending = status(&mut wc)
            .into_iter()
            .map(|(_, path)| path)
            .collect::<BTreeSet<_>>();
        let expected = edited
            .difference(&committed)
            .map(|index| FILES[*index].to_string())
            .collect::<BTreeSet<_>>();
        prop_assert_eq!(pending, expected);
    }

    #[test]
    fn full_revert_restores_every_file(
        edited in prop::collection::btree_set(0..FILES.len(), 0..=FILES.len()),
        lost in prop::collection::btree_set(0..FILES.len(), 0..=FILES.len()),
    ) {
        let sandbox = sandbox();
        let mut wc = sandbox.checkout("wc");
        commit_files(&mut wc, &originals(), "setup");
        for index in &edited {
            write(&wc, FILES[*index], "edited\n");
        }
        for index in &lost {
            std::fs::remove_file(wc.root().join(FILES[*index])).unwrap();
        }

        wc.revert(None, RevertFilters::all()).unwrap();

        for path in FILES {
            prop_assert_eq!(read(&wc, path), "original\n");
        }
        let leftovers = status(&mut wc);
        prop_assert!(leftovers.iter().all(|(code, path)| code == "? " && path.ends_with("~grove00~")));
        let backups = edited.difference(&lost).count();
        prop_assert_eq!(leftovers.len(), backups);
    }

    #[test]
    fn cancelled_revert_changes_nothing(
        edited in prop::collection::btree_set(0..FILES.len(), 1..=FILES.len()),
        allowed_polls in 0usize..6,
    ) {
        let sandbox = sandbox();
        let mut wc = sandbox.checkout("wc");
        commit_files(&mut wc, &originals(), "setup");
        for index in &edited {
            write(&wc, FILES[*index], "edited\n");
        }
        wc.rename(std::path::Path::new("a.txt"), "renamed.txt").unwrap();
        let before = status(&mut wc);

        let polls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&polls);
        wc.set_cancel_check(move || {
            counter.set(counter.get() + 1);
            counter.get() > allowed_polls
        });
        let result = wc.revert(None, RevertFilters::all());
        wc.set_cancel_check(|| false);

        if let Err(error) = result {
            prop_assert_eq!(WcError::kind(&error), Some(WcErrorKind::Cancelled));
            prop_assert_eq!(status(&mut wc), before);
            prop_assert!(!wc.root().join("a.txt").exists());
            for index in &edited {
                let path = match FILES[*index] {
                    "a.txt" => "renamed.txt",
                    other => other,
                };
                prop_assert_eq!(read(&wc, path), "edited\n");
            }
        }
    }
}
