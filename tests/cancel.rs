mod common;

use common::session::{Sandbox, baseline, commit_files, paths, sandbox, status, write};
use grove::areas::working_copy::WorkingCopy;
use grove::areas::workspace::METADATA_DIR;
use grove::artifacts::branch::branch_name::BranchPolicy;
use grove::error::{WcError, WcErrorKind};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

type Verb = fn(&mut WorkingCopy) -> anyhow::Result<()>;

/// Every file and directory below the root, metadata left out; directories map to `None`
fn disk(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.depth() > 1 || entry.file_name() != METADATA_DIR)
        .map(|entry| {
            let entry = entry.expect("Failed to walk the working copy");
            let path = entry
                .path()
                .strip_prefix(root)
                .expect("walked outside the root")
                .display()
                .to_string();
            let content = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read(entry.path()).expect("Failed to read file"));
            (path, content)
        })
        .collect()
}

/// `main` has committed, pending-free history diverging from `feature`, plus uncontrolled files
fn prepared(sandbox: &Sandbox) -> WorkingCopy {
    let mut main = sandbox.checkout("main");
    commit_files(
        &mut main,
        &[("a.txt", "a\n"), ("b.txt", "b\n"), ("dir/c.txt", "c\n")],
        "shared history",
    );
    let mut side = sandbox.checkout("side");
    side.attach_branch("feature", BranchPolicy::Validate).unwrap();
    commit_files(&mut side, &[("a.txt", "a side\n"), ("e.txt", "e\n")], "feature work");
    commit_files(&mut main, &[("a.txt", "a main\n")], "master work");
    write(&main, "new.txt", "new\n");
    write(&main, "newdir/f.txt", "f\n");
    main
}

fn add_new(wc: &mut WorkingCopy) -> anyhow::Result<()> {
    wc.add(&paths(&["new.txt", "newdir"])).map(drop)
}

fn move_into_dir(wc: &mut WorkingCopy) -> anyhow::Result<()> {
    wc.move_items(&paths(&["a.txt", "b.txt"]), Path::new("dir"))
        .map(drop)
}

fn rename_in_place(wc: &mut WorkingCopy) -> anyhow::Result<()> {
    wc.rename(Path::new("dir/c.txt"), "d.txt").map(drop)
}

fn remove_items(wc: &mut WorkingCopy) -> anyhow::Result<()> {
    wc.remove(&paths(&["b.txt", "dir"]), false, false).map(drop)
}

fn merge_feature(wc: &mut WorkingCopy) -> anyhow::Result<()> {
    wc.merge("feature", false, false).map(drop)
}

#[rstest]
#[case::add(add_new as Verb)]
#[case::move_items(move_into_dir as Verb)]
#[case::rename(rename_in_place as Verb)]
#[case::remove(remove_items as Verb)]
#[case::merge(merge_feature as Verb)]
fn cancelling_at_any_poll_leaves_the_working_copy_untouched(
    sandbox: Sandbox,
    #[case] verb: Verb,
) {
    let mut wc = prepared(&sandbox);
    let disk_before = disk(wc.root());
    let status_before = status(&mut wc);
    let baseline_before = baseline(&wc);
    let merge_scratch = wc.root().join(METADATA_DIR).join("tmp").join("merge");

    let mut allowed_polls = 0;
    loop {
        let counter = Cell::new(0usize);
        wc.set_cancel_check(move || {
            counter.set(counter.get() + 1);
            counter.get() > allowed_polls
        });
        let result = verb(&mut wc);
        wc.set_cancel_check(|| false);

        let Err(error) = result else {
            break;
        };
        assert_eq!(WcError::kind(&error), Some(WcErrorKind::Cancelled));
        assert_eq!(disk(wc.root()), disk_before);
        assert_eq!(status(&mut wc), status_before);
        assert_eq!(baseline(&wc), baseline_before);
        assert!(!merge_scratch.exists());

        allowed_polls += 1;
        assert!(allowed_polls < 1000, "the verb never got past its cancel checks");
    }

    assert!(allowed_polls > 0);
    assert_ne!(status(&mut wc), status_before);
}
