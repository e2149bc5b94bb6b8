mod common;

use common::error_kind;
use common::session::{
    Sandbox, baseline, commit_files, entry_at, paths, read, sandbox, status, write,
};
use grove::areas::database::ObjectStore;
use grove::areas::metadata::MetadataRead;
use grove::artifacts::commit::selection::{self, Scope};
use grove::artifacts::commit::synthesis;
use grove::artifacts::branch::branch_name::BranchName;
use grove::artifacts::journal::step::JournalStep;
use grove::error::WcErrorKind;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::cell::Cell;
use std::path::PathBuf;

fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(code, path)| (code.to_string(), path.to_string()))
        .collect()
}

#[rstest]
fn commit_moves_the_baseline_and_the_branch(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    let before = baseline(&wc);

    let changeset = commit_files(&mut wc, &[("a.txt", "alpha\n")], "add a");

    assert_ne!(changeset, before);
    assert_eq!(baseline(&wc), changeset);
    let master = BranchName::try_parse("master".to_string()).unwrap();
    assert_eq!(
        sandbox.repository().refs().read_head(&master).unwrap(),
        Some(changeset.clone())
    );
    let stored = sandbox
        .repository()
        .database()
        .fetch_changeset(&changeset)
        .unwrap();
    assert_eq!(stored.parents().to_vec(), vec![before]);
    assert_eq!(stored.message(), "add a");
    assert_eq!(status(&mut wc), vec![]);
}

#[rstest]
fn nothing_to_commit_is_reported(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");

    let result = wc.commit(None, "empty", None);

    assert_eq!(error_kind(result), WcErrorKind::NotFound);
}

#[rstest]
fn partial_commit_bubbles_up_only_the_selected_change(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    let first = commit_files(
        &mut wc,
        &[("a.txt", "a1\n"), ("dir/b.txt", "b1\n")],
        "first",
    );
    write(&wc, "a.txt", "a2\n");
    write(&wc, "dir/b.txt", "b2\n");

    let second = wc
        .commit(Some(&paths(&["dir/b.txt"])), "only b", None)
        .unwrap();

    let old = sandbox.tree(&first);
    let new = sandbox.tree(&second);
    assert_eq!(
        entry_at(&new, "a.txt").unwrap().oid,
        entry_at(&old, "a.txt").unwrap().oid
    );
    assert_ne!(
        entry_at(&new, "dir/b.txt").unwrap().oid,
        entry_at(&old, "dir/b.txt").unwrap().oid
    );
    assert_ne!(
        entry_at(&new, "dir").unwrap().oid,
        entry_at(&old, "dir").unwrap().oid
    );
    assert_eq!(status(&mut wc), owned(&[(" M", "a.txt")]));
}

#[rstest]
fn partial_commit_keeps_untouched_subdirectories_controlled(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    let first = commit_files(
        &mut wc,
        &[
            ("b.txt", "b1\n"),
            ("dir/c.txt", "c1\n"),
            ("dir/sub/d.txt", "d1\n"),
        ],
        "first",
    );
    write(&wc, "b.txt", "b2\n");
    write(&wc, "dir/c.txt", "c2\n");

    let second = wc
        .commit(Some(&paths(&["b.txt", "dir/c.txt"])), "b and c", None)
        .unwrap();

    let old = sandbox.tree(&first);
    let new = sandbox.tree(&second);
    assert_eq!(
        entry_at(&new, "dir/sub").unwrap().oid,
        entry_at(&old, "dir/sub").unwrap().oid
    );
    assert_eq!(status(&mut wc), vec![]);
    assert_eq!(read(&wc, "dir/sub/d.txt"), "d1\n");
}

#[rstest]
fn child_of_an_unselected_added_directory_cannot_be_committed(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    write(&wc, "new/file.txt", "content\n");
    wc.add(&paths(&["new/file.txt"])).unwrap();

    let result = wc.commit(Some(&paths(&["new/file.txt"])), "too narrow", None);

    assert_eq!(error_kind(result), WcErrorKind::PartialCommitConflict);
    assert_eq!(
        status(&mut wc),
        owned(&[("A ", "new"), ("A ", "new/file.txt")])
    );
}

#[rstest]
fn move_into_an_unselected_added_directory_cannot_be_committed(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    commit_files(&mut wc, &[("src/a.txt", "a\n")], "setup");
    std::fs::create_dir(wc.root().join("new")).unwrap();
    wc.add(&paths(&["new"])).unwrap();
    wc.move_items(&paths(&["src/a.txt"]), std::path::Path::new("new"))
        .unwrap();

    for selection in [["new/a.txt"], ["src"]] {
        let result = wc.commit(Some(&paths(&selection)), "too narrow", None);
        assert_eq!(error_kind(result), WcErrorKind::PartialCommitConflict);
    }
    wc.commit(Some(&paths(&["new"])), "with its directory", None)
        .unwrap();
    assert_eq!(status(&mut wc), vec![]);
}

#[rstest]
fn deleting_a_directory_commits_its_contents_with_it(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    commit_files(
        &mut wc,
        &[("keep.txt", "keep\n"), ("old/x.txt", "x\n"), ("old/y.txt", "y\n")],
        "setup",
    );
    wc.remove(&paths(&["old"]), false, false).unwrap();

    let changeset = wc.commit(Some(&paths(&["old"])), "drop old", None).unwrap();

    let tree = sandbox.tree(&changeset);
    assert!(entry_at(&tree, "old").is_none());
    assert!(entry_at(&tree, "old/x.txt").is_none());
    assert!(entry_at(&tree, "keep.txt").is_some());
    assert!(!wc.root().join("old").exists());
    assert_eq!(status(&mut wc), vec![]);
}

#[rstest]
fn renames_and_moves_are_committed_under_the_same_identity(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    let first = commit_files(
        &mut wc,
        &[("a.txt", "a\n"), ("sub/keep.txt", "k\n")],
        "setup",
    );
    wc.rename(std::path::Path::new("a.txt"), "b.txt").unwrap();
    wc.move_items(&paths(&["b.txt"]), std::path::Path::new("sub"))
        .unwrap();

    let second = wc.commit(None, "move", None).unwrap();

    let old = sandbox.tree(&first);
    let new = sandbox.tree(&second);
    let before = entry_at(&old, "a.txt").unwrap();
    let after = entry_at(&new, "sub/b.txt").unwrap();
    assert_eq!(after.gid, before.gid);
    assert_eq!(after.oid, before.oid);
    assert!(entry_at(&new, "a.txt").is_none());
}

#[rstest]
fn commit_refuses_when_the_branch_moved_on(sandbox: Sandbox) {
    let mut ahead = sandbox.checkout("ahead");
    let mut behind = sandbox.checkout("behind");
    commit_files(&mut ahead, &[("a.txt", "from ahead\n")], "ahead");
    write(&behind, "b.txt", "from behind\n");
    behind.add(&paths(&["b.txt"])).unwrap();

    let result = behind.commit(None, "stale", None);

    assert_eq!(error_kind(result), WcErrorKind::Unsupported);
}

#[rstest]
fn author_comes_from_the_configuration(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");

    let changeset = commit_files(&mut wc, &[("a.txt", "a\n")], "authored");

    let stored = sandbox
        .repository()
        .database()
        .fetch_changeset(&changeset)
        .unwrap();
    assert_eq!(stored.author().name(), "Test Author");
    assert_eq!(stored.author().email(), "test.author@example.com");
    assert!(wc.metadata().branch().unwrap().is_some());
}

#[rstest]
fn content_changing_after_reconciliation_is_an_integrity_error(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    commit_files(&mut wc, &[("a.txt", "a\n")], "setup");
    write(&wc, "a.txt", "edited\n");
    let path = wc.root().join("a.txt");

    let mut tx = wc.begin().unwrap();
    let snapshot = {
        let (wc, view) = tx.parts();
        view.snapshot(wc).unwrap()
    };
    std::fs::write(&path, "edited again\n").unwrap();
    let selected = selection::select(&snapshot, &Scope::everything()).unwrap();

    let result = synthesis::synthesize(tx.wc(), &snapshot, &selected);

    assert_eq!(error_kind(result), WcErrorKind::Integrity);
}

#[rstest]
fn cancelled_commit_leaves_the_branch_head_alone(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    let before = commit_files(&mut wc, &[("a.txt", "a\n")], "setup");
    write(&wc, "a.txt", "edited\n");
    let master = BranchName::try_parse("master".to_string()).unwrap();

    let mut allowed_polls = 0;
    let committed = loop {
        let counter = Cell::new(0usize);
        wc.set_cancel_check(move || {
            counter.set(counter.get() + 1);
            counter.get() > allowed_polls
        });
        let result = wc.commit(None, "edit a", None);
        wc.set_cancel_check(|| false);

        match result {
            Ok(changeset) => break changeset,
            Err(error) => {
                assert_eq!(error_kind::<()>(Err(error)), WcErrorKind::Cancelled);
                assert_eq!(baseline(&wc), before);
                assert_eq!(
                    sandbox.repository().refs().read_head(&master).unwrap(),
                    Some(before.clone())
                );
            }
        }
        allowed_polls += 1;
        assert!(allowed_polls < 1000, "commit never got past its cancel checks");
    };

    assert_eq!(
        sandbox.repository().refs().read_head(&master).unwrap(),
        Some(committed)
    );
}

#[rstest]
fn branch_head_stays_put_when_an_earlier_step_fails(sandbox: Sandbox) {
    let mut wc = sandbox.checkout("wc");
    let before = commit_files(&mut wc, &[("a.txt", "a\n")], "setup");
    let other = commit_files(&mut wc, &[("a.txt", "b\n")], "second");
    let master = BranchName::try_parse("master".to_string()).unwrap();

    let mut tx = wc.begin().unwrap();
    tx.queue(JournalStep::MoveRename {
        from: PathBuf::from("missing.txt"),
        to: PathBuf::from("elsewhere.txt"),
    });
    tx.queue(JournalStep::MoveBranchHead {
        branch: master.clone(),
        hid: before,
    });

    assert!(tx.apply().is_err());
    assert_eq!(
        sandbox.repository().refs().read_head(&master).unwrap(),
        Some(other)
    );
}
