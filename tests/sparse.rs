mod common;

use common::error_kind;
use common::session::{Sandbox, commit_files, paths, read, sandbox, status, write};
use grove::error::WcErrorKind;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn publish(sandbox: &Sandbox) {
    let mut writer = sandbox.checkout("writer");
    commit_files(
        &mut writer,
        &[
            ("README.md", "readme\n"),
            ("docs/guide.md", "guide\n"),
            ("docs/api/index.md", "api\n"),
        ],
        "docs",
    );
}

#[rstest]
fn sparse_directories_are_recorded_but_not_written(sandbox: Sandbox) {
    publish(&sandbox);

    let mut wc = sandbox.checkout_with("sparse", None, &["docs"], "");

    assert_eq!(read(&wc, "README.md"), "readme\n");
    assert!(!wc.root().join("docs").exists());
    let listed = status(&mut wc);
    assert!(listed.iter().all(|(code, _)| code.starts_with('S')));
    assert!(
        listed
            .iter()
            .any(|(_, path)| path == "docs/api/index.md")
    );
}

#[rstest]
fn update_keeps_new_items_in_sparse_directories_off_disk(sandbox: Sandbox) {
    publish(&sandbox);
    let mut wc = sandbox.checkout_with("sparse", None, &["docs"], "");
    let mut writer = sandbox.checkout("writer2");
    commit_files(
        &mut writer,
        &[("docs/new.md", "new\n"), ("top.md", "top\n")],
        "more",
    );

    wc.update(None, false).unwrap();

    assert_eq!(read(&wc, "top.md"), "top\n");
    assert!(!wc.root().join("docs").exists());
    assert!(
        status(&mut wc)
            .iter()
            .any(|(code, path)| code.starts_with('S') && path == "docs/new.md")
    );
}

#[rstest]
fn nothing_can_be_added_below_a_sparse_directory(sandbox: Sandbox) {
    publish(&sandbox);
    let mut wc = sandbox.checkout_with("sparse", None, &["docs"], "");
    write(&wc, "docs/local.md", "local\n");

    let result = wc.add(&paths(&["docs/local.md"]));

    assert!(result.is_err());
    assert_eq!(read(&wc, "docs/local.md"), "local\n");
}

#[rstest]
fn sparse_file_patterns_match_by_glob(sandbox: Sandbox) {
    publish(&sandbox);

    let wc = sandbox.checkout_with("sparse", None, &["**/*.md"], "");

    assert!(!wc.root().join("README.md").exists());
    assert!(wc.root().join("docs/api").is_dir());
    assert!(!wc.root().join("docs/api/index.md").exists());
}

#[rstest]
fn sparse_items_can_be_removed_without_touching_disk(sandbox: Sandbox) {
    publish(&sandbox);
    let mut wc = sandbox.checkout_with("sparse", None, &["docs"], "");

    wc.remove(&paths(&["docs"]), false, false).unwrap();
    let changeset = wc.commit(None, "drop docs", None).unwrap();

    let tree = sandbox.tree(&changeset);
    assert!(common::session::entry_at(&tree, "docs").is_none());
    assert_eq!(
        error_kind(wc.status(&paths(&["docs"]), None)),
        WcErrorKind::NotFound
    );
}
