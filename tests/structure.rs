mod common;

use common::error_kind;
use common::file::write_generated_files;
use common::session::{Sandbox, codes, commit_files, paths, sandbox, status, write};
use grove::areas::working_copy::WorkingCopy;
use grove::error::WcErrorKind;
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use std::path::Path;

struct Populated {
    _sandbox: Sandbox,
    wc: WorkingCopy,
}

#[fixture]
fn populated(sandbox: Sandbox) -> Populated {
    let mut wc = sandbox.checkout("wc");
    commit_files(
        &mut wc,
        &[("foo.txt", "foo\n"), ("docs/guide.md", "guide\n"), ("docs/notes.md", "notes\n")],
        "setup",
    );
    Populated {
        _sandbox: sandbox,
        wc,
    }
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(code, path)| (code.to_string(), path.to_string()))
        .collect()
}

#[rstest]
fn status_reports_every_kind_of_change(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    write(&wc, "foo.txt", "changed\n");
    std::fs::remove_file(wc.root().join("docs/notes.md")).unwrap();
    write(&wc, "stray.log", "?\n");
    write(&wc, "added.txt", "new\n");
    wc.add(&paths(&["added.txt"])).unwrap();

    assert_eq!(
        status(&mut wc),
        pairs(&[
            ("A ", "added.txt"),
            ("! ", "docs/notes.md"),
            (" M", "foo.txt"),
            ("? ", "stray.log"),
        ])
    );
}

#[rstest]
fn status_depth_and_paths_narrow_the_walk(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    write(&wc, "foo.txt", "changed\n");
    write(&wc, "docs/guide.md", "changed\n");

    let shallow = wc.status(&[], Some(1)).unwrap();
    let docs = wc.status(&paths(&["docs"]), None).unwrap();

    assert_eq!(codes(&shallow), pairs(&[(" M", "foo.txt")]));
    assert_eq!(codes(&docs), pairs(&[(" M", "docs/guide.md")]));
}

#[rstest]
fn unknown_path_is_not_found(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;

    let result = wc.status(&paths(&["missing.txt"]), None);

    assert_eq!(error_kind(result), WcErrorKind::NotFound);
}

#[rstest]
fn adding_a_directory_adds_everything_below_it(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    let files = write_generated_files(&wc.root().join("generated"), 3);

    let records = wc.add(&paths(&["generated"])).unwrap();

    assert_eq!(records.len(), files.len() + 1);
    assert!(records.iter().all(|record| record.code() == "A "));
}

#[rstest]
fn case_folding_collision_is_refused(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    write(&wc, "FOO.txt", "shouting\n");

    let result = wc.add(&paths(&["FOO.txt"]));

    assert_eq!(error_kind(result), WcErrorKind::PortabilityCollision);
    assert_eq!(status(&mut wc), pairs(&[("? ", "FOO.txt")]));
}

#[rstest]
fn rename_onto_a_case_variant_is_refused(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    write(&wc, "bar.txt", "bar\n");
    wc.add(&paths(&["bar.txt"])).unwrap();

    let result = wc.rename(Path::new("bar.txt"), "Foo.txt");

    assert_eq!(error_kind(result), WcErrorKind::PortabilityCollision);
    assert!(wc.root().join("bar.txt").exists());
}

#[rstest]
fn metadata_directory_cannot_be_added(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;

    let result = wc.add(&paths(&[".grove/config.toml"]));

    assert_eq!(error_kind(result), WcErrorKind::Reserved);
}

#[rstest]
fn remove_refuses_local_changes_unless_forced(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    write(&wc, "foo.txt", "changed\n");

    assert_eq!(
        error_kind(wc.remove(&paths(&["foo.txt"]), false, false)),
        WcErrorKind::Dirty
    );

    wc.remove(&paths(&["foo.txt"]), false, true).unwrap();

    assert!(!wc.root().join("foo.txt").exists());
    assert_eq!(status(&mut wc), pairs(&[("D ", "foo.txt")]));
}

#[rstest]
fn remove_with_keep_leaves_the_file_on_disk(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;

    wc.remove(&paths(&["foo.txt"]), true, false).unwrap();

    assert!(wc.root().join("foo.txt").exists());
    let codes = status(&mut wc)
        .into_iter()
        .map(|(code, _)| code)
        .collect::<Vec<_>>();
    assert!(codes.contains(&"D ".to_string()));
}

#[rstest]
fn removing_an_added_file_only_forgets_it(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    write(&wc, "new.txt", "new\n");
    wc.add(&paths(&["new.txt"])).unwrap();

    wc.remove(&paths(&["new.txt"]), false, false).unwrap();

    assert!(wc.root().join("new.txt").exists());
    assert_eq!(status(&mut wc), pairs(&[("? ", "new.txt")]));
}

#[rstest]
fn moving_into_a_directory_keeps_the_name(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;

    let records = wc
        .move_items(&paths(&["foo.txt"]), Path::new("docs"))
        .unwrap();

    assert_eq!(records[0].path, Path::new("docs/foo.txt"));
    assert_eq!(records[0].baseline_path.as_deref(), Some(Path::new("foo.txt")));
    assert!(wc.root().join("docs/foo.txt").exists());
    assert!(!wc.root().join("foo.txt").exists());
    assert_eq!(status(&mut wc), pairs(&[("R ", "docs/foo.txt")]));
}

#[rstest]
fn directory_cannot_move_inside_itself(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    std::fs::create_dir_all(wc.root().join("docs/inner")).unwrap();
    wc.add(&paths(&["docs/inner"])).unwrap();

    let result = wc.move_items(&paths(&["docs"]), Path::new("docs/inner"));

    assert!(result.is_err());
    assert!(wc.root().join("docs/guide.md").exists());
}

#[rstest]
fn separators_are_rejected_in_new_names(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;

    let result = wc.rename(Path::new("foo.txt"), "sub/foo.txt");

    assert_eq!(error_kind(result), WcErrorKind::InvalidEntryname);
}

#[rstest]
fn cancelled_operations_change_nothing(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    write(&wc, "new.txt", "new\n");
    wc.set_cancel_check(|| true);

    let result = wc.add(&paths(&["new.txt"]));

    assert_eq!(error_kind(result), WcErrorKind::Cancelled);
    wc.set_cancel_check(|| false);
    assert_eq!(status(&mut wc), pairs(&[("? ", "new.txt")]));
}

#[rstest]
fn same_size_edit_is_seen_once_the_mtime_moves(populated: Populated) {
    let Populated { _sandbox, mut wc } = populated;
    let file = wc.root().join("foo.txt");
    let past = filetime::FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&file, past).unwrap();
    // caches the hash under the old mtime
    assert_eq!(status(&mut wc), vec![]);

    write(&wc, "foo.txt", "bar\n");
    filetime::set_file_mtime(&file, filetime::FileTime::from_unix_time(1_600_000_100, 0))
        .unwrap();

    assert_eq!(status(&mut wc), pairs(&[(" M", "foo.txt")]));
}
