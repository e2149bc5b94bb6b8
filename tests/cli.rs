mod common;

use assert_fs::TempDir;
use common::command::{run_grove_command, stdout_of};
use common::file::{FileSpec, write_file};
use predicates::prelude::predicate;

/// A repository at `repo/` and a working copy of it at `wc/`
fn checked_out() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    run_grove_command(dir.path(), &["init", "repo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized empty repository in"));
    run_grove_command(dir.path(), &["checkout", "repo", "wc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Checked out into"));
    dir
}

#[test]
fn add_commit_and_status_from_the_command_line() -> Result<(), Box<dyn std::error::Error>> {
    let dir = checked_out();
    let wc = dir.path().join("wc");
    write_file(&FileSpec::new(wc.join("hello.txt"), "hello\n".to_string()));

    run_grove_command(&wc, &["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("?  hello.txt"));
    run_grove_command(&wc, &["add", "hello.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A  hello.txt"));
    run_grove_command(&wc, &["commit", "-m", "say hello"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^Committed [0-9a-f]{7}")?);
    let status = stdout_of(&mut run_grove_command(&wc, &["status"]));

    assert_eq!(status, "");
    Ok(())
}

#[test]
fn rename_is_shown_with_its_old_path() -> Result<(), Box<dyn std::error::Error>> {
    let dir = checked_out();
    let wc = dir.path().join("wc");
    write_file(&FileSpec::new(wc.join("old.txt"), "content\n".to_string()));
    run_grove_command(&wc, &["add", "old.txt"]).assert().success();
    run_grove_command(&wc, &["commit", "-m", "old"]).assert().success();

    run_grove_command(&wc, &["rename", "old.txt", "new.txt"])
        .assert()
        .success();

    run_grove_command(&wc, &["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("R  new.txt (from old.txt)"));
    Ok(())
}

#[test]
fn commands_outside_a_working_copy_fail() {
    let dir = TempDir::new().expect("Failed to create temp dir");

    run_grove_command(dir.path(), &["status"]).assert().failure();
}

#[test]
fn unknown_revert_filter_is_rejected() {
    let dir = checked_out();

    run_grove_command(&dir.path().join("wc"), &["revert", "--filter", "bogus"])
        .assert()
        .failure();
}
