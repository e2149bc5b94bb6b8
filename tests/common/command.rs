use assert_cmd::Command;
use std::path::Path;

pub fn run_grove_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("grove").expect("Failed to find grove binary");
    cmd.current_dir(dir);
    cmd.env_remove("GROVE_LOG");
    cmd.env("NO_COLOR", "1");
    cmd.envs(vec![
        ("GROVE_AUTHOR_NAME", "fake_user"),
        ("GROVE_AUTHOR_EMAIL", "fake_email@email.com"),
        ("GROVE_AUTHOR_DATE", "2023-01-01 12:00:00 +0000"), // %Y-%m-%d %H:%M:%S %z
    ]);
    for arg in args {
        cmd.arg(arg);
    }
    cmd
}

pub fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success();
    String::from_utf8(output.get_output().stdout.clone()).expect("stdout is not utf-8")
}
