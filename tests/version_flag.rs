use assert_cmd::Command;
use predicates::prelude::*;

fn gm_tui() -> Command {
    Command::cargo_bin("gm-tui").expect("gm-tui binary")
}

#[test]
fn prints_version() {
    gm_tui()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    gm_tui()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("GM-TUI"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("--demo"));
}

#[test]
fn rejects_unknown_flags() {
    gm_tui()
        .arg("--bogus")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown argument --bogus"));
}

#[test]
fn value_flags_need_a_value() {
    gm_tui()
        .arg("--server")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--server needs a value"));
}

#[test]
fn check_reports_unreachable_server() {
    let dir = tempfile::tempdir().expect("tempdir");
    gm_tui()
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env("XDG_CACHE_HOME", dir.path())
        .args(["--check", "--server", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not reachable"));
}
