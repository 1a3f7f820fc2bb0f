use assert_cmd::Command;
use predicates::prelude::*;

fn ctl() -> Command {
    Command::cargo_bin("sysmon-ctl").unwrap()
}

#[test]
fn no_arguments_prints_usage_and_fails() {
    ctl()
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn help_succeeds() {
    ctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--syscall"));
}

#[test]
fn fsm_file_requires_log_mode() {
    ctl()
        .args(["--file", "fsm.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--log"));

    ctl()
        .args(["--block", "--file", "fsm.json"])
        .assert()
        .failure();
}

#[test]
fn mode_flags_are_exclusive() {
    ctl().args(["--log", "--block"]).assert().failure();
}

#[test]
fn unknown_syscall_is_rejected() {
    ctl()
        .args(["--syscall", "delete"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("delete"));
}

#[test]
fn zero_poll_budget_is_rejected() {
    ctl()
        .args(["--log", "--max-polls", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--max-polls"));
}

#[test]
fn unreachable_agent_exits_one_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("absent.sock");
    ctl()
        .args(["--log", "--socket"])
        .arg(&socket)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("is sysmon-agent running?"));
}
