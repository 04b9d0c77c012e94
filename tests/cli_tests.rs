//! Binary-level tests: exit codes and user-visible behavior of the CLI.
//!
//! Each test isolates the profile stores by pointing HOME at a scratch
//! directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cli(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("e4s-cl").unwrap();
    cmd.env("HOME", home.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("e4s-cl version"));
}

#[test]
fn test_help_on_no_arguments() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .assert()
        .success()
        .stdout(predicate::str::contains("USAGE"));
}

#[test]
fn test_unknown_command_exits_one() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .arg("frobnicate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown command"));
}

#[test]
fn test_profile_lifecycle() {
    let home = TempDir::new().unwrap();

    cli(&home)
        .args(["profile", "create", "mpich", "--backend", "podman"])
        .assert()
        .success();

    cli(&home)
        .args(["profile", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mpich").and(predicate::str::contains("podman")));

    cli(&home)
        .args(["profile", "select", "mpich"])
        .assert()
        .success();

    // Selected profiles refuse deletion.
    cli(&home)
        .args(["profile", "delete", "mpich"])
        .assert()
        .code(1);

    cli(&home).args(["profile", "unselect"]).assert().success();
    cli(&home)
        .args(["profile", "delete", "mpich"])
        .assert()
        .success();
}

#[test]
fn test_show_unknown_profile_exits_one() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["profile", "show", "missing"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("profile not found"));
}

#[test]
fn test_repeated_edit_keeps_one_library_entry() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["profile", "create", "p"])
        .assert()
        .success();

    for _ in 0..2 {
        cli(&home)
            .args(["profile", "edit", "p", "--add-libraries", "/lib/x.so.1"])
            .assert()
            .success();
    }

    cli(&home)
        .args(["profile", "show", "p"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/lib/x.so.1").count(1));
}

#[test]
fn test_launch_without_command_exits_one() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["launch", "--backend", "barebones"])
        .assert()
        .code(1);
}

#[test]
fn test_launch_without_backend_or_image_exits_one() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["launch", "./a.out"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("backend"));
}

#[test]
fn test_dry_run_launch_prints_execute_rewrite() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args([
            "--dry-run",
            "launch",
            "--backend",
            "barebones",
            "--",
            "./a.out",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("__execute").and(predicate::str::contains("./a.out")));
}

#[test]
fn test_profile_dump_is_json() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["profile", "create", "p"])
        .assert()
        .success();
    cli(&home)
        .args(["profile", "dump"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"profiles\""));
}

#[test]
fn test_diff_identical_profiles() {
    let home = TempDir::new().unwrap();
    cli(&home)
        .args(["profile", "create", "a"])
        .assert()
        .success();
    cli(&home).args(["profile", "copy", "a", "b"]).assert().success();
    cli(&home)
        .args(["profile", "diff", "a", "b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("identical"));
}