//! Tests for launcher command-line interpretation.
//!
//! Validates the boundary rules (explicit `--`, option tables, unknown
//! flags), family recognition and split idempotence.

use e4s_cl::launchers::{
    family_for, interpret, is_launcher, process_count_flag, reserved_directories,
};
use std::path::PathBuf;

fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

// =============================================================================
// Family Recognition
// =============================================================================

#[test]
fn test_known_launcher_basenames() {
    for name in [
        "mpirun",
        "mpiexec",
        "mpiexec.hydra",
        "srun",
        "aprun",
        "jsrun",
    ] {
        assert!(is_launcher(name), "{} should be recognized", name);
    }
    assert!(is_launcher("/opt/openmpi/bin/mpirun"));
    assert!(!is_launcher("bash"));
    assert!(!is_launcher("./a.out"));
}

#[test]
fn test_family_lookup_uses_basename() {
    let family = family_for("/usr/bin/srun").unwrap();
    assert!(family.names.contains(&"srun"));
}

// =============================================================================
// Boundary Rules
// =============================================================================

#[test]
fn test_explicit_boundary_overrides_tables() {
    let split = interpret(&argv(&["mpirun", "-n", "4", "--", "a.out", "-x"]));
    assert_eq!(split.launcher, argv(&["mpirun", "-n", "4"]));
    assert_eq!(split.program, argv(&["a.out", "-x"]));
}

#[test]
fn test_explicit_boundary_even_for_unknown_launcher() {
    let split = interpret(&argv(&["homebrew-launch", "-z", "--", "./bench"]));
    assert_eq!(split.launcher, argv(&["homebrew-launch", "-z"]));
    assert_eq!(split.program, argv(&["./bench"]));
}

#[test]
fn test_option_table_boundary() {
    let split = interpret(&argv(&[
        "mpirun", "-np", "8", "--map-by", "node", "./a.out", "--np", "9",
    ]));
    assert_eq!(
        split.launcher,
        argv(&["mpirun", "-np", "8", "--map-by", "node"])
    );
    assert_eq!(split.program, argv(&["./a.out", "--np", "9"]));
}

#[test]
fn test_two_token_options_consume_both() {
    let split = interpret(&argv(&["mpirun", "--mca", "btl", "tcp", "./a.out"]));
    assert_eq!(split.launcher, argv(&["mpirun", "--mca", "btl", "tcp"]));
    assert_eq!(split.program, argv(&["./a.out"]));
}

#[test]
fn test_unknown_flag_starts_program_with_warning() {
    let split = interpret(&argv(&["mpirun", "-n", "4", "--xyz", "a.out"]));
    assert_eq!(split.launcher, argv(&["mpirun", "-n", "4"]));
    assert_eq!(split.program, argv(&["--xyz", "a.out"]));
}

#[test]
fn test_srun_split() {
    let split = interpret(&argv(&["srun", "-n", "2", "-N", "2", "./ping-pong"]));
    assert_eq!(split.launcher, argv(&["srun", "-n", "2", "-N", "2"]));
    assert_eq!(split.program, argv(&["./ping-pong"]));
}

#[test]
fn test_aprun_split() {
    let split = interpret(&argv(&["aprun", "-n", "32", "-N", "8", "./wave"]));
    assert_eq!(split.launcher, argv(&["aprun", "-n", "32", "-N", "8"]));
    assert_eq!(split.program, argv(&["./wave"]));
}

#[test]
fn test_jsrun_split() {
    let split = interpret(&argv(&["jsrun", "-n", "4", "-r", "1", "-g", "1", "./sim"]));
    assert_eq!(split.launcher, argv(&["jsrun", "-n", "4", "-r", "1", "-g", "1"]));
    assert_eq!(split.program, argv(&["./sim"]));
}

#[test]
fn test_non_launcher_command_is_all_program() {
    let split = interpret(&argv(&["./a.out", "-n", "4"]));
    assert!(split.launcher.is_empty());
    assert_eq!(split.program, argv(&["./a.out", "-n", "4"]));
}

#[test]
fn test_empty_command() {
    let split = interpret(&[]);
    assert!(split.launcher.is_empty());
    assert!(split.program.is_empty());
}

// =============================================================================
// Idempotence
// =============================================================================

#[test]
fn test_split_is_a_fixed_point() {
    let commands = [
        argv(&["mpirun", "-n", "4", "--", "a.out", "-x"]),
        argv(&["mpirun", "-np", "8", "--map-by", "node", "./a.out"]),
        argv(&["srun", "-n", "2", "./bench", "--input", "data"]),
        argv(&["weird-launcher", "--", "./prog"]),
        argv(&["./a.out"]),
    ];
    for command in commands {
        let first = interpret(&command);
        let second = interpret(&first.to_vec());
        assert_eq!(first, second, "split of {:?} is not stable", command);
    }
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_srun_reserves_spool_directories() {
    let dirs = reserved_directories(&argv(&["srun", "-n", "2"]));
    assert!(dirs.contains(&PathBuf::from("/var/spool/slurm")));
    assert!(dirs.contains(&PathBuf::from("/var/spool/slurmd")));
}

#[test]
fn test_process_count_flag_per_launcher() {
    assert_eq!(process_count_flag("srun"), "-n");
    assert_eq!(process_count_flag("/usr/bin/mpirun"), "-np");
    assert_eq!(process_count_flag("jsrun"), "-np");
}
