//! Launcher command-line interpretation.
//!
//! Each supported launcher family declares the basenames it answers to, an
//! option table mapping every known flag to the number of positional tokens
//! it consumes, and optionally a set of runtime directories the launcher
//! needs bound into containers. [`interpret`] uses the tables to find the
//! boundary between the launcher and the program it launches.

pub mod aprun;
pub mod jsrun;
pub mod mpirun;
pub mod slurm;

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One launcher family: recognized basenames, option table, reserved
/// directories.
pub struct Family {
    /// Program basenames this family answers to.
    pub names: &'static [&'static str],
    /// Flag → number of positional tokens the flag consumes.
    pub options: &'static [(&'static str, usize)],
    /// Directories the launcher expects to see inside the container.
    pub reserved_directories: &'static [&'static str],
}

impl Family {
    fn arity(&self, flag: &str) -> Option<usize> {
        self.options
            .iter()
            .find(|(name, _)| *name == flag)
            .map(|(_, arity)| *arity)
    }
}

/// All supported families.
pub const FAMILIES: &[&Family] = &[
    &mpirun::FAMILY,
    &slurm::FAMILY,
    &aprun::FAMILY,
    &jsrun::FAMILY,
];

/// The family answering to a program basename.
pub fn family_for(program: &str) -> Option<&'static Family> {
    let basename = Path::new(program).file_name()?.to_str()?;
    FAMILIES
        .iter()
        .copied()
        .find(|family| family.names.contains(&basename))
}

/// True when the token names a supported launcher.
pub fn is_launcher(token: &str) -> bool {
    family_for(token).is_some()
}

/// A split command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Split {
    /// Launcher binary and its arguments; empty when no launcher was found.
    pub launcher: Vec<String>,
    /// The launched program and its arguments.
    pub program: Vec<String>,
}

impl Split {
    /// Reassembles the command with an explicit boundary, such that
    /// interpreting the result reproduces this split.
    pub fn to_vec(&self) -> Vec<String> {
        if self.launcher.is_empty() {
            return self.program.clone();
        }
        let mut command = self.launcher.clone();
        command.push("--".to_string());
        command.extend(self.program.iter().cloned());
        command
    }
}

/// Separates a command line into launcher and program.
///
/// An explicit `--` token always sets the boundary. Otherwise the launcher
/// family's option table decides: the first token that is neither a known
/// option nor a positional belonging to one starts the program. A command
/// that does not begin with a known launcher is treated as all-program.
pub fn interpret(command: &[String]) -> Split {
    if command.is_empty() {
        return Split::default();
    }

    if let Some(boundary) = command.iter().position(|t| t == "--") {
        return Split {
            launcher: command[..boundary].to_vec(),
            program: command[boundary + 1..].to_vec(),
        };
    }

    let Some(family) = family_for(&command[0]) else {
        debug!(
            "'{}' is not a recognized launcher; treating the whole command as program",
            command[0]
        );
        return Split {
            launcher: Vec::new(),
            program: command.to_vec(),
        };
    };

    let mut position = 1;
    while position < command.len() {
        let token = &command[position];

        let consumed = if let Some(arity) = family.arity(token) {
            arity + 1
        } else if token.starts_with("--") && token.contains('=') {
            // Generic --flag=value form, always self-contained.
            1
        } else {
            if token.starts_with('-') {
                warn!(
                    "Unknown launcher option '{}'; assuming the program starts here. \
                     Use '--' to set the boundary explicitly.",
                    token
                );
            }
            break;
        };

        position = (position + consumed).min(command.len());
    }

    Split {
        launcher: command[..position].to_vec(),
        program: command[position..].to_vec(),
    }
}

/// Directories the launcher of a split command wants bound in containers.
pub fn reserved_directories(launcher: &[String]) -> Vec<PathBuf> {
    launcher
        .first()
        .and_then(|program| family_for(program))
        .map(|family| {
            family
                .reserved_directories
                .iter()
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// The process-count flag understood by a launcher binary: `-n` for srun,
/// `-np` for everything else. Used when the core builds its own launcher
/// invocations.
pub fn process_count_flag(launcher: &str) -> &'static str {
    match Path::new(launcher).file_name().and_then(|n| n.to_str()) {
        Some("srun") => "-n",
        _ => "-np",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_explicit_boundary() {
        let split = interpret(&argv(&["mpirun", "-n", "4", "--", "a.out", "-x"]));
        assert_eq!(split.launcher, argv(&["mpirun", "-n", "4"]));
        assert_eq!(split.program, argv(&["a.out", "-x"]));
    }

    #[test]
    fn test_table_boundary() {
        let split = interpret(&argv(&["mpirun", "-np", "8", "./a.out", "arg"]));
        assert_eq!(split.launcher, argv(&["mpirun", "-np", "8"]));
        assert_eq!(split.program, argv(&["./a.out", "arg"]));
    }

    #[test]
    fn test_unknown_flag_starts_program() {
        let split = interpret(&argv(&["mpirun", "-n", "4", "--xyz", "a.out"]));
        assert_eq!(split.launcher, argv(&["mpirun", "-n", "4"]));
        assert_eq!(split.program, argv(&["--xyz", "a.out"]));
    }

    #[test]
    fn test_flag_equals_value_consumed() {
        let split = interpret(&argv(&["mpirun", "--mca=orte_base", "a.out"]));
        assert_eq!(split.launcher, argv(&["mpirun", "--mca=orte_base"]));
        assert_eq!(split.program, argv(&["a.out"]));
    }

    #[test]
    fn test_unknown_launcher_is_all_program() {
        let split = interpret(&argv(&["./a.out", "-n", "4"]));
        assert!(split.launcher.is_empty());
        assert_eq!(split.program, argv(&["./a.out", "-n", "4"]));
    }

    #[test]
    fn test_interpret_is_idempotent() {
        for command in [
            argv(&["mpirun", "-n", "4", "--", "a.out", "-x"]),
            argv(&["srun", "-n", "2", "-N", "2", "./bench"]),
            argv(&["./a.out"]),
        ] {
            let first = interpret(&command);
            let second = interpret(&first.to_vec());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_reserved_directories() {
        let dirs = reserved_directories(&argv(&["/usr/bin/srun", "-n", "2"]));
        assert!(dirs.contains(&PathBuf::from("/var/spool/slurm")));
        assert!(reserved_directories(&argv(&["mpirun"])).is_empty());
    }

    #[test]
    fn test_process_count_flag() {
        assert_eq!(process_count_flag("/usr/bin/srun"), "-n");
        assert_eq!(process_count_flag("mpirun"), "-np");
    }
}
