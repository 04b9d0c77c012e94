//! Entry-script synthesis.
//!
//! Each rank deposits a small shell script in its bind directory and runs
//! it as the contained command. The script prepares the linker environment,
//! optionally sources a user setup script, and `exec`s the user command so
//! the container init sees the user process directly and signals propagate
//! cleanly.

use crate::error::Result;
use crate::util::shell_quote;
use crate::wi4mpi::Wi4mpiEnv;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Execution parameters that render into the entry script.
#[derive(Debug, Clone, Default)]
pub struct Entrypoint {
    /// The user command and its arguments.
    pub command: Vec<String>,
    /// Script sourced (not forked) before anything else runs.
    pub source_script: Option<PathBuf>,
    /// Directories prepended to the container's `LD_LIBRARY_PATH`.
    pub library_dirs: Vec<String>,
    /// Libraries set in `LD_PRELOAD`, when preloading is enabled.
    pub preload: Vec<String>,
    /// Translation-layer environment, when translation is active.
    pub wi4mpi: Option<Wi4mpiEnv>,
    /// Emit `LD_DEBUG` so linker decisions show up in the rank logs.
    pub debug_linker: bool,
}

impl Entrypoint {
    /// Renders the script.
    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash\n");

        // Host libraries take precedence over anything the image ships.
        if !self.library_dirs.is_empty() {
            script.push_str(&format!(
                "export LD_LIBRARY_PATH={}${{LD_LIBRARY_PATH:+:${{LD_LIBRARY_PATH}}}}\n",
                self.library_dirs.join(":")
            ));
        }

        if let Some(source) = &self.source_script {
            script.push_str(&format!(". {}\n", shell_quote(&source.display().to_string())));
        }

        if self.debug_linker {
            script.push_str("export LD_DEBUG=files\n");
        }

        if !self.preload.is_empty() {
            let preload = self
                .preload
                .iter()
                .map(|p| shell_quote(p))
                .collect::<Vec<_>>()
                .join(" ");
            script.push_str(&format!(
                "export LD_PRELOAD=\"{}${{LD_PRELOAD:+ ${{LD_PRELOAD}}}}\"\n",
                preload
            ));
        }

        let command = self
            .command
            .iter()
            .map(|t| shell_quote(t))
            .collect::<Vec<_>>()
            .join(" ");

        match &self.wi4mpi {
            Some(translation) => {
                for (key, value) in translation.exports() {
                    script.push_str(&format!("export {}={}\n", key, shell_quote(&value)));
                }
                script.push_str(&format!(
                    "exec \"${{WI4MPI_WRAPPER_BIN}}\" {}\n",
                    command
                ));
            }
            None => {
                script.push_str(&format!("exec {}\n", command));
            }
        }

        script
    }

    /// Writes the rendered script as `entry` in the given directory, marked
    /// executable.
    pub fn write_to(&self, directory: &Path) -> Result<PathBuf> {
        let contents = self.render();
        fs::create_dir_all(directory)?;
        let path = directory.join("entry");
        fs::write(&path, &contents)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

        debug!(
            "Entry script at {}:\n{}\n{}\n{}",
            path.display(),
            "=".repeat(78),
            contents.trim_end(),
            "=".repeat(78)
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpi::MpiFamily;

    #[test]
    fn test_minimal_script_execs_command() {
        let entry = Entrypoint {
            command: vec!["./a.out".to_string(), "-x".to_string()],
            ..Default::default()
        };
        let script = entry.render();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.trim_end().ends_with("exec ./a.out -x"));
    }

    #[test]
    fn test_section_ordering() {
        let entry = Entrypoint {
            command: vec!["./a.out".to_string()],
            source_script: Some(PathBuf::from("/spack/setup-env.sh")),
            library_dirs: vec!["/.e4s-cl/hostlibs".to_string()],
            preload: vec!["/.e4s-cl/hostlibs/libmpi.so.12".to_string()],
            ..Default::default()
        };
        let script = entry.render();

        let library_path = script.find("export LD_LIBRARY_PATH=").unwrap();
        let source = script.find(". /spack/setup-env.sh").unwrap();
        let preload = script.find("export LD_PRELOAD=").unwrap();
        let exec = script.find("exec ./a.out").unwrap();
        assert!(library_path < source && source < preload && preload < exec);

        // The library dir is prepended, preserving the container's own path.
        assert!(script.contains(
            "export LD_LIBRARY_PATH=/.e4s-cl/hostlibs${LD_LIBRARY_PATH:+:${LD_LIBRARY_PATH}}"
        ));
    }

    #[test]
    fn test_translation_execs_through_wrapper() {
        let entry = Entrypoint {
            command: vec!["./a.out".to_string()],
            wi4mpi: Some(Wi4mpiEnv::new(
                PathBuf::from("/opt/wi4mpi"),
                MpiFamily::OpenMpi,
                MpiFamily::Mpich,
            )),
            ..Default::default()
        };
        let script = entry.render();
        assert!(script.contains("export WI4MPI_ROOT=/opt/wi4mpi"));
        assert!(script.contains("export WI4MPI_FROM=OMPI"));
        assert!(script.contains("export WI4MPI_TO=MPICH"));
        assert!(script.contains("exec \"${WI4MPI_WRAPPER_BIN}\" ./a.out"));
    }

    #[test]
    fn test_arguments_are_quoted() {
        let entry = Entrypoint {
            command: vec!["./a.out".to_string(), "a b".to_string()],
            ..Default::default()
        };
        assert!(entry.render().contains("exec ./a.out 'a b'"));
    }
}
