//! Translation-layer (Wi4MPI) support.
//!
//! When the host and container MPI families differ, Wi4MPI rewrites the MPI
//! calls at runtime. This module knows the layout of a Wi4MPI installation,
//! the environment it expects, the files it needs bound into containers,
//! and how to provision an installation idempotently.

use crate::constants::{ENV_WI4MPI_CFLAGS, ENV_WI4MPI_CXXFLAGS};
use crate::containers::{ContainerBackend, ContainerJob, FileMode};
use crate::error::{Error, Result};
use crate::mpi::MpiFamily;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A translation configuration: where Wi4MPI lives and which ABI is being
/// rewritten into which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wi4mpiEnv {
    pub root: PathBuf,
    pub from: MpiFamily,
    pub to: MpiFamily,
}

impl Wi4mpiEnv {
    pub fn new(root: PathBuf, from: MpiFamily, to: MpiFamily) -> Self {
        Self { root, from, to }
    }

    /// The per-rank wrapper executable.
    pub fn wrapper_bin(&self) -> PathBuf {
        self.root.join("bin").join("wi4mpi")
    }

    /// Environment exported by the entry script before exec.
    pub fn exports(&self) -> Vec<(String, String)> {
        vec![
            (
                "WI4MPI_ROOT".to_string(),
                self.root.display().to_string(),
            ),
            (
                "WI4MPI_FROM".to_string(),
                self.from.translation_name().to_string(),
            ),
            (
                "WI4MPI_TO".to_string(),
                self.to.translation_name().to_string(),
            ),
            (
                "WI4MPI_WRAPPER_BIN".to_string(),
                self.wrapper_bin().display().to_string(),
            ),
        ]
    }

    /// The interposition library translating `from` calls into `to` calls.
    pub fn wrapper_library(&self) -> PathBuf {
        self.root.join("libexec").join("wi4mpi").join(format!(
            "libwi4mpi_{}_{}.so",
            self.from.translation_name(),
            self.to.translation_name()
        ))
    }

    /// The fake MPI libraries preloaded so the application resolves its
    /// original ABI against the translator.
    pub fn preload_libraries(&self) -> Vec<PathBuf> {
        let fakelib = self
            .root
            .join("libexec")
            .join("wi4mpi")
            .join(format!("fakelib{}", self.from.translation_name()));

        let mut libraries = Vec::new();
        if let Ok(entries) = fs::read_dir(&fakelib) {
            for entry in entries.flatten() {
                if entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("lib")
                {
                    libraries.push(entry.path());
                }
            }
        }
        libraries.sort();
        libraries
    }

    /// Binds the installation and the runtime roots its configuration
    /// names into the container.
    pub fn import_into(&self, job: &mut ContainerJob) {
        job.bind(&self.root, None, FileMode::ReadOnly);

        for (key, value) in read_cfg(&self.root) {
            if key.contains("ROOT") && !value.is_empty() {
                let root = PathBuf::from(&value);
                job.bind(&root, None, FileMode::ReadOnly);
                job.add_ld_library_path(root.join("lib"));
            }
        }
    }
}

/// True when `root` holds the expected translation-layer layout.
pub fn is_installed(root: &Path) -> bool {
    root.join("bin").join("wi4mpi").is_file()
        && root.join("libexec").join("wi4mpi").is_dir()
        && root.join("etc").join("wi4mpi.cfg").is_file()
}

/// Validates a profile's `wi4mpi` field.
pub fn check_installation(root: &Path) -> Result<()> {
    if !root.is_dir() {
        return Err(Error::TranslationLayerMissing {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    if !is_installed(root) {
        return Err(Error::TranslationLayerMissing {
            path: root.to_path_buf(),
            reason: "missing bin/wi4mpi, libexec/wi4mpi or etc/wi4mpi.cfg".to_string(),
        });
    }
    Ok(())
}

/// Reads `etc/wi4mpi.cfg` (and the user override `~/.wi4mpi.cfg`) as
/// `KEY="value"` pairs.
pub fn read_cfg(root: &Path) -> BTreeMap<String, String> {
    let mut config = parse_cfg_file(&root.join("etc").join("wi4mpi.cfg"));
    if let Some(home) = dirs::home_dir() {
        for (key, value) in parse_cfg_file(&home.join(".wi4mpi.cfg")) {
            config.insert(key, value);
        }
    }
    config
}

fn parse_cfg_file(path: &Path) -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    let Ok(contents) = fs::read_to_string(path) else {
        return config;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            config.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    config
}

/// Provisions a translation layer under `prefix` by building it inside a
/// builder image. Idempotent: an existing installation is reused.
///
/// Compiler flags from `E4S_CL_WI4MPI_CFLAGS`/`E4S_CL_WI4MPI_CXXFLAGS` are
/// forwarded to the build only.
pub async fn ensure_install(
    prefix: &Path,
    backend: &dyn ContainerBackend,
    builder_image: &str,
) -> Result<()> {
    if is_installed(prefix) {
        debug!(
            "Translation layer already present at {}",
            prefix.display()
        );
        return Ok(());
    }

    info!(
        "Installing the translation layer into {} using image {}",
        prefix.display(),
        builder_image
    );
    fs::create_dir_all(prefix)?;

    let mut job = ContainerJob::new(Some(builder_image.to_string()));
    job.bind(prefix, Some(prefix.to_path_buf()), FileMode::ReadWrite);
    if let Some(flags) = crate::util::getenv(ENV_WI4MPI_CFLAGS) {
        job.set_env("CFLAGS", flags);
    }
    if let Some(flags) = crate::util::getenv(ENV_WI4MPI_CXXFLAGS) {
        job.set_env("CXXFLAGS", flags);
    }

    let build = [
        "sh".to_string(),
        "-c".to_string(),
        format!("wi4mpi-build --prefix {}", prefix.display()),
    ];
    let code = backend.run(&job, &build).await?;
    if code != 0 {
        return Err(Error::TranslationLayerMissing {
            path: prefix.to_path_buf(),
            reason: format!("builder image exited with code {}", code),
        });
    }

    check_installation(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn fake_install(root: &Path) {
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join("libexec/wi4mpi/fakelibOMPI")).unwrap();
        fs::create_dir_all(root.join("etc")).unwrap();
        File::create(root.join("bin/wi4mpi")).unwrap();
        let mut cfg = File::create(root.join("etc/wi4mpi.cfg")).unwrap();
        writeln!(cfg, "# comment line").unwrap();
        writeln!(cfg, "OPENMPI_DEFAULT_ROOT=\"/opt/openmpi\"").unwrap();
        writeln!(cfg, "MPICH_DEFAULT_ROOT=\"\"").unwrap();
    }

    #[test]
    fn test_layout_check() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_installed(tmp.path()));
        assert!(check_installation(tmp.path()).is_err());

        fake_install(tmp.path());
        assert!(is_installed(tmp.path()));
        assert!(check_installation(tmp.path()).is_ok());
    }

    #[test]
    fn test_cfg_parse() {
        let tmp = TempDir::new().unwrap();
        fake_install(tmp.path());
        let config = parse_cfg_file(&tmp.path().join("etc/wi4mpi.cfg"));
        assert_eq!(
            config.get("OPENMPI_DEFAULT_ROOT").map(String::as_str),
            Some("/opt/openmpi")
        );
        assert_eq!(config.get("MPICH_DEFAULT_ROOT").map(String::as_str), Some(""));
    }

    #[test]
    fn test_wrapper_paths() {
        let env = Wi4mpiEnv::new(
            PathBuf::from("/opt/wi4mpi"),
            MpiFamily::OpenMpi,
            MpiFamily::Mpich,
        );
        assert_eq!(
            env.wrapper_library(),
            PathBuf::from("/opt/wi4mpi/libexec/wi4mpi/libwi4mpi_OMPI_MPICH.so")
        );
        let exports = env.exports();
        assert!(exports.contains(&("WI4MPI_FROM".to_string(), "OMPI".to_string())));
    }

    #[test]
    fn test_preload_libraries_globs_fakelib() {
        let tmp = TempDir::new().unwrap();
        fake_install(tmp.path());
        let fakelib = tmp.path().join("libexec/wi4mpi/fakelibOMPI");
        File::create(fakelib.join("libmpi.so")).unwrap();
        File::create(fakelib.join("README")).unwrap();

        let env = Wi4mpiEnv::new(
            tmp.path().to_path_buf(),
            MpiFamily::OpenMpi,
            MpiFamily::Mpich,
        );
        let preload = env.preload_libraries();
        assert_eq!(preload.len(), 1);
        assert!(preload[0].ends_with("libmpi.so"));
    }
}
