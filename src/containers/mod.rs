//! Container backend drivers.
//!
//! Every supported container technology implements [`ContainerBackend`]:
//! bind-mount a set of files, pass an environment, run a command in an
//! image, forward stdio and the exit status. Each backend is a value
//! constructed from the configuration; drivers hold no mutable state, so
//! concurrent invocations in one process are independent.

pub mod apptainer;
pub mod barebones;
pub mod docker;
pub mod podman;
pub mod shifter;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::libraries::{parse_ldconfig_cache, ContainerInfo, GlibcVersion};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Access mode of a bound file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileMode {
    ReadOnly,
    ReadWrite,
}

impl FileMode {
    /// The mount-option spelling backends understand.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

/// One element of the bind set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BoundFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: FileMode,
}

/// Everything a backend needs to run one contained command: the image, the
/// bind set, the environment and the dynamic-linker knobs.
#[derive(Debug, Clone, Default)]
pub struct ContainerJob {
    /// Backend-specific image identifier.
    pub image: Option<String>,
    binds: BTreeSet<BoundFile>,
    /// Environment to set inside the container.
    pub env: BTreeMap<String, String>,
    /// Variables stripped from the forwarded environment.
    pub unset_env: BTreeSet<String>,
    ld_preload: Vec<PathBuf>,
    ld_library_path: Vec<PathBuf>,
}

impl ContainerJob {
    pub fn new(image: Option<String>) -> Self {
        Self {
            image,
            ..Self::default()
        }
    }

    /// Binds a path. Without a destination the path is bound in place; a
    /// relative spelling with `..` segments binds every directory the walk
    /// references so the original string resolves inside the container.
    pub fn bind(&mut self, source: &Path, destination: Option<PathBuf>, mode: FileMode) {
        match destination {
            Some(destination) => self.add_bind(BoundFile {
                source: source.to_path_buf(),
                destination,
                mode,
            }),
            None => {
                for path in unrelative(source) {
                    self.add_bind(BoundFile {
                        source: path.clone(),
                        destination: path,
                        mode,
                    });
                }
            }
        }
    }

    /// Adds one bind, keeping the set minimal: a bind already covered by a
    /// bound ancestor is dropped (upgrading the ancestor's mode when
    /// needed), and a new bind covering existing ones absorbs them.
    fn add_bind(&mut self, new: BoundFile) {
        fn covers(outer: &BoundFile, inner: &BoundFile) -> bool {
            match (
                inner.source.strip_prefix(&outer.source),
                inner.destination.strip_prefix(&outer.destination),
            ) {
                (Ok(src_rest), Ok(dst_rest)) => src_rest == dst_rest,
                _ => false,
            }
        }

        let covering: Vec<BoundFile> = self
            .binds
            .iter()
            .filter(|existing| covers(existing, &new))
            .cloned()
            .collect();

        if !covering.is_empty() {
            let strongest = covering.iter().map(|b| b.mode).max().unwrap_or(new.mode);
            if strongest < new.mode {
                for mut bind in covering {
                    self.binds.remove(&bind);
                    bind.mode = new.mode;
                    self.binds.insert(bind);
                }
            }
            return;
        }

        let covered: Vec<BoundFile> = self
            .binds
            .iter()
            .filter(|existing| covers(&new, existing))
            .cloned()
            .collect();
        let mut new = new;
        for bind in covered {
            new.mode = new.mode.max(bind.mode);
            self.binds.remove(&bind);
        }
        self.binds.insert(new);
    }

    /// The effective bind set. Binds whose source has disappeared are
    /// reported and skipped.
    pub fn bound(&self) -> impl Iterator<Item = &BoundFile> {
        self.binds.iter().filter(|bind| {
            if bind.source.exists() && bind.destination.is_absolute() {
                true
            } else {
                warn!(
                    "Not binding {} to {}: source missing or destination relative",
                    bind.source.display(),
                    bind.destination.display()
                );
                false
            }
        })
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn add_ld_preload(&mut self, path: PathBuf) {
        if !self.ld_preload.contains(&path) {
            self.ld_preload.push(path);
        }
    }

    pub fn add_ld_library_path(&mut self, path: PathBuf) {
        if !self.ld_library_path.contains(&path) {
            self.ld_library_path.push(path);
        }
    }

    /// `LD_PRELOAD` value for the contained process.
    pub fn ld_preload_value(&self) -> Option<String> {
        join_paths(&self.ld_preload)
    }

    /// `LD_LIBRARY_PATH` value for the contained process.
    pub fn ld_library_path_value(&self) -> Option<String> {
        join_paths(&self.ld_library_path)
    }
}

fn join_paths(paths: &[PathBuf]) -> Option<String> {
    if paths.is_empty() {
        return None;
    }
    Some(
        paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Directories a relative path spelling walks through. Some launchers
/// request files as `/base/container/../lib/../bin/file`; binding only the
/// final target leaves the intermediate directories unresolvable.
fn unrelative(path: &Path) -> Vec<PathBuf> {
    let mut visited = BTreeSet::new();
    visited.insert(path.to_path_buf());
    if let Ok(resolved) = std::fs::canonicalize(path) {
        visited.insert(resolved);
    }

    let components: Vec<_> = path.components().collect();
    for (index, component) in components.iter().enumerate() {
        if matches!(component, std::path::Component::ParentDir) {
            let prefix: PathBuf = components[..index].iter().collect();
            if let Ok(resolved) = std::fs::canonicalize(&prefix) {
                visited.insert(resolved);
            }
        }
    }

    // Drop anything contained in another visited path.
    visited
        .iter()
        .filter(|candidate| {
            !visited
                .iter()
                .any(|other| *candidate != other && candidate.starts_with(other))
        })
        .cloned()
        .collect()
}

// =============================================================================
// Backend Contract
// =============================================================================

/// Uniform contract for running commands inside a container technology.
///
/// Implementations are read-only after construction; nothing is shared
/// between concurrent invocations.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// The backend name.
    fn name(&self) -> &'static str;

    /// The resolved backend executable, when one is needed.
    fn executable(&self) -> Option<&Path>;

    /// Whether the backend binary is usable on this system.
    fn is_available(&self) -> bool {
        self.executable().is_some()
    }

    /// False for backends that can only bind directories; callers must
    /// stage files into a directory and bind that instead.
    fn supports_file_binding(&self) -> bool {
        true
    }

    /// Runs a command in the container, forwarding stdio, and returns the
    /// exit status.
    async fn run(&self, job: &ContainerJob, command: &[String]) -> Result<i32>;

    /// Runs a command in the container, capturing stdout.
    async fn capture(&self, job: &ContainerJob, command: &[String]) -> Result<(i32, Vec<u8>)>;

    /// Best-effort version report from inside an image, used for MPI
    /// family fingerprinting. Failure reads as an empty string.
    async fn image_version_info(&self, image: &str) -> String {
        let job = ContainerJob::new(Some(image.to_string()));
        let probe = [
            "sh".to_string(),
            "-c".to_string(),
            "mpirun --version 2>&1 || mpichversion 2>&1 || true".to_string(),
        ];
        match self.capture(&job, &probe).await {
            Ok((0, stdout)) => String::from_utf8_lossy(&stdout).into_owned(),
            Ok((code, _)) => {
                debug!("Version probe of {} exited with {}", image, code);
                String::new()
            }
            Err(err) => {
                debug!("Version probe of {} failed: {}", image, err);
                String::new()
            }
        }
    }
}

/// Reads the container's own linker view: its ldconfig cache and its glibc
/// version. Drives the host/container library tie-break.
pub async fn probe_container(
    backend: &dyn ContainerBackend,
    job: &ContainerJob,
) -> Result<ContainerInfo> {
    let cache_cmd = ["ldconfig".to_string(), "-p".to_string()];
    let (code, stdout) = backend.capture(job, &cache_cmd).await?;
    if code != 0 {
        return Err(Error::AnalysisFailed(code));
    }
    let cache = parse_ldconfig_cache(&String::from_utf8_lossy(&stdout));

    let version_cmd = [
        "ldconfig".to_string(),
        "--version".to_string(),
    ];
    let libc_version = match backend.capture(job, &version_cmd).await {
        Ok((0, stdout)) => String::from_utf8_lossy(&stdout)
            .lines()
            .next()
            .and_then(GlibcVersion::parse),
        _ => None,
    };

    debug!(
        "Container probe: {} cached sonames, glibc {:?}",
        cache.len(),
        libc_version
    );
    Ok(ContainerInfo {
        cache,
        libc_version,
    })
}

// =============================================================================
// Registry
// =============================================================================

/// Backends listed in help output and completions.
pub const EXPOSED_BACKENDS: &[&str] = &[
    "apptainer",
    "singularity",
    "docker",
    "podman",
    "shifter",
    "barebones",
];

/// Builds the driver for a backend name.
pub fn backend(name: &str, config: &Configuration) -> Result<Box<dyn ContainerBackend>> {
    match name {
        "apptainer" | "singularity" => Ok(Box::new(apptainer::ApptainerBackend::new(
            name == "singularity",
            config,
        ))),
        "docker" => Ok(Box::new(docker::DockerBackend::new(config))),
        "podman" => Ok(Box::new(podman::PodmanBackend::new(config))),
        "shifter" => Ok(Box::new(shifter::ShifterBackend::new(config))),
        "barebones" | "none" => Ok(Box::new(barebones::BarebonesBackend::new())),
        other => Err(Error::BackendUnsupported {
            name: other.to_string(),
            available: EXPOSED_BACKENDS.join(", "),
        }),
    }
}

/// Guesses a backend from an image identifier's suffix.
pub fn guess_backend(image: &str) -> Option<&'static str> {
    match Path::new(image).extension().and_then(|e| e.to_str()) {
        Some("sif") | Some("simg") => Some("apptainer"),
        _ => None,
    }
}

/// Exit status of a finished backend process, folding signals into the
/// conventional 128+N form.
pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}
