//! Podman driver.
//!
//! Podman's daemonless process model keeps the launcher, the rank and the
//! contained process in one tree, which is what fd-based PMI handshakes
//! expect; it is the preferred OCI backend for MPI. The wrinkle is
//! `--preserve-fds=K`: podman insists on a contiguous, inheritable fd range
//! and refuses to start otherwise, so the driver grooms the fd table before
//! every run.

use super::{exit_code, ContainerBackend, ContainerJob, FileMode};
use crate::config::Configuration;
use crate::constants::ENV_PODMAN_OPTIONS;
use crate::error::{Error, Result};
use crate::util;
use async_trait::async_trait;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub struct PodmanBackend {
    executable: Option<PathBuf>,
    options: Vec<String>,
    run_options: Vec<String>,
}

impl PodmanBackend {
    pub fn new(config: &Configuration) -> Self {
        let table = config.backend("podman");
        let mut run_options = table.run_options.clone();
        run_options.extend(util::env_options(ENV_PODMAN_OPTIONS));
        Self {
            executable: table.executable.clone().or_else(|| util::which("podman")),
            options: table.options.clone(),
            run_options,
        }
    }

    fn command(&self, job: &ContainerJob, command: &[String], preserved: usize) -> Result<Command> {
        let executable = self
            .executable
            .as_ref()
            .ok_or_else(|| Error::BackendNotAvailable {
                backend: "podman".to_string(),
            })?;
        let image = job.image.as_ref().ok_or_else(|| {
            Error::InvalidArgument("backend 'podman' requires an image".to_string())
        })?;

        let mut cmd = Command::new(executable);
        cmd.args(&self.options);
        cmd.arg("run")
            .arg("--rm")
            .arg("--ipc=host")
            .arg("--env-host")
            .arg(format!("--preserve-fds={}", preserved));
        if let Ok(cwd) = std::env::current_dir() {
            cmd.arg("--workdir").arg(cwd);
        }
        cmd.args(&self.run_options);

        for bind in job.bound() {
            let mut mount = format!(
                "--mount=type=bind,src={},dst={}",
                bind.source.display(),
                bind.destination.display()
            );
            if bind.mode == FileMode::ReadOnly {
                mount.push_str(",ro=true");
            }
            cmd.arg(mount);
        }

        if let Some(preload) = job.ld_preload_value() {
            cmd.arg("--env").arg(format!("LD_PRELOAD={}", preload));
        }
        if let Some(library_path) = job.ld_library_path_value() {
            cmd.arg("--env")
                .arg(format!("LD_LIBRARY_PATH={}", library_path));
        }
        for (key, value) in &job.env {
            cmd.arg("--env").arg(format!("{}={}", key, value));
        }
        for key in &job.unset_env {
            cmd.env_remove(key);
        }

        cmd.arg(image);
        cmd.args(command);

        debug!("podman command: {:?}", cmd.as_std());
        Ok(cmd)
    }
}

#[async_trait]
impl ContainerBackend for PodmanBackend {
    fn name(&self) -> &'static str {
        "podman"
    }

    fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    async fn run(&self, job: &ContainerJob, command: &[String]) -> Result<i32> {
        let filler = FdFiller::prepare()?;
        let mut cmd = self.command(job, command, filler.preserved())?;
        let status = cmd.status().await?;
        drop(filler);
        Ok(exit_code(status))
    }

    async fn capture(&self, job: &ContainerJob, command: &[String]) -> Result<(i32, Vec<u8>)> {
        let mut cmd = self.command(job, command, 0)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());
        let output = cmd.output().await?;
        Ok((exit_code(output.status), output.stdout))
    }
}

/// Grooms the process fd table for `--preserve-fds`: marks every open fd
/// above stderr inheritable and plugs the numbering gaps with `/dev/null`
/// so the preserved range is contiguous.
struct FdFiller {
    fillers: Vec<File>,
    preserved: usize,
}

impl FdFiller {
    fn prepare() -> Result<Self> {
        let mut fds: std::collections::BTreeSet<RawFd> = open_fds()?.into_iter().collect();
        for fd in &fds {
            // Clearing close-on-exec lets the launcher-provided PMI fds
            // survive into podman.
            set_inheritable(*fd);
        }

        // open(2) hands out the lowest free descriptor, so opening
        // /dev/null once per gap plugs them in ascending order.
        let mut fillers = Vec::new();
        let highest = fds.iter().copied().max().unwrap_or(2);
        for gap in 3..highest {
            if fds.contains(&gap) {
                continue;
            }
            let null = File::open("/dev/null")?;
            let fd = null.as_raw_fd();
            set_inheritable(fd);
            fds.insert(fd);
            fillers.push(null);
        }

        let preserved = fds.iter().filter(|fd| **fd > 2).count();
        debug!("Preserving {} file descriptors for podman", preserved);
        Ok(Self { fillers, preserved })
    }

    fn preserved(&self) -> usize {
        self.preserved
    }
}

impl Drop for FdFiller {
    fn drop(&mut self) {
        self.fillers.clear();
    }
}

fn set_inheritable(fd: RawFd) {
    // SAFETY: F_SETFD on an fd this process owns; failure is harmless.
    unsafe {
        libc::fcntl(fd, libc::F_SETFD, 0);
    }
}

/// The fds this process currently has open.
fn open_fds() -> Result<Vec<RawFd>> {
    let mut fds = Vec::new();
    for entry in std::fs::read_dir("/proc/self/fd")? {
        let entry = entry?;
        if let Some(fd) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            // The directory iterator's own fd vanishes once it is dropped.
            // SAFETY: F_GETFD only queries flags.
            if unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1 {
                fds.push(fd);
            }
        }
    }
    Ok(fds)
}
