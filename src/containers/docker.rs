//! Docker driver.
//!
//! Dockerized MPI is fragile (the daemon sits between the launcher and the
//! ranks, breaking fd-based PMI handshakes); podman is preferred. The
//! driver is kept for single-node use.

use super::{exit_code, ContainerBackend, ContainerJob};
use crate::config::Configuration;
use crate::constants::ENV_DOCKER_OPTIONS;
use crate::error::{Error, Result};
use crate::util;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub struct DockerBackend {
    executable: Option<PathBuf>,
    options: Vec<String>,
    run_options: Vec<String>,
}

impl DockerBackend {
    pub fn new(config: &Configuration) -> Self {
        let table = config.backend("docker");
        let mut run_options = table.run_options.clone();
        run_options.extend(util::env_options(ENV_DOCKER_OPTIONS));
        Self {
            executable: table.executable.clone().or_else(|| util::which("docker")),
            options: table.options.clone(),
            run_options,
        }
    }

    fn command(&self, job: &ContainerJob, command: &[String]) -> Result<Command> {
        let executable = self
            .executable
            .as_ref()
            .ok_or_else(|| Error::BackendNotAvailable {
                backend: "docker".to_string(),
            })?;
        let image = job.image.as_ref().ok_or_else(|| {
            Error::InvalidArgument("backend 'docker' requires an image".to_string())
        })?;

        let mut cmd = Command::new(executable);
        cmd.args(&self.options);
        cmd.arg("run").arg("--rm");
        if let Ok(cwd) = std::env::current_dir() {
            cmd.arg("--workdir").arg(cwd);
        }
        cmd.args(&self.run_options);

        for bind in job.bound() {
            let mut volume = format!("{}:{}", bind.source.display(), bind.destination.display());
            if bind.mode == super::FileMode::ReadOnly {
                volume.push_str(":ro");
            }
            cmd.arg("-v").arg(volume);
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

        debug!("docker command: {:?}", cmd.as_std());
        Ok(cmd)
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    async fn run(&self, job: &ContainerJob, command: &[String]) -> Result<i32> {
        let mut cmd = self.command(job, command)?;
        let status = cmd.status().await?;
        Ok(exit_code(status))
    }

    async fn capture(&self, job: &ContainerJob, command: &[String]) -> Result<(i32, Vec<u8>)> {
        let mut cmd = self.command(job, command)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());
        let output = cmd.output().await?;
        Ok((exit_code(output.status), output.stdout))
    }
}
