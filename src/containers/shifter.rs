//! Shifter driver.
//!
//! Shifter only binds directories. Files destined for the in-container
//! bind root are staged by copy into a temporary directory which is bound
//! wholesale; other directory binds map to `--volume`. Loose file binds
//! outside the bind root cannot be honored and are reported.

use super::{exit_code, ContainerBackend, ContainerJob};
use crate::config::Configuration;
use crate::constants::{CONTAINER_DIR, ENV_SHIFTER_OPTIONS};
use crate::error::{Error, Result};
use crate::util;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, warn};

pub struct ShifterBackend {
    executable: Option<PathBuf>,
    options: Vec<String>,
}

impl ShifterBackend {
    pub fn new(config: &Configuration) -> Self {
        let table = config.backend("shifter");
        let mut options = table.options.clone();
        options.extend(table.run_options.clone());
        options.extend(util::env_options(ENV_SHIFTER_OPTIONS));
        Self {
            executable: table.executable.clone().or_else(|| util::which("shifter")),
            options,
        }
    }

    /// Stages bind-root files into `staging` and formats the volume list.
    fn volumes(&self, job: &ContainerJob, staging: &Path) -> Result<Vec<String>> {
        let mut volumes = vec![format!("--volume={}:{}", staging.display(), CONTAINER_DIR)];

        for bind in job.bound() {
            if let Ok(rebased) = bind.destination.strip_prefix(CONTAINER_DIR) {
                let target = staging.join(rebased);
                debug!(
                    "Staging {} at {} for {}",
                    bind.source.display(),
                    target.display(),
                    bind.destination.display()
                );
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                copy_recursively(&bind.source, &target)?;
            } else if bind.source.is_dir() {
                if bind.destination.starts_with("/etc") {
                    error!("Shifter cannot bind over '/etc'; skipping {}",
                        bind.destination.display());
                    continue;
                }
                volumes.push(format!(
                    "--volume={}:{}",
                    bind.source.display(),
                    bind.destination.display()
                ));
            } else {
                warn!(
                    "Shifter does not support file binding; {} will not be \
                     visible in the container",
                    bind.source.display()
                );
            }
        }

        Ok(volumes)
    }

    fn command(&self, job: &ContainerJob, command: &[String], staging: &Path) -> Result<Command> {
        let executable = self
            .executable
            .as_ref()
            .ok_or_else(|| Error::BackendNotAvailable {
                backend: "shifter".to_string(),
            })?;
        let image = job.image.as_ref().ok_or_else(|| {
            Error::InvalidArgument("backend 'shifter' requires an image".to_string())
        })?;

        let mut cmd = Command::new(executable);
        cmd.arg(format!("--image={}", image));
        cmd.args(&self.options);

        if let Some(preload) = job.ld_preload_value() {
            cmd.arg(format!("--env=LD_PRELOAD={}", preload));
        }
        if let Some(library_path) = job.ld_library_path_value() {
            cmd.arg(format!("--env=LD_LIBRARY_PATH={}", library_path));
        }
        for (key, value) in &job.env {
            cmd.arg(format!("--env={}={}", key, value));
        }
        for key in &job.unset_env {
            cmd.env_remove(key);
        }

        cmd.args(self.volumes(job, staging)?);
        cmd.args(command);

        debug!("shifter command: {:?}", cmd.as_std());
        Ok(cmd)
    }
}

#[async_trait]
impl ContainerBackend for ShifterBackend {
    fn name(&self) -> &'static str {
        "shifter"
    }

    fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    fn supports_file_binding(&self) -> bool {
        false
    }

    async fn run(&self, job: &ContainerJob, command: &[String]) -> Result<i32> {
        let staging = tempfile::tempdir()?;
        let mut cmd = self.command(job, command, staging.path())?;
        let status = cmd.status().await?;
        Ok(exit_code(status))
    }

    async fn capture(&self, job: &ContainerJob, command: &[String]) -> Result<(i32, Vec<u8>)> {
        let staging = tempfile::tempdir()?;
        let mut cmd = self.command(job, command, staging.path())?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());
        let output = cmd.output().await?;
        Ok((exit_code(output.status), output.stdout))
    }
}

fn copy_recursively(source: &Path, target: &Path) -> Result<()> {
    if source.is_dir() {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &target.join(entry.file_name()))?;
        }
    } else {
        fs::copy(source, target)?;
    }
    Ok(())
}
