//! Apptainer driver, doubling as the Singularity driver.
//!
//! The two runtimes share a command-line surface; only the executable name
//! and the environment-variable prefixes differ.

use super::{exit_code, ContainerBackend, ContainerJob};
use crate::config::Configuration;
use crate::constants::{ENV_APPTAINER_OPTIONS, ENV_SINGULARITY_OPTIONS};
use crate::error::{Error, Result};
use crate::libraries;
use crate::util;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub struct ApptainerBackend {
    flavor: &'static str,
    executable: Option<PathBuf>,
    options: Vec<String>,
    exec_options: Vec<String>,
}

impl ApptainerBackend {
    pub fn new(singularity: bool, config: &Configuration) -> Self {
        let (flavor, env_var) = if singularity {
            ("singularity", ENV_SINGULARITY_OPTIONS)
        } else {
            ("apptainer", ENV_APPTAINER_OPTIONS)
        };
        let table = config.backend(flavor);
        let executable = table
            .executable
            .clone()
            .or_else(|| util::which(flavor));

        let mut exec_options = table.run_options.clone();
        exec_options.extend(util::env_options(env_var));

        Self {
            flavor,
            executable,
            options: table.options.clone(),
            exec_options,
        }
    }

    fn env_prefix(&self) -> &'static str {
        if self.flavor == "singularity" {
            "SINGULARITYENV_"
        } else {
            "APPTAINERENV_"
        }
    }

    fn bind_variable(&self) -> &'static str {
        if self.flavor == "singularity" {
            "SINGULARITY_BIND"
        } else {
            "APPTAINER_BIND"
        }
    }

    fn command(&self, job: &ContainerJob, command: &[String]) -> Result<Command> {
        let executable = self.executable.as_ref().ok_or_else(|| {
            Error::BackendNotAvailable {
                backend: self.flavor.to_string(),
            }
        })?;
        let image = job.image.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!("backend '{}' requires an image", self.flavor))
        })?;
        if image.contains('/') && !Path::new(image).exists() && !image.contains("://") {
            return Err(Error::ImageNotFound {
                image: image.clone(),
                backend: self.flavor.to_string(),
            });
        }

        let mut cmd = Command::new(executable);
        cmd.args(&self.options);
        cmd.arg("exec");
        if let Ok(cwd) = std::env::current_dir() {
            cmd.arg("--pwd").arg(cwd);
        }
        // Nvidia passthrough when the host linker knows about the driver
        // libraries.
        if libraries::host_cache().keys().any(|k| k.contains("nvidia")) {
            cmd.arg("--nv");
        }
        cmd.args(&self.exec_options);
        cmd.arg(image);
        cmd.args(command);

        let binds: Vec<String> = job
            .bound()
            .map(|b| {
                format!(
                    "{}:{}:{}",
                    b.source.display(),
                    b.destination.display(),
                    b.mode.as_str()
                )
            })
            .collect();
        if !binds.is_empty() {
            cmd.env(self.bind_variable(), binds.join(","));
        }

        let prefix = self.env_prefix();
        if let Some(preload) = job.ld_preload_value() {
            cmd.env(format!("{}LD_PRELOAD", prefix), preload);
        }
        let mut library_path: Vec<String> = job
            .ld_library_path_value()
            .map(|v| vec![v])
            .unwrap_or_default();
        // The runtime's own injected libraries stay reachable.
        library_path.push("/.singularity.d/libs".to_string());
        cmd.env(
            format!("{}LD_LIBRARY_PATH", prefix),
            library_path.join(":"),
        );

        for (key, value) in &job.env {
            cmd.env(format!("{}{}", prefix, key), value);
        }
        for key in &job.unset_env {
            cmd.env_remove(key);
        }

        debug!("{} command: {:?}", self.flavor, cmd.as_std());
        Ok(cmd)
    }
}

#[async_trait]
impl ContainerBackend for ApptainerBackend {
    fn name(&self) -> &'static str {
        self.flavor
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
