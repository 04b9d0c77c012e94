//! Bare-bones driver: no container at all.
//!
//! The rank worker points this driver's bind root at a real host staging
//! directory, so "binding" reduces to planting symlinks there and execing
//! the command directly with the linker environment set. Useful on systems
//! without any container runtime, and for debugging library selection.

use super::{exit_code, ContainerBackend, ContainerJob};
use crate::error::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[derive(Default)]
pub struct BarebonesBackend;

impl BarebonesBackend {
    pub fn new() -> Self {
        Self
    }

    fn command(&self, job: &ContainerJob, command: &[String]) -> Result<Command> {
        // Materialize binds as symlinks; sources already live on the host.
        for bind in job.bound() {
            if bind.source == bind.destination {
                continue;
            }
            if let Some(parent) = bind.destination.parent() {
                fs::create_dir_all(parent)?;
            }
            match std::os::unix::fs::symlink(&bind.source, &bind.destination) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }

        let program = command
            .first()
            .ok_or(crate::error::Error::NoCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(&command[1..]);

        if let Some(preload) = job.ld_preload_value() {
            cmd.env("LD_PRELOAD", preload);
        }
        if let Some(library_path) = job.ld_library_path_value() {
            cmd.env("LD_LIBRARY_PATH", library_path);
        }
        for (key, value) in &job.env {
            cmd.env(key, value);
        }
        for key in &job.unset_env {
            cmd.env_remove(key);
        }

        debug!("barebones command: {:?}", cmd.as_std());
        Ok(cmd)
    }
}

#[async_trait]
impl ContainerBackend for BarebonesBackend {
    fn name(&self) -> &'static str {
        "barebones"
    }

    fn executable(&self) -> Option<&Path> {
        None
    }

    fn is_available(&self) -> bool {
        true
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
