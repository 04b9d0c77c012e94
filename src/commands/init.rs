//! `init`: one-shot profile creation for a host MPI installation.
//!
//! Builds a reference launcher invocation (or uses the one given), runs
//! dependency detection on it, names the resulting profile after the MPI
//! vendor and version the launcher reports, and selects it.

use super::detect::{self, DetectArgs};
use super::Context;
use crate::constants::{ENV_MPI_TESTER, INIT_TEMP_PROFILE, MPI_TESTER_BIN};
use crate::containers;
use crate::error::{Error, Result};
use crate::launchers;
use crate::mpi;
use crate::profile::Profile;
use crate::storage::StorageLevel;
use crate::util;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct InitArgs {
    /// Install the resulting profile into the system store under this name.
    pub system: Option<String>,
    /// MPI installation to take the launcher from.
    pub mpi: Option<PathBuf>,
    /// Launcher binary name, `mpirun` by default.
    pub launcher: Option<String>,
    /// Extra launcher arguments for the reference run.
    pub launcher_args: Option<String>,
    pub image: Option<String>,
    pub backend: Option<String>,
    pub source: Option<PathBuf>,
    pub profile: Option<String>,
    pub wi4mpi: Option<PathBuf>,
    /// A fully formed reference command, overriding the options above.
    pub command: Vec<String>,
}

pub async fn init(ctx: &Context, args: InitArgs) -> Result<()> {
    let command = match args.command.is_empty() {
        false => args.command.clone(),
        true => reference_command(&args)?,
    };

    // Detect into a scratch name, renamed once the MPI is identified.
    let scratch = args
        .profile
        .clone()
        .unwrap_or_else(|| INIT_TEMP_PROFILE.to_string());
    if ctx.store.get(&scratch).is_err() {
        ctx.store
            .create(Profile::new(&scratch), StorageLevel::User)?;
    }

    detect::detect(
        ctx,
        DetectArgs {
            profile: Some(scratch.clone()),
            command: command.clone(),
        },
    )
    .await?;

    let mut name = scratch.clone();
    if args.profile.is_none() {
        if let Some(identified) = identify(&command).await {
            let existing: BTreeSet<String> = ctx
                .store
                .list(None)?
                .into_iter()
                .map(|(profile, _)| profile.name)
                .filter(|candidate| *candidate != scratch)
                .collect();
            name = mpi::suffix_name(&identified.to_string(), &existing);
            debug!("Renaming detected profile to {}", name);
        }
    }

    let updated = ctx.store.update(&scratch, |profile| {
        profile.name = name.clone();
        if let Some(image) = &args.image {
            profile.image = Some(image.clone());
        }
        if let Some(backend) = &args.backend {
            profile.backend = Some(backend.clone());
        } else if let Some(image) = &args.image {
            profile.backend = containers::guess_backend(image).map(str::to_owned);
        }
        if let Some(source) = &args.source {
            profile.source = Some(source.clone());
        }
        if let Some(root) = &args.wi4mpi {
            profile.wi4mpi = Some(root.clone());
        }
        Ok(())
    })?;

    if let Some(system_name) = &args.system {
        let mut system_profile = updated.clone();
        system_profile.name = system_name.clone();
        ctx.store.create(system_profile, StorageLevel::System)?;
        info!("Installed system-level profile {}", system_name);
    }

    ctx.store.select(&updated.name)?;
    info!("Initialized and selected profile {}", updated.name);
    Ok(())
}

/// Builds the reference invocation: `<launcher> <args> <probe>` with a
/// two-rank default.
fn reference_command(args: &InitArgs) -> Result<Vec<String>> {
    let launcher_name = args.launcher.as_deref().unwrap_or("mpirun");

    let launcher = match &args.mpi {
        Some(prefix) => {
            let candidate = prefix.join("bin").join(launcher_name);
            candidate
                .is_file()
                .then_some(candidate.clone())
                .ok_or_else(|| Error::ExecutableNotFound(candidate.display().to_string()))?
        }
        None => util::which(launcher_name)
            .ok_or_else(|| Error::ExecutableNotFound(launcher_name.to_string()))?,
    };

    let launcher_args = match &args.launcher_args {
        Some(text) => util::shell_split(text),
        None => vec![
            launchers::process_count_flag(launcher_name).to_string(),
            "2".to_string(),
        ],
    };

    let probe = probe_binary()?;

    let mut command = vec![launcher.display().to_string()];
    command.extend(launcher_args);
    command.push(probe.display().to_string());
    Ok(command)
}

/// Locates the bundled MPI probe: the environment override, a sibling of
/// this executable, or `PATH`.
fn probe_binary() -> Result<PathBuf> {
    if let Some(path) = util::getenv(ENV_MPI_TESTER) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    if let Ok(myself) = std::env::current_exe() {
        if let Some(directory) = myself.parent() {
            let sibling = directory.join(MPI_TESTER_BIN);
            if sibling.is_file() {
                return Ok(sibling);
            }
        }
    }

    util::which(MPI_TESTER_BIN).ok_or_else(|| Error::ExecutableNotFound(format!(
        "{} (give a full reference command instead, e.g. \
         'init mpirun -np 2 ./a.out')",
        MPI_TESTER_BIN
    )))
}

/// Names the MPI from the launcher's version banner.
async fn identify(command: &[String]) -> Option<mpi::MpiIdentifier> {
    let split = launchers::interpret(command);
    let launcher = util::which(split.launcher.first()?)?;

    let output = tokio::process::Command::new(&launcher)
        .arg("--version")
        .output()
        .await
        .ok()?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    mpi::identify_vendor(&text)
}
