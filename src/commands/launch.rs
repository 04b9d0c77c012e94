//! `launch`: the user-facing front of the pipeline.
//!
//! Splits the user command at the launcher boundary, resolves the effective
//! profile, decides whether ABI translation is needed, and re-invokes this
//! executable's private `__execute` subcommand as the program every rank
//! runs. The launcher's own fork-exec machinery provides the per-rank
//! parallelism; this process only waits and forwards signals.

use super::Context;
use crate::constants::{EXECUTE_SUBCOMMAND, SIGNAL_GRACE_PERIOD};
use crate::containers;
use crate::error::{Error, Result};
use crate::launchers;
use crate::mpi::{self, MpiFamily};
use crate::profile::Profile;
use crate::util;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct LaunchArgs {
    pub profile: Option<String>,
    pub image: Option<String>,
    pub backend: Option<String>,
    pub libraries: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub source: Option<PathBuf>,
    pub wi4mpi: Option<PathBuf>,
    /// Forces translation from the given family.
    pub from: Option<MpiFamily>,
    /// The launcher command: `LAUNCHER [ARGS] [--] PROGRAM [ARGS]`.
    pub command: Vec<String>,
}

/// Launch parameters after merging the profile and the flags. The flags
/// win over the profile's fields.
struct Parameters {
    profile_name: Option<String>,
    backend: String,
    image: Option<String>,
    libraries: Vec<PathBuf>,
    files: Vec<PathBuf>,
    source: Option<PathBuf>,
    wi4mpi: Option<PathBuf>,
    wi4mpi_options: Option<String>,
}

fn resolve_parameters(ctx: &Context, args: &LaunchArgs) -> Result<Parameters> {
    let profile = match &args.profile {
        Some(name) => Some(ctx.store.get(name)?.0),
        None => {
            let selected = ctx.store.selected_profile()?;
            if let Some(profile) = &selected {
                info!("Using selected profile {}", profile.name);
            }
            selected
        }
    };
    let profile_name = profile.as_ref().map(|p| p.name.clone());
    let profile = profile.unwrap_or_else(Profile::default);

    let image = args.image.clone().or(profile.image);
    let backend = args
        .backend
        .clone()
        .or(profile.backend)
        .or_else(|| image.as_deref().and_then(|i| {
            containers::guess_backend(i).map(str::to_owned)
        }))
        .ok_or_else(|| {
            Error::InvalidArgument(
                "missing field: 'backend'. Specify it with --backend or by \
                 selecting a profile"
                    .to_string(),
            )
        })?;

    if image.is_none() && backend != "barebones" {
        return Err(Error::InvalidArgument(
            "missing field: 'image'. Specify it with --image or by selecting \
             a profile"
                .to_string(),
        ));
    }

    Ok(Parameters {
        profile_name,
        backend,
        image,
        libraries: args.libraries.clone(),
        files: args.files.clone(),
        source: args.source.clone().or(profile.source),
        wi4mpi: args.wi4mpi.clone().or(profile.wi4mpi),
        wi4mpi_options: profile.wi4mpi_options,
    })
}

pub async fn launch(ctx: &Context, args: LaunchArgs) -> Result<()> {
    if args.command.is_empty() {
        return Err(Error::NoCommand);
    }

    let params = resolve_parameters(ctx, &args)?;
    let split = launchers::interpret(&args.command);
    if split.launcher.is_empty() && split.program.is_empty() {
        return Err(Error::NoCommand);
    }

    // The launcher needs its spool/credential directories visible inside
    // the containers.
    let mut files = params.files.clone();
    for directory in launchers::reserved_directories(&split.launcher) {
        if directory.exists() && !files.contains(&directory) {
            files.push(directory);
        }
    }

    let translation = translation_plan(&args, &params, &split, ctx).await?;

    // Rewrite the program: every rank runs `__execute` around the original
    // program vector.
    let execute = format_execute(&params, &files, &translation)?;
    let mut command = Vec::new();
    command.extend(split.launcher.iter().cloned());
    command.extend(ctx.config.launcher_options.iter().cloned());
    if translation.is_some() {
        if let Some(options) = &params.wi4mpi_options {
            command.extend(util::shell_split(options));
        }
    }
    command.extend(execute);
    command.extend(split.program.iter().cloned());

    if ctx.dry_run {
        println!("{}", command.join(" "));
        return Ok(());
    }

    debug!("Launching: {:?}", command);
    let code = run_launcher(&command).await?;
    if code != 0 {
        return Err(Error::CommandFailed(code));
    }
    Ok(())
}

/// Decides whether translation is needed and between which families.
async fn translation_plan(
    args: &LaunchArgs,
    params: &Parameters,
    split: &launchers::Split,
    ctx: &Context,
) -> Result<Option<(MpiFamily, MpiFamily)>> {
    let host_family = match split.launcher.first() {
        Some(binary) => match util::which(binary) {
            Some(path) => mpi::launcher_family(&path).await,
            None => return Err(Error::ExecutableNotFound(binary.clone())),
        },
        None => None,
    };

    if let Some(from) = args.from {
        // Explicit --from: translate, unless the families already match,
        // in which case the linker alone reconciles them.
        if host_family == Some(from) {
            debug!(
                "Host and requested families both {}; skipping translation",
                from
            );
            return Ok(None);
        }
        return Ok(Some((from, host_family.unwrap_or(MpiFamily::Mpich))));
    }

    let (Some(host_family), Some(image)) = (host_family, params.image.as_deref()) else {
        return Ok(None);
    };

    let driver = containers::backend(&params.backend, &ctx.config)?;
    if !driver.is_available() {
        return Ok(None);
    }
    let container_family = mpi::match_family(&driver.image_version_info(image).await);

    match container_family {
        Some(container_family) if container_family != host_family => {
            info!(
                "Translating the {} ABI to the host's {} runtime",
                container_family, host_family
            );
            Ok(Some((container_family, host_family)))
        }
        Some(_) => Ok(None),
        None => {
            debug!("Could not identify the image's MPI family; not translating");
            Ok(None)
        }
    }
}

/// Builds the `__execute` argument vector injected before the program.
fn format_execute(
    params: &Parameters,
    files: &[PathBuf],
    translation: &Option<(MpiFamily, MpiFamily)>,
) -> Result<Vec<String>> {
    let myself = std::env::current_exe()?;
    let mut command = vec![myself.display().to_string(), EXECUTE_SUBCOMMAND.to_string()];

    if let Some(name) = &params.profile_name {
        command.push("--profile".to_string());
        command.push(name.clone());
    }
    command.push("--backend".to_string());
    command.push(params.backend.clone());
    if let Some(image) = &params.image {
        command.push("--image".to_string());
        command.push(image.clone());
    }
    if let Some(source) = &params.source {
        command.push("--source".to_string());
        command.push(source.display().to_string());
    }
    if let Some(root) = &params.wi4mpi {
        command.push("--wi4mpi".to_string());
        command.push(root.display().to_string());
    }
    if !params.libraries.is_empty() {
        command.push("--libraries".to_string());
        command.push(join_paths(&params.libraries));
    }
    if !files.is_empty() {
        command.push("--files".to_string());
        command.push(join_paths(files));
    }
    if let Some((from, to)) = translation {
        command.push("--from".to_string());
        command.push(from.as_str().to_string());
        command.push("--to".to_string());
        command.push(to.as_str().to_string());
    }

    command.push("--".to_string());
    Ok(command)
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Runs the rewritten launcher command in its own process group, forwarding
/// SIGINT/SIGTERM to the group and escalating to SIGKILL after the grace
/// period.
async fn run_launcher(command: &[String]) -> Result<i32> {
    let program =
        util::which(&command[0]).ok_or_else(|| Error::ExecutableNotFound(command[0].clone()))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(&command[1..]);
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;
    let pgid = child.id().map(|id| Pid::from_raw(id as i32));

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let mut terminated = false;
    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                return Ok(containers::exit_code(status));
            }
            _ = sigint.recv() => {
                forward_signal(pgid, &mut terminated);
            }
            _ = sigterm.recv() => {
                forward_signal(pgid, &mut terminated);
            }
            _ = tokio::time::sleep(SIGNAL_GRACE_PERIOD), if terminated => {
                if let Some(pgid) = pgid {
                    warn!("Launcher still running after the grace period, killing it");
                    let _ = killpg(pgid, Signal::SIGKILL);
                }
            }
        }
    }
}

fn forward_signal(pgid: Option<Pid>, terminated: &mut bool) {
    if let Some(pgid) = pgid {
        debug!("Forwarding termination to the launcher's process group");
        let _ = killpg(pgid, Signal::SIGTERM);
        *terminated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::storage::{ProfileStore, StorageLevel};
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> Context {
        Context {
            config: Configuration::default(),
            store: ProfileStore::with_paths(
                tmp.path().join("user.json"),
                tmp.path().join("system.json"),
            ),
            dry_run: true,
            debug: false,
        }
    }

    #[test]
    fn test_parameters_require_backend_and_image() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let args = LaunchArgs::default();
        assert!(resolve_parameters(&ctx, &args).is_err());
    }

    #[test]
    fn test_backend_guessed_from_image_suffix() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let args = LaunchArgs {
            image: Some("/images/app.sif".to_string()),
            ..Default::default()
        };
        let params = resolve_parameters(&ctx, &args).unwrap();
        assert_eq!(params.backend, "apptainer");
    }

    #[test]
    fn test_profile_supplies_defaults() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let mut profile = Profile::new("mpich");
        profile.backend = Some("podman".to_string());
        profile.image = Some("img:1".to_string());
        ctx.store.create(profile, StorageLevel::User).unwrap();
        ctx.store.select("mpich").unwrap();

        let params = resolve_parameters(&ctx, &LaunchArgs::default()).unwrap();
        assert_eq!(params.profile_name.as_deref(), Some("mpich"));
        assert_eq!(params.backend, "podman");
    }

    #[test]
    fn test_format_execute_shape() {
        let params = Parameters {
            profile_name: Some("p".to_string()),
            backend: "apptainer".to_string(),
            image: Some("app.sif".to_string()),
            libraries: Vec::new(),
            files: vec![PathBuf::from("/var/spool/slurm")],
            source: None,
            wi4mpi: None,
            wi4mpi_options: None,
        };
        let command = format_execute(
            &params,
            &params.files,
            &Some((MpiFamily::OpenMpi, MpiFamily::Mpich)),
        )
        .unwrap();

        assert_eq!(command[1], EXECUTE_SUBCOMMAND);
        assert!(command.contains(&"--profile".to_string()));
        assert!(command.contains(&"--from".to_string()));
        assert!(command.contains(&"openmpi".to_string()));
        assert_eq!(command.last().unwrap(), "--");
    }
}
