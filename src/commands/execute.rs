//! `__execute`: the per-rank containerization worker.
//!
//! The launcher spawns one of these per rank. Each invocation resolves the
//! final library bind set against the container's own linker view, writes
//! the entry script into a rank-private staging directory, and hands the
//! whole thing to the backend driver. Never exposed in user-facing help.

use super::Context;
use crate::constants::{
    ENV_CONTAINER_DIR, ENV_FILTER, HOST_STAGING_PREFIX, WI4MPI_INSTALL_DIR,
};
use crate::containers::{self, ContainerBackend, ContainerJob, FileMode};
use crate::error::{Error, Result};
use crate::libraries::{
    complete, library_links, tie_break, BindDecision, ContainerInfo, LibrarySet, Resolver,
};
use crate::mpi::MpiFamily;
use crate::template::Entrypoint;
use crate::util;
use crate::wi4mpi::{self, Wi4mpiEnv};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Builder image used to provision a missing translation layer.
const WI4MPI_BUILDER_IMAGE: &str = "ghcr.io/e4s-cl/wi4mpi-builder:latest";

#[derive(Debug, Default)]
pub struct ExecuteArgs {
    /// Profile supplying the defaults; flags below override its fields.
    pub profile: Option<String>,
    pub backend: Option<String>,
    pub image: Option<String>,
    pub libraries: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub source: Option<PathBuf>,
    pub wi4mpi: Option<PathBuf>,
    /// MPI family the contained program was built against; forces
    /// translation.
    pub from: Option<MpiFamily>,
    /// Host MPI family translation targets.
    pub to: Option<MpiFamily>,
    /// The user command.
    pub command: Vec<String>,
}

/// Effective parameters after merging the profile and the flags.
struct Parameters {
    backend: String,
    image: Option<String>,
    libraries: Vec<PathBuf>,
    files: Vec<PathBuf>,
    source: Option<PathBuf>,
    wi4mpi: Option<PathBuf>,
}

fn merge(ctx: &Context, args: &ExecuteArgs) -> Result<Parameters> {
    let profile = match &args.profile {
        Some(name) => Some(ctx.store.get(name)?.0),
        None => ctx.store.selected_profile()?,
    };
    let profile = profile.unwrap_or_default();

    let backend = args
        .backend
        .clone()
        .or(profile.backend)
        .ok_or_else(|| Error::InvalidArgument("no container backend given".to_string()))?;

    let mut libraries: Vec<PathBuf> = profile.libraries.into_iter().collect();
    libraries.extend(args.libraries.iter().cloned());
    let mut files: Vec<PathBuf> = profile.files.into_iter().collect();
    files.extend(args.files.iter().cloned());

    Ok(Parameters {
        backend,
        image: args.image.clone().or(profile.image),
        libraries,
        files,
        source: args.source.clone().or(profile.source),
        wi4mpi: args.wi4mpi.clone().or(profile.wi4mpi),
    })
}

pub async fn execute(ctx: &Context, args: ExecuteArgs) -> Result<()> {
    if args.command.is_empty() {
        return Err(Error::NoCommand);
    }

    let params = merge(ctx, &args)?;
    let driver = containers::backend(&params.backend, &ctx.config)?;
    if !driver.is_available() {
        return Err(Error::BackendNotAvailable {
            backend: params.backend.clone(),
        });
    }

    // Rank-private staging directory holding the entry script (and, for
    // the barebones backend, the whole bind tree).
    let staging = PathBuf::from(HOST_STAGING_PREFIX).join(std::process::id().to_string());
    std::fs::create_dir_all(&staging)?;

    let barebones = driver.name() == "barebones";
    let container_dir = if barebones {
        staging.display().to_string()
    } else {
        util::getenv(ENV_CONTAINER_DIR).unwrap_or_else(|| ctx.config.container_directory.clone())
    };
    let library_dir = format!("{}/hostlibs", container_dir);

    let mut job = ContainerJob::new(params.image.clone());
    for key in ENV_FILTER {
        job.unset_env.insert(key.to_string());
    }

    // User files bind in place, writable.
    for file in &params.files {
        job.bind(file, None, FileMode::ReadWrite);
    }

    // Translation layer, when requested.
    let translation = setup_translation(&args, &params, driver.as_ref()).await?;
    let mut required = params.libraries.clone();
    if let Some(env) = &translation {
        required.push(env.wrapper_library());
        env.import_into(&mut job);
    }

    // Resolve the full library closure, then filter it against the
    // container's own linker view.
    let (mut library_set, skipped) = LibrarySet::from_paths(required.iter());
    for message in &skipped {
        warn!("{}", message);
    }
    let resolver = Resolver::from_environment();
    for soname in complete(&mut library_set, &resolver) {
        warn!("Could not resolve dependency {}", soname);
    }

    let container_info = if barebones || library_set.is_empty() {
        ContainerInfo::default()
    } else {
        probe(driver.as_ref(), &job).await?
    };

    let mut preload = Vec::new();
    for library in library_set.iter() {
        match tie_break(library, &container_info) {
            BindDecision::KeepContainer => {
                debug!(
                    "Keeping the container's copy of {}",
                    library.key()
                );
            }
            BindDecision::BindHost => {
                for link in library_links(&library.host_path) {
                    if let Some(name) = link.file_name() {
                        job.bind(
                            &link,
                            Some(Path::new(&library_dir).join(name)),
                            FileMode::ReadOnly,
                        );
                    }
                }
            }
        }
    }
    if ctx.config.preload_root_libraries {
        for library in library_set.top_level() {
            if let Some(name) = library.realpath.file_name() {
                preload.push(format!("{}/{}", library_dir, name.to_string_lossy()));
            }
        }
    }
    if let Some(env) = &translation {
        for path in env.preload_libraries() {
            preload.push(path.display().to_string());
        }
    }

    // Entry script into the staging directory, bound at the container dir.
    let entrypoint = Entrypoint {
        command: args.command.clone(),
        source_script: params.source.clone(),
        library_dirs: vec![library_dir.clone()],
        preload: preload.clone(),
        wi4mpi: translation.clone(),
        debug_linker: ctx.debug,
    };
    entrypoint.write_to(&staging)?;
    if !barebones {
        job.bind(
            &staging,
            Some(PathBuf::from(&container_dir)),
            FileMode::ReadOnly,
        );
    }

    job.add_ld_library_path(PathBuf::from(&library_dir));
    if ctx.config.preload_root_libraries {
        for path in &preload {
            job.add_ld_preload(PathBuf::from(path));
        }
    }

    let script = format!("{}/entry", container_dir);
    let command = vec![script];

    if ctx.dry_run {
        info!(
            "Would run {:?} in image {:?} via {}",
            command,
            job.image,
            driver.name()
        );
        return Ok(());
    }

    let code = driver.run(&job, &command).await?;
    if code != 0 {
        return Err(Error::CommandFailed(code));
    }
    Ok(())
}

/// Ensures the translation layer is present when `--from` was passed.
async fn setup_translation(
    args: &ExecuteArgs,
    params: &Parameters,
    driver: &dyn ContainerBackend,
) -> Result<Option<Wi4mpiEnv>> {
    let Some(from) = args.from else {
        return Ok(None);
    };
    let to = args.to.unwrap_or_else(|| {
        warn!("No translation target given; assuming the mpich ABI");
        MpiFamily::Mpich
    });

    let root = match &params.wi4mpi {
        Some(root) => root.clone(),
        None => default_wi4mpi_prefix()?,
    };

    if !wi4mpi::is_installed(&root) {
        wi4mpi::ensure_install(&root, driver, WI4MPI_BUILDER_IMAGE).await?;
    }
    wi4mpi::check_installation(&root)?;

    Ok(Some(Wi4mpiEnv::new(root, from, to)))
}

fn default_wi4mpi_prefix() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Internal("cannot determine the home directory".to_string()))?;
    Ok(home
        .join(crate::constants::USER_STORE_DIR)
        .join(WI4MPI_INSTALL_DIR))
}

/// Probes the container with a scratch job carrying only the image, so
/// analysis commands run before the bind set is final.
async fn probe(driver: &dyn ContainerBackend, job: &ContainerJob) -> Result<ContainerInfo> {
    let probe_job = ContainerJob::new(job.image.clone());
    containers::probe_container(driver, &probe_job).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::storage::ProfileStore;
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
    fn test_merge_flags_override_profile() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);

        let mut profile = crate::profile::Profile::new("p");
        profile.backend = Some("podman".to_string());
        profile.image = Some("img:1".to_string());
        ctx.store
            .create(profile, crate::storage::StorageLevel::User)
            .unwrap();

        let args = ExecuteArgs {
            profile: Some("p".to_string()),
            image: Some("img:2".to_string()),
            ..Default::default()
        };
        let params = merge(&ctx, &args).unwrap();
        assert_eq!(params.backend, "podman");
        assert_eq!(params.image.as_deref(), Some("img:2"));
    }

    #[test]
    fn test_merge_requires_backend() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let args = ExecuteArgs::default();
        assert!(merge(&ctx, &args).is_err());
    }
}
