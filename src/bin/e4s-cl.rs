//! e4s-cl - MPI container launcher CLI
//!
//! ## Usage
//!
//! ```sh
//! e4s-cl init [--mpi PATH] [--launcher BIN] [--profile NAME]
//! e4s-cl launch [--profile NAME] LAUNCHER [ARGS] [--] PROGRAM [ARGS]
//! e4s-cl profile {create|copy|delete|edit|list|show|select|unselect|detect|dump|diff} …
//! ```
//!
//! The `__execute` subcommand is the per-rank worker `launch` injects into
//! the MPI launcher's command line; it is intentionally absent from help.

use e4s_cl::commands::detect::DetectArgs;
use e4s_cl::commands::execute::ExecuteArgs;
use e4s_cl::commands::init::InitArgs;
use e4s_cl::commands::launch::LaunchArgs;
use e4s_cl::commands::{self, Context};
use e4s_cl::config::Configuration;
use e4s_cl::constants::EXECUTE_SUBCOMMAND;
use e4s_cl::error::{Error, Result};
use e4s_cl::mpi::MpiFamily;
use e4s_cl::profile::ProfilePatch;
use e4s_cl::storage::{ProfileStore, StorageLevel};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Model
// =============================================================================

#[derive(Debug)]
enum Command {
    Init(InitArgs),
    Launch(LaunchArgs),
    Execute(ExecuteArgs),
    ProfileCreate {
        name: String,
        system: bool,
        patch: ProfilePatch,
    },
    ProfileCopy {
        source: String,
        destination: String,
    },
    ProfileDelete {
        name: String,
    },
    ProfileEdit {
        name: String,
        patch: ProfilePatch,
    },
    ProfileList {
        level: Option<StorageLevel>,
    },
    ProfileShow {
        name: Option<String>,
    },
    ProfileSelect {
        name: String,
    },
    ProfileUnselect,
    ProfileDetect(DetectArgs),
    ProfileDump {
        level: StorageLevel,
    },
    ProfileDiff {
        left: String,
        right: String,
    },
    Version,
    Help,
}

#[derive(Debug, Default)]
struct GlobalFlags {
    verbose: bool,
    dry_run: bool,
}

// =============================================================================
// Parsing
// =============================================================================

/// Argument cursor over the raw argv tail.
struct Arguments {
    tokens: Vec<String>,
    position: usize,
}

impl Arguments {
    fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.position).map(String::as_str)
    }

    fn next(&mut self) -> Option<String> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// The value following an option flag.
    fn value(&mut self, flag: &str) -> Result<String> {
        self.next()
            .ok_or_else(|| Error::InvalidArgument(format!("{} requires a value", flag)))
    }

    fn paths(&mut self, flag: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .value(flag)?
            .split(',')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Everything left, dropping one leading `--`.
    fn remainder(&mut self) -> Vec<String> {
        if self.peek() == Some("--") {
            self.position += 1;
        }
        let rest = self.tokens[self.position..].to_vec();
        self.position = self.tokens.len();
        rest
    }
}

fn parse_family(flag: &str, value: &str) -> Result<MpiFamily> {
    MpiFamily::from_cli(value).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "{} must be one of openmpi, mpich, mvapich, intel (got '{}')",
            flag, value
        ))
    })
}

fn parse_args(argv: Vec<String>) -> Result<(GlobalFlags, Command)> {
    let mut flags = GlobalFlags::default();
    let mut arguments = Arguments::new(argv);

    let subcommand = loop {
        match arguments.next() {
            Some(token) => match token.as_str() {
                "-v" | "--verbose" => flags.verbose = true,
                "--dry-run" => flags.dry_run = true,
                "-h" | "--help" | "help" => return Ok((flags, Command::Help)),
                "-V" | "--version" | "version" => return Ok((flags, Command::Version)),
                _ => break token,
            },
            None => return Ok((flags, Command::Help)),
        }
    };

    let command = match subcommand.as_str() {
        "init" => Command::Init(parse_init(&mut arguments)?),
        "launch" => Command::Launch(parse_launch(&mut arguments)?),
        sub if sub == EXECUTE_SUBCOMMAND => Command::Execute(parse_execute(&mut arguments)?),
        "profile" => parse_profile(&mut arguments)?,
        unknown => {
            return Err(Error::InvalidArgument(format!(
                "unknown command: {}",
                unknown
            )))
        }
    };

    Ok((flags, command))
}

fn parse_init(arguments: &mut Arguments) -> Result<InitArgs> {
    let mut args = InitArgs::default();
    while let Some(token) = arguments.peek().map(str::to_owned) {
        match token.as_str() {
            "--system" => {
                arguments.next();
                args.system = Some(arguments.value("--system")?);
            }
            "--mpi" => {
                arguments.next();
                args.mpi = Some(PathBuf::from(arguments.value("--mpi")?));
            }
            "--launcher" => {
                arguments.next();
                args.launcher = Some(arguments.value("--launcher")?);
            }
            "--launcher_args" | "--launcher-args" => {
                arguments.next();
                args.launcher_args = Some(arguments.value("--launcher_args")?);
            }
            "--image" => {
                arguments.next();
                args.image = Some(arguments.value("--image")?);
            }
            "--backend" => {
                arguments.next();
                args.backend = Some(arguments.value("--backend")?);
            }
            "--source" => {
                arguments.next();
                args.source = Some(PathBuf::from(arguments.value("--source")?));
            }
            "--profile" => {
                arguments.next();
                args.profile = Some(arguments.value("--profile")?);
            }
            "--wi4mpi" => {
                arguments.next();
                args.wi4mpi = Some(PathBuf::from(arguments.value("--wi4mpi")?));
            }
            _ => {
                args.command = arguments.remainder();
            }
        }
    }
    Ok(args)
}

fn parse_launch(arguments: &mut Arguments) -> Result<LaunchArgs> {
    let mut args = LaunchArgs::default();
    while let Some(token) = arguments.peek().map(str::to_owned) {
        match token.as_str() {
            "--profile" => {
                arguments.next();
                args.profile = Some(arguments.value("--profile")?);
            }
            "--image" => {
                arguments.next();
                args.image = Some(arguments.value("--image")?);
            }
            "--backend" => {
                arguments.next();
                args.backend = Some(arguments.value("--backend")?);
            }
            "--libraries" => {
                arguments.next();
                args.libraries = arguments.paths("--libraries")?;
            }
            "--files" => {
                arguments.next();
                args.files = arguments.paths("--files")?;
            }
            "--source" => {
                arguments.next();
                args.source = Some(PathBuf::from(arguments.value("--source")?));
            }
            "--wi4mpi" => {
                arguments.next();
                args.wi4mpi = Some(PathBuf::from(arguments.value("--wi4mpi")?));
            }
            "--from" => {
                arguments.next();
                let value = arguments.value("--from")?;
                args.from = Some(parse_family("--from", &value)?);
            }
            _ => {
                args.command = arguments.remainder();
            }
        }
    }
    Ok(args)
}

fn parse_execute(arguments: &mut Arguments) -> Result<ExecuteArgs> {
    let mut args = ExecuteArgs::default();
    while let Some(token) = arguments.peek().map(str::to_owned) {
        match token.as_str() {
            "--profile" => {
                arguments.next();
                args.profile = Some(arguments.value("--profile")?);
            }
            "--backend" => {
                arguments.next();
                args.backend = Some(arguments.value("--backend")?);
            }
            "--image" => {
                arguments.next();
                args.image = Some(arguments.value("--image")?);
            }
            "--libraries" => {
                arguments.next();
                args.libraries = arguments.paths("--libraries")?;
            }
            "--files" => {
                arguments.next();
                args.files = arguments.paths("--files")?;
            }
            "--source" => {
                arguments.next();
                args.source = Some(PathBuf::from(arguments.value("--source")?));
            }
            "--wi4mpi" => {
                arguments.next();
                args.wi4mpi = Some(PathBuf::from(arguments.value("--wi4mpi")?));
            }
            "--from" => {
                arguments.next();
                let value = arguments.value("--from")?;
                args.from = Some(parse_family("--from", &value)?);
            }
            "--to" => {
                arguments.next();
                let value = arguments.value("--to")?;
                args.to = Some(parse_family("--to", &value)?);
            }
            _ => {
                args.command = arguments.remainder();
            }
        }
    }
    Ok(args)
}

fn parse_patch(arguments: &mut Arguments) -> Result<(ProfilePatch, bool)> {
    let mut patch = ProfilePatch::default();
    let mut system = false;
    while let Some(token) = arguments.next() {
        match token.as_str() {
            "--system" => system = true,
            "--name" => patch.rename = Some(arguments.value("--name")?),
            "--backend" => patch.backend = Some(arguments.value("--backend")?),
            "--image" => patch.image = Some(arguments.value("--image")?),
            "--source" => patch.source = Some(PathBuf::from(arguments.value("--source")?)),
            "--wi4mpi" => patch.wi4mpi = Some(PathBuf::from(arguments.value("--wi4mpi")?)),
            "--wi4mpi-options" | "--wi4mpi_options" => {
                patch.wi4mpi_options = Some(arguments.value("--wi4mpi-options")?)
            }
            "--libraries" | "--add-libraries" => {
                patch.add_libraries.extend(arguments.paths(&token)?)
            }
            "--remove-libraries" => patch.remove_libraries.extend(arguments.paths(&token)?),
            "--files" | "--add-files" => patch.add_files.extend(arguments.paths(&token)?),
            "--remove-files" => patch.remove_files.extend(arguments.paths(&token)?),
            unknown => {
                return Err(Error::InvalidArgument(format!(
                    "unknown option: {}",
                    unknown
                )))
            }
        }
    }
    Ok((patch, system))
}

fn parse_profile(arguments: &mut Arguments) -> Result<Command> {
    let action = arguments
        .next()
        .ok_or_else(|| Error::InvalidArgument("profile requires a subcommand".to_string()))?;

    let command = match action.as_str() {
        "create" => {
            let name = arguments.value("profile create")?;
            let (patch, system) = parse_patch(arguments)?;
            Command::ProfileCreate {
                name,
                system,
                patch,
            }
        }
        "copy" => Command::ProfileCopy {
            source: arguments.value("profile copy")?,
            destination: arguments.value("profile copy")?,
        },
        "delete" => Command::ProfileDelete {
            name: arguments.value("profile delete")?,
        },
        "edit" => {
            let name = arguments.value("profile edit")?;
            let (patch, _) = parse_patch(arguments)?;
            Command::ProfileEdit { name, patch }
        }
        "list" => {
            let level = match arguments.next().as_deref() {
                Some("--system") => Some(StorageLevel::System),
                Some("--user") => Some(StorageLevel::User),
                Some(other) => {
                    return Err(Error::InvalidArgument(format!(
                        "unknown option: {}",
                        other
                    )))
                }
                None => None,
            };
            Command::ProfileList { level }
        }
        "show" => Command::ProfileShow {
            name: arguments.next(),
        },
        "select" => Command::ProfileSelect {
            name: arguments.value("profile select")?,
        },
        "unselect" => Command::ProfileUnselect,
        "detect" => {
            let mut profile = None;
            while let Some(token) = arguments.peek().map(str::to_owned) {
                match token.as_str() {
                    "-p" | "--profile" => {
                        arguments.next();
                        profile = Some(arguments.value("--profile")?);
                    }
                    _ => break,
                }
            }
            Command::ProfileDetect(DetectArgs {
                profile,
                command: arguments.remainder(),
            })
        }
        "dump" => {
            let level = match arguments.next().as_deref() {
                Some("--system") => StorageLevel::System,
                _ => StorageLevel::User,
            };
            Command::ProfileDump { level }
        }
        "diff" => Command::ProfileDiff {
            left: arguments.value("profile diff")?,
            right: arguments.value("profile diff")?,
        },
        unknown => {
            return Err(Error::InvalidArgument(format!(
                "unknown profile subcommand: {}",
                unknown
            )))
        }
    };
    Ok(command)
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(flags: &GlobalFlags, config: &Configuration, is_rank: bool) {
    let default = if is_rank && config.disable_ranked_log {
        "e4s_cl=error"
    } else if flags.verbose {
        "e4s_cl=debug"
    } else {
        "e4s_cl=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// =============================================================================
// Main
// =============================================================================

async fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Init(args) => commands::init::init(ctx, args).await,
        Command::Launch(args) => commands::launch::launch(ctx, args).await,
        Command::Execute(args) => commands::execute::execute(ctx, args).await,
        Command::ProfileCreate {
            name,
            system,
            patch,
        } => {
            let level = if system {
                StorageLevel::System
            } else {
                StorageLevel::User
            };
            commands::profile::create(ctx, &name, level, &patch)
        }
        Command::ProfileCopy {
            source,
            destination,
        } => commands::profile::copy(ctx, &source, &destination),
        Command::ProfileDelete { name } => commands::profile::delete(ctx, &name),
        Command::ProfileEdit { name, patch } => commands::profile::edit(ctx, &name, &patch),
        Command::ProfileList { level } => commands::profile::list(ctx, level),
        Command::ProfileShow { name } => commands::profile::show(ctx, name.as_deref()),
        Command::ProfileSelect { name } => commands::profile::select(ctx, &name),
        Command::ProfileUnselect => commands::profile::unselect(ctx),
        Command::ProfileDetect(args) => commands::detect::detect(ctx, args).await,
        Command::ProfileDump { level } => commands::profile::dump(ctx, level),
        Command::ProfileDiff { left, right } => commands::profile::diff(ctx, &left, &right),
        Command::Version | Command::Help => unreachable!("handled before dispatch"),
    }
}

fn print_version() {
    println!("e4s-cl version {}", env!("CARGO_PKG_VERSION"));
}

fn print_help() {
    println!(
        r#"e4s-cl - run MPI programs in containers with the host MPI runtime

USAGE:
    e4s-cl [-v] [--dry-run] <command> [options]

COMMANDS:
    init [options] [command]         Detect a host MPI and create a profile
    launch [options] <launcher command>
                                     Launch an MPI command in containers
    profile create <name>            Create an empty profile
    profile copy <src> <dst>         Duplicate a profile
    profile delete <name>            Remove a profile
    profile edit <name> [options]    Modify a profile's fields
    profile list [--system|--user]   List profiles
    profile show [name]              Print a profile
    profile select <name>            Mark a profile as selected
    profile unselect                 Clear the selection
    profile detect [-p name] <cmd>   Trace a command into a profile
    profile dump [--system]          Print a store document
    profile diff <a> <b>             Compare two profiles
    version                          Show version info
    help                             Show this help

LAUNCH OPTIONS:
    --profile <name>      Profile to use (defaults to the selection)
    --image <id>          Container image
    --backend <name>      apptainer, singularity, docker, podman, shifter,
                          barebones
    --libraries <l1,l2>   Extra libraries to make available
    --files <f1,f2>       Extra files to bind
    --source <script>     Script sourced in the container first
    --from <family>       Force MPI translation from this family

EXAMPLES:
    e4s-cl init --profile mpich
    e4s-cl launch mpirun -np 4 -- ./a.out
    e4s-cl launch --image app.sif --backend apptainer srun -n 8 ./a.out
"#
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let is_rank = argv.iter().any(|a| a == EXECUTE_SUBCOMMAND);

    let (flags, command) = match parse_args(argv) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("error: {}", err);
            print_help();
            std::process::exit(err.exit_code());
        }
    };

    match command {
        Command::Help => {
            print_help();
            return;
        }
        Command::Version => {
            print_version();
            return;
        }
        command => {
            let config = match Configuration::load() {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("error: {}", err);
                    std::process::exit(err.exit_code());
                }
            };
            init_logging(&flags, &config, is_rank);

            let store = match ProfileStore::open() {
                Ok(store) => store,
                Err(err) => {
                    error!("{}", err);
                    std::process::exit(err.exit_code());
                }
            };

            let ctx = Context {
                config,
                store,
                dry_run: flags.dry_run,
                debug: flags.verbose,
            };

            if let Err(err) = dispatch(&ctx, command).await {
                match &err {
                    // The child's own output already tells the story.
                    Error::CommandFailed(code) => std::process::exit(*code),
                    other => {
                        error!("{}", other);
                        std::process::exit(other.exit_code());
                    }
                }
            }
        }
    }
}
