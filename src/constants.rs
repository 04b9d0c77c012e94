//! Constants for the launch pipeline.
//!
//! Directory layout, store locations, environment variable names and
//! timeouts are defined here to prevent magic values throughout the
//! codebase.

use std::time::Duration;

// =============================================================================
// In-Container Layout
// =============================================================================

/// Root of the bind tree inside the container.
///
/// Overridable via [`ENV_CONTAINER_DIR`] or the `container_directory`
/// configuration key.
pub const CONTAINER_DIR: &str = "/.e4s-cl";

/// Directory host libraries are bound into.
pub const CONTAINER_LIBRARY_DIR: &str = "/.e4s-cl/hostlibs";

/// In-container path of the synthesized entry script.
pub const CONTAINER_SCRIPT: &str = "/.e4s-cl/entry";

/// Path prefixes that only ever exist inside a container. Observed paths
/// under these prefixes are dropped unconditionally during classification.
pub const CONTAINER_ONLY_PREFIXES: &[&str] = &["/.e4s-cl", "/.singularity.d"];

// =============================================================================
// Host Layout
// =============================================================================

/// User store directory, relative to the home directory.
pub const USER_STORE_DIR: &str = ".local/e4s_cl";

/// File name of the user-level profile document.
pub const USER_STORE_FILE: &str = "user.json";

/// File name of the system-level profile document.
pub const SYSTEM_STORE_FILE: &str = "system.json";

/// Default installation prefix for the system store and configuration.
pub const SYSTEM_PREFIX: &str = "/usr/local";

/// Per-rank staging directory prefix on the host (`<prefix>/<pid>` holds the
/// entry script and barebones symlink farm for one rank).
pub const HOST_STAGING_PREFIX: &str = "/tmp/.e4s-cl";

/// Subdirectory of the user store holding a translation-layer install.
pub const WI4MPI_INSTALL_DIR: &str = "wi4mpi";

// =============================================================================
// Environment Variables
// =============================================================================

/// Overrides the in-container bind root.
pub const ENV_CONTAINER_DIR: &str = "E4S_CL_CONTAINER_DIR";

/// Extra options appended to `apptainer exec`.
pub const ENV_APPTAINER_OPTIONS: &str = "E4S_CL_APPTAINER_EXEC_OPTIONS";

/// Extra options appended to `singularity exec`.
pub const ENV_SINGULARITY_OPTIONS: &str = "E4S_CL_SINGULARITY_EXEC_OPTIONS";

/// Extra options appended to `podman run`.
pub const ENV_PODMAN_OPTIONS: &str = "E4S_CL_PODMAN_RUN_OPTIONS";

/// Extra options appended to the `shifter` command line.
pub const ENV_SHIFTER_OPTIONS: &str = "E4S_CL_SHIFTER_OPTIONS";

/// Extra options appended to `docker run`.
pub const ENV_DOCKER_OPTIONS: &str = "E4S_CL_DOCKER_OPTIONS";

/// C compiler flags forwarded to a translation-layer build.
pub const ENV_WI4MPI_CFLAGS: &str = "E4S_CL_WI4MPI_CFLAGS";

/// C++ compiler flags forwarded to a translation-layer build.
pub const ENV_WI4MPI_CXXFLAGS: &str = "E4S_CL_WI4MPI_CXXFLAGS";

/// Overrides the path of the MPI probe binary used by `init` and
/// `profile detect`.
pub const ENV_MPI_TESTER: &str = "E4S_CL_MPI_TESTER";

/// Carries the launcher basename to the per-rank `profile detect` children
/// so they can account for launcher-reserved directories.
pub const ENV_DETECT_LAUNCHER: &str = "__E4S_CL_DETECT_LAUNCHER";

/// Environment variables never forwarded into the container. The entry
/// script rebuilds them from the bound library set.
pub const ENV_FILTER: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "LD_AUDIT"];

// =============================================================================
// Timeouts
// =============================================================================

/// Grace period between SIGTERM and SIGKILL when cancelling a launcher or a
/// traced process group.
pub const SIGNAL_GRACE_PERIOD: Duration = Duration::from_secs(10);

// =============================================================================
// Names
// =============================================================================

/// Name of the throwaway profile `init` detects into before renaming.
pub const INIT_TEMP_PROFILE: &str = "init-profile";

/// Basename of the bundled MPI probe program (one point-to-point, one
/// collective), searched next to the executable and on `PATH`.
pub const MPI_TESTER_BIN: &str = "e4s-cl-mpi-tester";

/// Name of the private per-rank worker subcommand.
pub const EXECUTE_SUBCOMMAND: &str = "__execute";
