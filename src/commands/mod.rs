//! Command implementations.
//!
//! Each subcommand is a function taking an explicit [`Context`] — the
//! loaded configuration and an open profile-store handle — so nothing in
//! the pipeline relies on process-global state.

pub mod detect;
pub mod execute;
pub mod init;
pub mod launch;
pub mod profile;

use crate::config::Configuration;
use crate::storage::ProfileStore;

/// Shared command context.
pub struct Context {
    pub config: Configuration,
    pub store: ProfileStore,
    /// Print the commands that would run instead of running them.
    pub dry_run: bool,
    /// Verbose diagnostics were requested on the command line.
    pub debug: bool,
}
