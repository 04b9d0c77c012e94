//! Error types for the launch pipeline.

use std::path::PathBuf;

/// Result type alias for launch pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Process exit code for user and configuration errors.
pub const EXIT_USER_ERROR: i32 = 1;

/// Process exit code for environment errors (missing tool, bad image).
pub const EXIT_ENVIRONMENT_ERROR: i32 = 2;

/// Errors that can occur in the launch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // User Errors
    // =========================================================================
    /// No profile with this name in any store.
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// A profile with this name already exists at the target level.
    #[error("profile already exists: {0}")]
    ProfileExists(String),

    /// The requested operation needs a selected profile and none is.
    #[error("no profile selected")]
    NoProfileSelected,

    /// A selected profile cannot be deleted.
    #[error("profile '{0}' is selected; unselect it before deleting")]
    ProfileSelected(String),

    /// A profile violates the data model invariants.
    #[error("invalid profile '{name}': {reason}")]
    InvalidProfile { name: String, reason: String },

    /// No command was given where one is required.
    #[error("no command given")]
    NoCommand,

    /// A malformed or missing command-line argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A configuration file could not be parsed.
    #[error("configuration error in {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    /// A recognized configuration key holds a value of the wrong shape.
    #[error("invalid value for configuration key '{key}': expected {expected}")]
    ConfigValue { key: String, expected: &'static str },

    /// The requested container technology is not supported.
    #[error("backend '{name}' not supported; available backends: {available}")]
    BackendUnsupported { name: String, available: String },

    // =========================================================================
    // Environment Errors
    // =========================================================================
    /// The backend executable is not on PATH.
    #[error("backend '{backend}' not found on this system; is the module loaded?")]
    BackendNotAvailable { backend: String },

    /// The container image does not exist or is not accessible.
    #[error("image '{image}' not accessible through backend '{backend}'")]
    ImageNotFound { image: String, backend: String },

    /// A launcher or program binary could not be located.
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    /// Syscall tracing is unavailable on this system.
    #[error(
        "process tracing unavailable: {reason}; \
         check ptrace permissions (kernel.yama.ptrace_scope) or use the \
         'barebones' backend with an explicit library list"
    )]
    TraceUnavailable { reason: String },

    /// The translation layer is missing or incomplete.
    #[error("no translation layer found at {path}: {reason}")]
    TranslationLayerMissing { path: PathBuf, reason: String },

    // =========================================================================
    // Analysis Errors
    // =========================================================================
    /// A shared object could not be parsed. Fatal for that path only.
    #[error("failed to parse ELF object {path}: {reason}")]
    ElfParse { path: PathBuf, reason: String },

    /// An in-container analysis command failed.
    #[error("container analysis failed with code {0}")]
    AnalysisFailed(i32),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// The store directory could not be prepared.
    #[error("failed to initialize profile store at {path}: {reason}")]
    StorageInit { path: PathBuf, reason: String },

    /// The store document could not be written.
    #[error("failed to write profile store {path}: {reason}")]
    StorageWrite { path: PathBuf, reason: String },

    /// The store document is malformed.
    #[error("corrupt profile store {path}: {reason}")]
    StorageCorrupt { path: PathBuf, reason: String },

    // =========================================================================
    // Pass-Through
    // =========================================================================
    /// The backend or the user program exited non-zero; the code is
    /// forwarded unchanged.
    #[error("command exited with code {0}")]
    CommandFailed(i32),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps an error to the process exit code defined by the CLI contract:
    /// user and configuration errors exit 1, environment errors exit 2, and
    /// backend or program failures forward their code unchanged.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ProfileNotFound(_)
            | Self::ProfileExists(_)
            | Self::NoProfileSelected
            | Self::ProfileSelected(_)
            | Self::InvalidProfile { .. }
            | Self::NoCommand
            | Self::InvalidArgument(_)
            | Self::ConfigParse { .. }
            | Self::ConfigValue { .. }
            | Self::BackendUnsupported { .. } => EXIT_USER_ERROR,

            Self::BackendNotAvailable { .. }
            | Self::ImageNotFound { .. }
            | Self::ExecutableNotFound(_)
            | Self::TraceUnavailable { .. }
            | Self::TranslationLayerMissing { .. } => EXIT_ENVIRONMENT_ERROR,

            Self::CommandFailed(code) => *code,

            _ => EXIT_USER_ERROR,
        }
    }
}
