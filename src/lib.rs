//! # e4s-cl
//!
//! **Container launcher for MPI programs on HPC clusters**
//!
//! Runs a containerized application built against one MPI implementation
//! under the *host's* MPI runtime, by interposing the host MPI's shared
//! libraries and support files into the container at launch time. When the
//! two implementations are ABI-compatible the dynamic linker reconciles
//! them on its own; when they are not, the Wi4MPI translation layer is
//! driven in between.
//!
//! # Architecture Overview
//!
//! ```text
//! user cmd ──► launchers::interpret ──► launch: inject "__execute …"
//!                                        │
//!                                        └──► MPI launcher spawns N ranks
//!                                                │ (one __execute each)
//!                                                ├─ read profile   (storage)
//!                                                ├─ resolve libs   (libraries)
//!                                                ├─ write entry    (template)
//!                                                └─ backend.run()  (containers)
//! ```
//!
//! The pipeline has three stages:
//!
//! 1. **Detect** — trace a reference MPI execution at the syscall level
//!    ([`trace`]), classify every observed path ([`libraries`]), persist
//!    the result as a named profile ([`profile`], [`storage`]).
//! 2. **Launch** — split the user's launcher command ([`launchers`]),
//!    decide whether ABI translation is needed ([`mpi`], [`wi4mpi`]), and
//!    delegate to the launcher with the per-rank worker injected.
//! 3. **Execute** — on each rank, finalize the library bind set against
//!    the container's own linker view, synthesize an entry script
//!    ([`template`]) and drive the container backend ([`containers`]).
//!
//! This crate drives existing tools; it is not a container runtime, a
//! linker, or an MPI implementation.

pub mod commands;
pub mod config;
pub mod constants;
pub mod containers;
pub mod error;
pub mod launchers;
pub mod libraries;
pub mod mpi;
pub mod profile;
pub mod storage;
pub mod template;
pub mod trace;
pub mod util;
pub mod wi4mpi;

pub use error::{Error, Result};
pub use profile::Profile;
pub use storage::{ProfileStore, StorageLevel};
