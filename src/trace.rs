//! Syscall-level dependency tracing.
//!
//! Runs a command under `ptrace` and records every path the process and its
//! children hand to a path-accepting syscall. Only the path arguments are
//! decoded; full syscall decoding is out of scope. The caller gets the
//! ordered observation list, duplicates included, and classifies it
//! elsewhere.
//!
//! Tracing is inherently blocking (`waitpid` drives the tracee); callers on
//! the async runtime go through `spawn_blocking`.

use crate::constants::SIGNAL_GRACE_PERIOD;
use crate::error::{Error, Result};
use crate::util;
use nix::sys::ptrace;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Set by the signal handler; checked between tracee stops.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn note_interrupt(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Result of one traced execution.
#[derive(Debug)]
pub struct TraceOutcome {
    /// Exit status of the root child (128+signum when signalled).
    pub exit_status: i32,
    /// Paths handed to path-accepting syscalls, in observation order.
    /// Duplicates are retained; classification happens later.
    pub paths: Vec<PathBuf>,
}

/// Runs a command under syscall interception and collects the paths it
/// opens, stats, reads as links or execs. Follows forks, vforks and clones.
pub fn opened_files(argv: &[String]) -> Result<TraceOutcome> {
    let program = argv.first().ok_or(Error::NoCommand)?;
    let program = util::which(program)
        .ok_or_else(|| Error::ExecutableNotFound(program.clone()))?;

    let mut command = Command::new(&program);
    command.args(&argv[1..]);
    // The child enters its own process group so cancellation can signal the
    // whole traced tree, and requests tracing before exec.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(std::io::Error::from)?;
            ptrace::traceme().map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| Error::TraceUnavailable {
        reason: format!("failed to spawn {}: {}", program.display(), e),
    })?;
    let root = Pid::from_raw(child.id() as i32);

    // The child stops with SIGTRAP once it execs.
    waitpid(root, None).map_err(|e| Error::TraceUnavailable {
        reason: format!("initial wait failed: {}", e),
    })?;
    ptrace::setoptions(
        root,
        ptrace::Options::PTRACE_O_TRACESYSGOOD
            | ptrace::Options::PTRACE_O_TRACEFORK
            | ptrace::Options::PTRACE_O_TRACEVFORK
            | ptrace::Options::PTRACE_O_TRACECLONE
            | ptrace::Options::PTRACE_O_TRACEEXEC,
    )
    .map_err(|e| Error::TraceUnavailable {
        reason: format!("ptrace options rejected: {}", e),
    })?;

    let previous = install_handlers()?;
    let outcome = trace_loop(root);
    restore_handlers(previous);
    outcome
}

fn trace_loop(root: Pid) -> Result<TraceOutcome> {
    let mut paths = Vec::new();
    let mut exit_status = 0;
    // Entry/exit bookkeeping per tracee; syscall stops alternate.
    let mut in_syscall: HashMap<Pid, bool> = HashMap::new();
    let mut term_deadline: Option<Instant> = None;

    ptrace::syscall(root, None).map_err(|e| Error::TraceUnavailable {
        reason: format!("cannot resume tracee: {}", e),
    })?;

    loop {
        if INTERRUPTED.swap(false, Ordering::SeqCst) {
            debug!("Interrupt received, terminating traced process group");
            let _ = signal::killpg(root, Signal::SIGTERM);
            term_deadline = Some(Instant::now() + SIGNAL_GRACE_PERIOD);
        }
        if let Some(deadline) = term_deadline {
            if Instant::now() >= deadline {
                let _ = signal::killpg(root, Signal::SIGKILL);
                term_deadline = None;
            }
        }

        let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
            Ok(status) => status,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => break,
            Err(err) => {
                return Err(Error::TraceUnavailable {
                    reason: format!("wait failed: {}", err),
                })
            }
        };

        match status {
            WaitStatus::PtraceSyscall(pid) => {
                let entering = !in_syscall.get(&pid).copied().unwrap_or(false);
                in_syscall.insert(pid, entering);
                if entering {
                    if let Some(path) = syscall_path(pid) {
                        paths.push(path);
                    }
                }
                let _ = ptrace::syscall(pid, None);
            }
            WaitStatus::PtraceEvent(pid, _, _) => {
                // Fork/clone/exec notification; new children arrive already
                // traced and report their own stops.
                let _ = ptrace::syscall(pid, None);
            }
            WaitStatus::Stopped(pid, sig) => {
                let deliver = match sig {
                    Signal::SIGTRAP | Signal::SIGSTOP => None,
                    other => Some(other),
                };
                let _ = ptrace::syscall(pid, deliver);
            }
            WaitStatus::Exited(pid, code) => {
                in_syscall.remove(&pid);
                if pid == root {
                    exit_status = code;
                }
            }
            WaitStatus::Signaled(pid, sig, _) => {
                in_syscall.remove(&pid);
                if pid == root {
                    exit_status = 128 + sig as i32;
                }
            }
            _ => {}
        }
    }

    debug!("Trace recorded {} path observations", paths.len());
    Ok(TraceOutcome { exit_status, paths })
}

// =============================================================================
// Syscall Decoding
// =============================================================================

/// Reads the syscall number and arguments the stopped tracee is entering.
fn current_syscall(pid: Pid) -> Option<(i64, [u64; 6])> {
    let text = fs::read_to_string(format!("/proc/{}/syscall", pid)).ok()?;
    let mut parts = text.split_whitespace();
    let sysno: i64 = parts.next()?.parse().ok()?;
    let mut args = [0u64; 6];
    for slot in &mut args {
        *slot = parse_num(parts.next()?)?;
    }
    Some((sysno, args))
}

fn parse_num(value: &str) -> Option<u64> {
    if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Position of the path argument for path-accepting syscalls, with the
/// directory fd argument for the `*at` family.
fn path_argument(sysno: i64, args: &[u64; 6]) -> Option<(u64, Option<u64>)> {
    #[cfg(target_arch = "x86_64")]
    {
        match sysno {
            libc::SYS_open | libc::SYS_stat | libc::SYS_lstat | libc::SYS_access
            | libc::SYS_readlink => return Some((args[0], None)),
            _ => {}
        }
    }

    match sysno {
        libc::SYS_execve => Some((args[0], None)),
        libc::SYS_openat
        | libc::SYS_execveat
        | libc::SYS_newfstatat
        | libc::SYS_statx
        | libc::SYS_faccessat
        | libc::SYS_readlinkat => Some((args[1], Some(args[0]))),
        _ => None,
    }
}

/// Extracts and canonicalizes the path a tracee is about to hand to the
/// kernel, if the pending syscall takes one.
fn syscall_path(pid: Pid) -> Option<PathBuf> {
    let (sysno, args) = current_syscall(pid)?;
    let (address, dirfd) = path_argument(sysno, &args)?;
    if address == 0 {
        return None;
    }

    let raw = read_tracee_string(pid, address)?;
    if raw.is_empty() {
        return None;
    }

    let path = PathBuf::from(&raw);
    let absolute = if path.is_absolute() {
        path
    } else {
        anchor_for(pid, dirfd)?.join(path)
    };
    Some(util::normalize(&absolute))
}

/// Directory a relative path is resolved against: the fd passed to an
/// `*at` call, or the tracee's working directory.
fn anchor_for(pid: Pid, dirfd: Option<u64>) -> Option<PathBuf> {
    if let Some(fd) = dirfd {
        if fd as i64 as i32 != libc::AT_FDCWD {
            return fs::read_link(format!("/proc/{}/fd/{}", pid, fd as i64)).ok();
        }
    }
    fs::read_link(format!("/proc/{}/cwd", pid)).ok()
}

/// Reads a NUL-terminated string from the tracee's memory, one word at a
/// time.
fn read_tracee_string(pid: Pid, address: u64) -> Option<String> {
    const LIMIT: usize = 4096;
    let word_size = std::mem::size_of::<libc::c_long>();
    let mut bytes = Vec::new();
    let mut offset = 0usize;

    while bytes.len() < LIMIT {
        let word =
            ptrace::read(pid, (address as usize + offset) as ptrace::AddressType).ok()? as usize;
        for byte in word.to_ne_bytes().iter().take(word_size) {
            if *byte == 0 {
                return String::from_utf8(bytes).ok();
            }
            bytes.push(*byte);
        }
        offset += word_size;
    }
    warn!("Unterminated path in tracee {} memory", pid);
    None
}

// =============================================================================
// Signal Handling
// =============================================================================

struct PreviousHandlers {
    int: signal::SigAction,
    term: signal::SigAction,
}

fn install_handlers() -> Result<PreviousHandlers> {
    let action = signal::SigAction::new(
        SigHandler::Handler(note_interrupt),
        signal::SaFlags::empty(),
        signal::SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic flag.
    unsafe {
        let int = signal::sigaction(Signal::SIGINT, &action)
            .map_err(|e| Error::Internal(format!("sigaction failed: {}", e)))?;
        let term = signal::sigaction(Signal::SIGTERM, &action)
            .map_err(|e| Error::Internal(format!("sigaction failed: {}", e)))?;
        Ok(PreviousHandlers { int, term })
    }
}

fn restore_handlers(previous: PreviousHandlers) {
    // SAFETY: restores the handlers saved by install_handlers.
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &previous.int);
        let _ = signal::sigaction(Signal::SIGTERM, &previous.term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_num() {
        assert_eq!(parse_num("0x1f"), Some(31));
        assert_eq!(parse_num("42"), Some(42));
        assert_eq!(parse_num("xyz"), None);
    }

    #[test]
    fn test_path_argument_table() {
        // openat carries the path in the second argument.
        let args = [3, 0xdead, 0, 0, 0, 0];
        assert_eq!(
            path_argument(libc::SYS_openat, &args),
            Some((0xdead, Some(3)))
        );
        // execve carries it in the first.
        assert_eq!(path_argument(libc::SYS_execve, &args), Some((3, None)));
        // A non-path syscall decodes to nothing.
        assert_eq!(path_argument(libc::SYS_getpid, &args), None);
    }

}
