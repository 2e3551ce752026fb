//! Error types for gatekeeper.
//!
//! Three families, matching how far each one is allowed to travel:
//! configuration errors stop the run before anything is spawned, trace errors end
//! the run, decode errors never leave the decoder.

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

use crate::args::Addr;
use crate::table::Arch;

/// Rejected command line or policy, reported before the target is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown syscall category `{0}`")]
    UnknownCategory(String),

    #[error("unknown syscall `{name}` on {arch}")]
    UnknownSyscall { name: String, arch: Arch },

    #[error("unknown architecture `{0}`")]
    UnknownArch(String),

    #[error("conflicting flags: {0}")]
    Conflict(String),

    #[error("no command to run")]
    EmptyCommand,
}

/// Failure of the tracing channel itself.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to launch `{program}` under trace: {source}")]
    Attach {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ptrace setup failed for pid {pid}: {source}")]
    Setup {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("tracing channel lost ({context}): {source}")]
    Channel {
        context: &'static str,
        #[source]
        source: Errno,
    },

    /// The tracee disappeared between its stop and our inspection of it.
    #[error("tracee {0} vanished")]
    Vanished(Pid),
}

impl TraceError {
    /// Map an errno from a ptrace request on `pid` into the right variant.
    pub fn from_ptrace(pid: Pid, context: &'static str, errno: Errno) -> Self {
        match errno {
            Errno::ESRCH => TraceError::Vanished(pid),
            source => TraceError::Channel { context, source },
        }
    }
}

/// Argument decoding failure. Absorbed into a placeholder by callers.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("NULL")]
    NullPointer,

    #[error("cannot read tracee memory at {addr}: {source}")]
    Read {
        addr: Addr,
        #[source]
        source: Errno,
    },

    #[error("string at {addr} exceeds {limit} bytes")]
    Unterminated { addr: Addr, limit: usize },

    #[error("cannot resolve fd {fd}: {source}")]
    Unresolvable {
        fd: i32,
        #[source]
        source: std::io::Error,
    },
}
