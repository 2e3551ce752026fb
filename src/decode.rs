//! Argument signatures and human-readable rendering of a syscall invocation.
//!
//! Only the commonly audited syscalls carry a signature; everything else is
//! rendered as six raw hex words.

use nix::unistd::Pid;
use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::args::{RemoteMemory, SyscallArgument, SyscallArguments};
use crate::error::DecodeError;

/// Strings longer than this are cut in log output.
const MAX_RENDERED_STRING: usize = 256;

/// C type of one argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Uint,
    Int64,
    Uint64,
    SizeT,
    ModeT,
    /// Flags and other bit sets.
    Hex,
    Pointer,
    /// `const char *`
    Str,
    Fd,
    /// Like `Fd`, but `AT_FDCWD` is meaningful.
    DirFd,
}

use ArgKind::*;

const SIGNATURE_ENTRIES: &[(&str, &[ArgKind])] = &[
    // file-system
    ("read", &[Fd, Pointer, SizeT]),
    ("write", &[Fd, Pointer, SizeT]),
    ("pread64", &[Fd, Pointer, SizeT, Int64]),
    ("pwrite64", &[Fd, Pointer, SizeT, Int64]),
    ("open", &[Str, Hex, ModeT]),
    ("openat", &[DirFd, Str, Hex, ModeT]),
    ("creat", &[Str, ModeT]),
    ("close", &[Fd]),
    ("stat", &[Str, Pointer]),
    ("lstat", &[Str, Pointer]),
    ("fstat", &[Fd, Pointer]),
    ("newfstatat", &[DirFd, Str, Pointer, Hex]),
    ("statx", &[DirFd, Str, Hex, Hex, Pointer]),
    ("access", &[Str, Hex]),
    ("faccessat", &[DirFd, Str, Hex]),
    ("faccessat2", &[DirFd, Str, Hex, Hex]),
    ("unlink", &[Str]),
    ("unlinkat", &[DirFd, Str, Hex]),
    ("mkdir", &[Str, ModeT]),
    ("mkdirat", &[DirFd, Str, ModeT]),
    ("rmdir", &[Str]),
    ("chdir", &[Str]),
    ("fchdir", &[Fd]),
    ("rename", &[Str, Str]),
    ("renameat", &[DirFd, Str, DirFd, Str]),
    ("renameat2", &[DirFd, Str, DirFd, Str, Hex]),
    ("chmod", &[Str, ModeT]),
    ("fchmod", &[Fd, ModeT]),
    ("fchmodat", &[DirFd, Str, ModeT]),
    ("chown", &[Str, Uint, Uint]),
    ("fchown", &[Fd, Uint, Uint]),
    ("readlink", &[Str, Pointer, SizeT]),
    ("readlinkat", &[DirFd, Str, Pointer, SizeT]),
    ("lseek", &[Fd, Int64, Int]),
    ("dup", &[Fd]),
    ("dup2", &[Fd, Int]),
    ("dup3", &[Fd, Int, Hex]),
    ("ioctl", &[Fd, Hex, Pointer]),
    ("fcntl", &[Fd, Int, Hex]),
    ("getdents64", &[Fd, Pointer, Uint]),
    ("truncate", &[Str, Int64]),
    ("ftruncate", &[Fd, Int64]),
    ("umask", &[ModeT]),
    // memory-management
    ("brk", &[Pointer]),
    ("mmap", &[Pointer, SizeT, Hex, Hex, Fd, Int64]),
    ("munmap", &[Pointer, SizeT]),
    ("mprotect", &[Pointer, SizeT, Hex]),
    ("madvise", &[Pointer, SizeT, Int]),
    // networking
    ("socket", &[Int, Hex, Int]),
    ("socketpair", &[Int, Hex, Int, Pointer]),
    ("connect", &[Fd, Pointer, Uint]),
    ("bind", &[Fd, Pointer, Uint]),
    ("listen", &[Fd, Int]),
    ("accept", &[Fd, Pointer, Pointer]),
    ("accept4", &[Fd, Pointer, Pointer, Hex]),
    ("sendto", &[Fd, Pointer, SizeT, Hex, Pointer, Uint]),
    ("recvfrom", &[Fd, Pointer, SizeT, Hex, Pointer, Pointer]),
    ("shutdown", &[Fd, Int]),
    // process-management
    ("execve", &[Str, Pointer, Pointer]),
    ("execveat", &[DirFd, Str, Pointer, Pointer, Hex]),
    ("clone", &[Hex, Pointer, Pointer, Pointer, Hex]),
    ("wait4", &[Int, Pointer, Hex, Pointer]),
    ("exit", &[Int]),
    ("exit_group", &[Int]),
    ("prctl", &[Int, Uint64, Uint64, Uint64, Uint64]),
    ("setpgid", &[Int, Int]),
    // signals
    ("kill", &[Int, Int]),
    ("tgkill", &[Int, Int, Int]),
    ("rt_sigaction", &[Int, Pointer, Pointer, SizeT]),
    ("rt_sigprocmask", &[Int, Pointer, Pointer, SizeT]),
    // timers-and-clocks
    ("nanosleep", &[Pointer, Pointer]),
    ("clock_gettime", &[Int, Pointer]),
    ("clock_nanosleep", &[Int, Hex, Pointer, Pointer]),
    // security-and-permissions
    ("setuid", &[Uint]),
    ("setgid", &[Uint]),
    ("setresuid", &[Uint, Uint, Uint]),
    ("setresgid", &[Uint, Uint, Uint]),
    ("chroot", &[Str]),
    ("ptrace", &[Int64, Int, Pointer, Pointer]),
    // system-information
    ("uname", &[Pointer]),
    ("sethostname", &[Str, SizeT]),
    // process-communication / synchronization
    ("pipe2", &[Pointer, Hex]),
    ("mq_open", &[Str, Hex, ModeT, Pointer]),
    ("mq_unlink", &[Str]),
    ("futex", &[Pointer, Int, Uint, Pointer, Pointer, Uint]),
    // misc
    ("mount", &[Str, Str, Str, Hex, Pointer]),
    ("umount2", &[Str, Hex]),
    ("getrandom", &[Pointer, SizeT, Hex]),
    ("reboot", &[Hex, Hex, Uint, Pointer]),
];

static SIGNATURES: Lazy<HashMap<&'static str, &'static [ArgKind]>> =
    Lazy::new(|| SIGNATURE_ENTRIES.iter().copied().collect());

/// Argument kinds for `name`, if known.
pub fn signature(name: &str) -> Option<&'static [ArgKind]> {
    SIGNATURES.get(name).copied()
}

/// `name(0x.., 0x.., ...)` without touching the tracee.
pub fn raw_summary(name: &str, args: &SyscallArguments) -> String {
    let words: Vec<String> = args.iter().map(|a| format!("{:#x}", a.value)).collect();
    format!("{name}({})", words.join(", "))
}

/// Renders arguments of one tracee according to their signature.
pub struct ArgumentDecoder<'m, M: RemoteMemory> {
    pid: Pid,
    memory: &'m M,
}

impl<'m, M: RemoteMemory> ArgumentDecoder<'m, M> {
    pub fn new(pid: Pid, memory: &'m M) -> Self {
        Self { pid, memory }
    }

    pub fn render(&self, kind: ArgKind, arg: &SyscallArgument) -> String {
        match kind {
            Int => arg.int().to_string(),
            Uint => arg.uint().to_string(),
            Int64 => arg.int64().to_string(),
            Uint64 => arg.uint64().to_string(),
            SizeT => arg.size_t().to_string(),
            ModeT => format!("{:#o}", arg.mode_t()),
            Hex => format!("{:#x}", arg.value),
            Pointer if arg.pointer().is_null() => "NULL".to_string(),
            Pointer => arg.pointer().to_string(),
            Str => match arg.string(self.memory) {
                Ok(s) => quote(&s),
                Err(DecodeError::NullPointer) => "NULL".to_string(),
                Err(e) => format!("<unresolved: {e}>"),
            },
            DirFd if arg.int() == libc::AT_FDCWD => "AT_FDCWD".to_string(),
            Fd | DirFd if arg.int() < 0 => arg.int().to_string(),
            Fd | DirFd => format!("{}<{}>", arg.fd(), arg.path(self.pid)),
        }
    }

    /// `name(arg, arg, ...)` with every slot of the signature decoded.
    pub fn summary(&self, name: &str, args: &SyscallArguments) -> String {
        let Some(kinds) = signature(name) else {
            return raw_summary(name, args);
        };
        let rendered: Vec<String> = kinds
            .iter()
            .zip(args.iter())
            .map(|(&kind, arg)| self.render(kind, arg))
            .collect();
        format!("{name}({})", rendered.join(", "))
    }
}

fn quote(s: &str) -> String {
    if s.chars().count() > MAX_RENDERED_STRING {
        let cut: String = s.chars().take(MAX_RENDERED_STRING).collect();
        format!("{cut:?}...")
    } else {
        format!("{s:?}")
    }
}
