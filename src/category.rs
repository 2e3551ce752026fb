//! Syscall categories: operator-facing groups of kernel entry points.
//!
//! Each category has a list of names present on every supported architecture and
//! per-architecture extras (the legacy x86_64 calls that the generic table
//! dropped, e.g. `open`, `fork`, `pipe`).

use serde::Serialize;
use std::{collections::BTreeSet, fmt, str::FromStr};

use crate::error::ConfigError;
use crate::table::Arch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    FileSystem,
    Networking,
    ProcessManagement,
    MemoryManagement,
    Signals,
    TimersAndClocks,
    SecurityAndPermissions,
    SystemInformation,
    ProcessCommunication,
    ProcessSynchronization,
    Misc,
}

struct CategorySyscalls {
    common: &'static [&'static str],
    x86_64: &'static [&'static str],
    aarch64: &'static [&'static str],
    riscv64: &'static [&'static str],
}

const NONE: &[&str] = &[];

const FILE_SYSTEM: CategorySyscalls = CategorySyscalls {
    common: &[
        "read", "write", "openat", "openat2", "close", "close_range", "lseek", "pread64",
        "pwrite64", "readv", "writev", "preadv", "pwritev", "preadv2", "pwritev2", "fstat",
        "newfstatat", "statx", "statfs", "fstatfs", "truncate", "ftruncate", "fallocate",
        "faccessat", "faccessat2", "fchmod", "fchmodat", "fchown", "fchownat", "fsync",
        "fdatasync", "sync_file_range", "getdents64", "getcwd", "chdir", "fchdir", "mkdirat",
        "mknodat", "unlinkat", "renameat2", "linkat", "symlinkat", "readlinkat", "utimensat",
        "fcntl", "flock", "dup", "dup3", "ioctl", "fadvise64", "readahead", "sendfile",
        "splice", "tee", "vmsplice", "copy_file_range", "name_to_handle_at",
        "open_by_handle_at", "inotify_init1", "inotify_add_watch", "inotify_rm_watch",
        "fanotify_init", "fanotify_mark", "setxattr", "lsetxattr", "fsetxattr", "getxattr",
        "lgetxattr", "fgetxattr", "listxattr", "llistxattr", "flistxattr", "removexattr",
        "lremovexattr", "fremovexattr", "pselect6", "ppoll", "epoll_create1", "epoll_ctl",
        "epoll_pwait", "io_setup", "io_destroy", "io_submit", "io_cancel", "io_getevents",
        "umask",
    ],
    x86_64: &[
        "open", "creat", "stat", "lstat", "access", "chmod", "chown", "lchown", "mkdir",
        "rmdir", "rename", "renameat", "link", "unlink", "symlink", "readlink", "mknod",
        "getdents", "dup2", "select", "poll", "epoll_create", "epoll_wait", "inotify_init",
        "utime", "utimes", "futimesat",
    ],
    aarch64: &["renameat"],
    riscv64: NONE,
};

const NETWORKING: CategorySyscalls = CategorySyscalls {
    common: &[
        "socket", "socketpair", "bind", "listen", "accept", "accept4", "connect",
        "getsockname", "getpeername", "sendto", "recvfrom", "sendmsg", "recvmsg", "sendmmsg",
        "recvmmsg", "shutdown", "setsockopt", "getsockopt",
    ],
    x86_64: NONE,
    aarch64: NONE,
    riscv64: NONE,
};

const PROCESS_MANAGEMENT: CategorySyscalls = CategorySyscalls {
    common: &[
        "clone", "clone3", "execve", "execveat", "exit", "exit_group", "wait4", "waitid",
        "getpid", "getppid", "gettid", "set_tid_address", "setpgid", "getpgid", "setsid",
        "getsid", "prctl", "sched_yield", "sched_setaffinity", "sched_getaffinity",
        "sched_setscheduler", "sched_getscheduler", "sched_setparam", "sched_getparam",
        "sched_get_priority_max", "sched_get_priority_min", "sched_rr_get_interval",
        "setpriority", "getpriority", "unshare", "setns", "personality", "prlimit64",
        "getrlimit", "setrlimit", "getrusage", "set_robust_list", "get_robust_list", "rseq",
        "pidfd_open", "pidfd_send_signal", "pidfd_getfd", "ioprio_set", "ioprio_get",
    ],
    x86_64: &["fork", "vfork", "arch_prctl", "getpgrp"],
    aarch64: NONE,
    riscv64: NONE,
};

const MEMORY_MANAGEMENT: CategorySyscalls = CategorySyscalls {
    common: &[
        "brk", "mmap", "munmap", "mremap", "mprotect", "madvise", "msync", "mincore", "mlock",
        "munlock", "mlockall", "munlockall", "mlock2", "membarrier", "memfd_create", "mbind",
        "get_mempolicy", "set_mempolicy", "migrate_pages", "move_pages", "process_vm_readv",
        "process_vm_writev", "remap_file_pages", "pkey_mprotect", "pkey_alloc", "pkey_free",
    ],
    x86_64: NONE,
    aarch64: NONE,
    riscv64: NONE,
};

const SIGNALS: CategorySyscalls = CategorySyscalls {
    common: &[
        "rt_sigaction", "rt_sigprocmask", "rt_sigreturn", "rt_sigpending", "rt_sigtimedwait",
        "rt_sigqueueinfo", "rt_tgsigqueueinfo", "rt_sigsuspend", "sigaltstack", "kill",
        "tkill", "tgkill", "signalfd4", "restart_syscall",
    ],
    x86_64: &["signalfd", "pause"],
    aarch64: NONE,
    riscv64: NONE,
};

const TIMERS_AND_CLOCKS: CategorySyscalls = CategorySyscalls {
    common: &[
        "clock_gettime", "clock_settime", "clock_getres", "clock_nanosleep", "clock_adjtime",
        "nanosleep", "gettimeofday", "settimeofday", "adjtimex", "timer_create",
        "timer_settime", "timer_gettime", "timer_getoverrun", "timer_delete",
        "timerfd_create", "timerfd_settime", "timerfd_gettime", "getitimer", "setitimer",
        "times",
    ],
    x86_64: &["time", "alarm"],
    aarch64: NONE,
    riscv64: NONE,
};

const SECURITY_AND_PERMISSIONS: CategorySyscalls = CategorySyscalls {
    common: &[
        "setuid", "setgid", "setreuid", "setregid", "setresuid", "getresuid", "setresgid",
        "getresgid", "getuid", "geteuid", "getgid", "getegid", "setfsuid", "setfsgid",
        "getgroups", "setgroups", "capget", "capset", "seccomp", "keyctl", "add_key",
        "request_key", "chroot", "ptrace",
    ],
    x86_64: NONE,
    aarch64: NONE,
    riscv64: NONE,
};

const SYSTEM_INFORMATION: CategorySyscalls = CategorySyscalls {
    common: &["uname", "sysinfo", "syslog", "getcpu", "sethostname", "setdomainname"],
    x86_64: &["ustat", "sysfs"],
    aarch64: NONE,
    riscv64: NONE,
};

const PROCESS_COMMUNICATION: CategorySyscalls = CategorySyscalls {
    common: &[
        "pipe2", "eventfd2", "mq_open", "mq_unlink", "mq_timedsend", "mq_timedreceive",
        "mq_notify", "mq_getsetattr", "msgget", "msgsnd", "msgrcv", "msgctl", "shmget",
        "shmat", "shmdt", "shmctl",
    ],
    x86_64: &["pipe", "eventfd"],
    aarch64: NONE,
    riscv64: NONE,
};

const PROCESS_SYNCHRONIZATION: CategorySyscalls = CategorySyscalls {
    common: &["futex", "semget", "semop", "semtimedop", "semctl"],
    x86_64: NONE,
    aarch64: NONE,
    riscv64: NONE,
};

const MISC: CategorySyscalls = CategorySyscalls {
    common: &[
        "sync", "syncfs", "getrandom", "reboot", "mount", "umount2", "pivot_root", "swapon",
        "swapoff", "acct", "quotactl", "init_module", "finit_module", "delete_module",
        "kexec_load", "bpf", "perf_event_open", "userfaultfd", "vhangup", "kcmp",
    ],
    x86_64: &["iopl", "ioperm", "modify_ldt"],
    aarch64: NONE,
    riscv64: NONE,
};

impl Category {
    pub const ALL: [Category; 11] = [
        Category::FileSystem,
        Category::Networking,
        Category::ProcessManagement,
        Category::MemoryManagement,
        Category::Signals,
        Category::TimersAndClocks,
        Category::SecurityAndPermissions,
        Category::SystemInformation,
        Category::ProcessCommunication,
        Category::ProcessSynchronization,
        Category::Misc,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::FileSystem => "file-system",
            Category::Networking => "networking",
            Category::ProcessManagement => "process-management",
            Category::MemoryManagement => "memory-management",
            Category::Signals => "signals",
            Category::TimersAndClocks => "timers-and-clocks",
            Category::SecurityAndPermissions => "security-and-permissions",
            Category::SystemInformation => "system-information",
            Category::ProcessCommunication => "process-communication",
            Category::ProcessSynchronization => "process-synchronization",
            Category::Misc => "misc",
        }
    }

    const fn data(&self) -> &'static CategorySyscalls {
        match self {
            Category::FileSystem => &FILE_SYSTEM,
            Category::Networking => &NETWORKING,
            Category::ProcessManagement => &PROCESS_MANAGEMENT,
            Category::MemoryManagement => &MEMORY_MANAGEMENT,
            Category::Signals => &SIGNALS,
            Category::TimersAndClocks => &TIMERS_AND_CLOCKS,
            Category::SecurityAndPermissions => &SECURITY_AND_PERMISSIONS,
            Category::SystemInformation => &SYSTEM_INFORMATION,
            Category::ProcessCommunication => &PROCESS_COMMUNICATION,
            Category::ProcessSynchronization => &PROCESS_SYNCHRONIZATION,
            Category::Misc => &MISC,
        }
    }

    /// Syscall names belonging to this category on `arch`.
    pub fn syscalls(&self, arch: Arch) -> BTreeSet<&'static str> {
        let data = self.data();
        let extras = match arch {
            Arch::X86_64 => data.x86_64,
            Arch::Aarch64 => data.aarch64,
            Arch::Riscv64 => data.riscv64,
        };
        data.common.iter().chain(extras).copied().collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}
