//! Per-architecture syscall number ↔ name tables.
//!
//! Syscall numbers are not portable: `openat` is 257 on x86_64 and 56 on the
//! generic (aarch64 / riscv64) table, and the legacy calls (`open`, `fork`, ...)
//! only exist on x86_64. Every table is built once from the `syscalls` crate and
//! never mutated afterwards.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::{borrow::Cow, collections::HashMap, fmt, str::FromStr};

use crate::error::ConfigError;

/// Upper bound (exclusive) when scanning a `Sysno` enum for valid numbers.
const MAX_SYSCALL_NR: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86_64,
    Aarch64,
    Riscv64,
}

impl Arch {
    pub const ALL: [Arch; 3] = [Arch::X86_64, Arch::Aarch64, Arch::Riscv64];

    /// Architecture this binary was built for.
    pub const fn host() -> Arch {
        #[cfg(target_arch = "x86_64")]
        {
            Arch::X86_64
        }
        #[cfg(target_arch = "aarch64")]
        {
            Arch::Aarch64
        }
        #[cfg(target_arch = "riscv64")]
        {
            Arch::Riscv64
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Riscv64 => "riscv64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            "riscv64" => Ok(Arch::Riscv64),
            other => Err(ConfigError::UnknownArch(other.to_string())),
        }
    }
}

/// Collect `(number, name)` for every syscall the given `syscalls` arch module knows.
macro_rules! sysno_entries {
    ($arch:ident) => {
        (0..MAX_SYSCALL_NR)
            .filter_map(syscalls::$arch::Sysno::new)
            .map(|sysno| (sysno.id() as u64, sysno.name()))
            .collect::<Vec<_>>()
    };
}

static X86_64_TABLE: Lazy<SyscallTable> =
    Lazy::new(|| SyscallTable::from_entries(Arch::X86_64, sysno_entries!(x86_64)));
static AARCH64_TABLE: Lazy<SyscallTable> =
    Lazy::new(|| SyscallTable::from_entries(Arch::Aarch64, sysno_entries!(aarch64)));
static RISCV64_TABLE: Lazy<SyscallTable> =
    Lazy::new(|| SyscallTable::from_entries(Arch::Riscv64, sysno_entries!(riscv64)));

/// Bidirectional syscall lookup for one architecture.
#[derive(Debug)]
pub struct SyscallTable {
    arch: Arch,
    by_number: HashMap<u64, &'static str>,
    by_name: HashMap<&'static str, u64>,
}

impl SyscallTable {
    fn from_entries(arch: Arch, entries: Vec<(u64, &'static str)>) -> Self {
        let by_name = entries.iter().map(|&(nr, name)| (name, nr)).collect();
        let by_number = entries.into_iter().collect();
        Self {
            arch,
            by_number,
            by_name,
        }
    }

    pub fn for_arch(arch: Arch) -> &'static SyscallTable {
        match arch {
            Arch::X86_64 => &X86_64_TABLE,
            Arch::Aarch64 => &AARCH64_TABLE,
            Arch::Riscv64 => &RISCV64_TABLE,
        }
    }

    pub fn host() -> &'static SyscallTable {
        Self::for_arch(Arch::host())
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Canonical name of syscall `nr`, `None` when this architecture has no such number.
    pub fn name_of(&self, nr: u64) -> Option<&'static str> {
        self.by_number.get(&nr).copied()
    }

    pub fn number_of(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Name for logs: the canonical name, or `syscall_<nr>` for unknown numbers.
    pub fn display_name(&self, nr: u64) -> Cow<'static, str> {
        match self.name_of(nr) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("syscall_{nr}")),
        }
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}
