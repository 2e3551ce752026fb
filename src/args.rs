//! Raw syscall arguments and their typed interpretation.
//!
//! A [`SyscallArgument`] is one register-sized word captured at syscall entry.
//! The accessors are named after the C type of the parameter and take care of
//! width and signedness (sign- vs zero-extension). Pointer arguments are
//! addresses in the *tracee's* address space: they are only ever read through a
//! [`RemoteMemory`] implementation keyed by the tracee's pid.

use nix::errno::Errno;
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::ptrace;
use nix::unistd::Pid;
use serde::Serialize;
use std::{fmt, io::IoSliceMut, ops::Index, path::PathBuf};

use crate::error::DecodeError;

/// Longest string we are willing to pull out of a tracee (PATH_MAX).
pub const MAX_STRING_LEN: usize = 4096;

const PAGE_SIZE: u64 = 4096;
const WORD_SIZE: u64 = std::mem::size_of::<libc::c_long>() as u64;

/// An address in the traced process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Addr(pub u64);

impl Addr {
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SyscallArgument {
    /// Prefer the typed accessors.
    pub value: u64,
}

impl SyscallArgument {
    pub const fn new(value: u64) -> Self {
        Self { value }
    }

    pub fn pointer(&self) -> Addr {
        Addr(self.value)
    }

    /// `int`: low 32 bits, sign-extended from bit 31.
    pub fn int(&self) -> i32 {
        self.value as u32 as i32
    }

    /// `unsigned int`
    pub fn uint(&self) -> u32 {
        self.value as u32
    }

    pub fn int64(&self) -> i64 {
        self.value as i64
    }

    pub fn uint64(&self) -> u64 {
        self.value
    }

    pub fn size_t(&self) -> usize {
        self.value as usize
    }

    /// `mode_t`, narrowed to the 16 bits the kernel looks at.
    pub fn mode_t(&self) -> u32 {
        u32::from(self.value as u16)
    }

    /// File descriptor (an `int`).
    pub fn fd(&self) -> i32 {
        self.int()
    }

    /// NUL-terminated string at this address in the tracee.
    pub fn string(&self, mem: &impl RemoteMemory) -> Result<String, DecodeError> {
        mem.read_c_string(self.pointer(), MAX_STRING_LEN)
    }

    /// Resolve this descriptor through `/proc/<pid>/fd` of the tracee.
    pub fn try_path(&self, pid: Pid) -> Result<PathBuf, DecodeError> {
        let fd = self.fd();
        std::fs::read_link(format!("/proc/{pid}/fd/{fd}"))
            .map_err(|source| DecodeError::Unresolvable { fd, source })
    }

    /// Like [`try_path`](Self::try_path), with a placeholder when the fd cannot be resolved.
    pub fn path(&self, pid: Pid) -> String {
        match self.try_path(pid) {
            Ok(path) => path.display().to_string(),
            Err(_) => format!("<unresolvable fd {}>", self.fd()),
        }
    }
}

impl From<u64> for SyscallArgument {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// The six argument slots of one syscall invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArguments(pub [SyscallArgument; 6]);

impl SyscallArguments {
    pub fn iter(&self) -> impl Iterator<Item = &SyscallArgument> {
        self.0.iter()
    }

    pub fn raw(&self) -> [u64; 6] {
        self.0.map(|a| a.value)
    }
}

impl From<[u64; 6]> for SyscallArguments {
    fn from(words: [u64; 6]) -> Self {
        Self(words.map(SyscallArgument::new))
    }
}

impl Index<usize> for SyscallArguments {
    type Output = SyscallArgument;

    fn index(&self, slot: usize) -> &SyscallArgument {
        &self.0[slot]
    }
}

/// Read access to another process's memory.
pub trait RemoteMemory {
    /// Fill as much of `buf` as possible starting at `addr`; returns the byte count.
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, DecodeError>;

    /// Read a NUL-terminated string of at most `limit` bytes.
    ///
    /// Reads never cross a page boundary in one request, so a string that ends
    /// right before an unmapped page is still readable.
    fn read_c_string(&self, addr: Addr, limit: usize) -> Result<String, DecodeError> {
        if addr.is_null() {
            return Err(DecodeError::NullPointer);
        }
        let mut out = Vec::new();
        let mut cursor = addr.0;
        while out.len() < limit {
            let to_page_end = PAGE_SIZE - (cursor % PAGE_SIZE);
            let want = to_page_end.min((limit - out.len()) as u64) as usize;
            let mut chunk = vec![0u8; want];
            let got = self.read_bytes(Addr(cursor), &mut chunk)?;
            if got == 0 {
                break;
            }
            if let Some(nul) = chunk[..got].iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            out.extend_from_slice(&chunk[..got]);
            cursor += got as u64;
        }
        Err(DecodeError::Unterminated { addr, limit })
    }
}

/// Memory of a traced process, read with `process_vm_readv` and falling back to
/// `PTRACE_PEEKDATA` when the former is unavailable.
#[derive(Debug, Clone, Copy)]
pub struct TraceeMemory {
    pid: Pid,
}

impl TraceeMemory {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn peek_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, DecodeError> {
        let mut filled = 0;
        let mut word_addr = addr.0 & !(WORD_SIZE - 1);
        let mut offset = (addr.0 - word_addr) as usize;
        while filled < buf.len() {
            let word = ptrace::read(self.pid, word_addr as ptrace::AddressType)
                .map_err(|source| DecodeError::Read { addr, source })?;
            let bytes = word.to_ne_bytes();
            let take = (bytes.len() - offset).min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&bytes[offset..offset + take]);
            filled += take;
            offset = 0;
            word_addr += WORD_SIZE;
        }
        Ok(filled)
    }
}

impl RemoteMemory for TraceeMemory {
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if addr.is_null() {
            return Err(DecodeError::NullPointer);
        }
        let remote = [RemoteIoVec {
            base: addr.0 as usize,
            len: buf.len(),
        }];
        let mut local = [IoSliceMut::new(buf)];
        match process_vm_readv(self.pid, &mut local, &remote) {
            Ok(n) => Ok(n),
            Err(Errno::ENOSYS) | Err(Errno::EPERM) => self.peek_bytes(addr, buf),
            Err(source) => Err(DecodeError::Read { addr, source }),
        }
    }
}
