//! Syscall register layout of the host architecture.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::TraceError;

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64"
)))]
compile_error!("gatekeeper only supports x86_64, aarch64 and riscv64");

/// Syscall number, argument words and return value of a stopped tracee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallRegs {
    pub number: u64,
    pub args: [u64; 6],
    /// Meaningful at syscall exit only.
    pub ret: i64,
    /// Entered through the 32-bit compat ABI; `number` is then from another table.
    pub compat: bool,
}

/// User code segment selector of 32-bit processes on x86_64.
#[cfg(target_arch = "x86_64")]
const COMPAT_CS: u64 = 0x23;

#[cfg(target_arch = "x86_64")]
pub fn from_user_regs(r: &libc::user_regs_struct) -> SyscallRegs {
    SyscallRegs {
        number: r.orig_rax,
        args: [r.rdi, r.rsi, r.rdx, r.r10, r.r8, r.r9],
        ret: r.rax as i64,
        compat: r.cs == COMPAT_CS,
    }
}

#[cfg(target_arch = "aarch64")]
pub fn from_user_regs(r: &libc::user_regs_struct) -> SyscallRegs {
    // x8 = syscall #, x0 doubles as the return value
    SyscallRegs {
        number: r.regs[8],
        args: [r.regs[0], r.regs[1], r.regs[2], r.regs[3], r.regs[4], r.regs[5]],
        ret: r.regs[0] as i64,
        compat: false,
    }
}

#[cfg(target_arch = "riscv64")]
pub fn from_user_regs(r: &libc::user_regs_struct) -> SyscallRegs {
    SyscallRegs {
        number: r.a7,
        args: [r.a0, r.a1, r.a2, r.a3, r.a4, r.a5],
        ret: r.a0 as i64,
        compat: false,
    }
}

pub fn read(pid: Pid) -> Result<SyscallRegs, TraceError> {
    ptrace::getregs(pid)
        .map(|regs| from_user_regs(&regs))
        .map_err(|e| TraceError::from_ptrace(pid, "getregs", e))
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    fn test_x86_64_layout() {
        // SAFETY: user_regs_struct is plain integers
        let mut r: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        r.orig_rax = 257;
        r.rax = (-2i64) as u64;
        r.rdi = (-100i64) as u64;
        r.rsi = 0x5000;
        r.rdx = 0x80000;
        r.r10 = 0o644;
        r.r8 = 8;
        r.r9 = 9;

        let regs = from_user_regs(&r);
        assert_eq!(regs.number, 257);
        assert_eq!(regs.args, [(-100i64) as u64, 0x5000, 0x80000, 0o644, 8, 9]);
        assert_eq!(regs.ret, -2);
        assert!(!regs.compat);
    }

    #[test]
    fn test_x86_64_int80_is_compat() {
        // SAFETY: user_regs_struct is plain integers
        let mut r: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        r.cs = 0x23;
        r.orig_rax = 102;
        assert!(from_user_regs(&r).compat);

        r.cs = 0x33;
        assert!(!from_user_regs(&r).compat);
    }
}
