//! gatekeeper: run a program under ptrace and allow only the syscall
//! categories it was granted.

pub mod args;
pub mod category;
pub mod cli;
pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod log;
pub mod policy;
pub mod ptrace;
pub mod regs;
pub mod table;
pub mod tracer;
pub mod trigger;
