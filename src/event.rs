//! Syscall stop events and the records written to the event log.

use chrono::{DateTime, Utc};
use nix::unistd::Pid;
use serde::Serialize;
use std::borrow::Cow;

use crate::args::SyscallArguments;
use crate::policy::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Entry,
    Exit,
}

/// One syscall stop of one tracee.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub pid: Pid,
    pub phase: Phase,
    pub nr: u64,
    /// `None` when the number is missing from the syscall table.
    pub name: Option<&'static str>,
    pub args: SyscallArguments,
    /// Return value, only meaningful on exit.
    pub ret: Option<i64>,
}

impl TraceEvent {
    pub fn display_name(&self) -> Cow<'static, str> {
        match self.name {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("syscall_{}", self.nr)),
        }
    }
}

/// One line of the structured event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub pid: i32,
    pub phase: Phase,
    pub syscall: String,
    pub nr: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub args: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ret: Option<i64>,
}

impl LogRecord {
    /// `args` is the rendered summary of the call (decoded or raw).
    pub fn new(event: &TraceEvent, decision: Option<Decision>, args: String) -> Self {
        Self {
            ts: Utc::now(),
            pid: event.pid.as_raw(),
            phase: event.phase,
            syscall: event.display_name().into_owned(),
            nr: event.nr,
            decision,
            args,
            ret: event.ret,
        }
    }
}
