//! The tracing channel: launching a target under ptrace and the primitive
//! operations the tracer loop needs on its tracees.

use nix::errno::Errno;
use nix::sys::{
    ptrace,
    signal::{self, Signal},
    wait::{waitpid, WaitPidFlag, WaitStatus},
};
use nix::unistd::Pid;
use std::{
    io,
    os::unix::process::CommandExt,
    process::{Command, Stdio},
    thread::JoinHandle,
};
use tracing::{debug, warn};

use crate::args::{RemoteMemory, TraceeMemory};
use crate::error::TraceError;
use crate::regs::{self, SyscallRegs};
use crate::trigger::{self, Enforcement};

/// ptrace event that stopped a tracee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Fork,
    Vfork,
    Clone,
    Exec,
    Other(i32),
}

impl EventKind {
    pub fn from_raw(event: i32) -> Self {
        match event {
            libc::PTRACE_EVENT_FORK => EventKind::Fork,
            libc::PTRACE_EVENT_VFORK => EventKind::Vfork,
            libc::PTRACE_EVENT_CLONE => EventKind::Clone,
            libc::PTRACE_EVENT_EXEC => EventKind::Exec,
            other => EventKind::Other(other),
        }
    }

    /// Whether the event announces a new tracee.
    pub fn spawns(&self) -> bool {
        matches!(self, EventKind::Fork | EventKind::Vfork | EventKind::Clone)
    }
}

/// What a wait on the tracees reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Syscall entry or exit; the caller keeps track of which.
    Syscall(Pid),
    Event {
        pid: Pid,
        kind: EventKind,
        new_pid: Option<Pid>,
    },
    /// Signal-delivery stop.
    Signal { pid: Pid, signal: Signal },
    Exited { pid: Pid, code: i32 },
    Signaled { pid: Pid, signal: Signal },
    /// No tracees left to wait for.
    NoChildren,
}

/// Operations on the set of traced processes.
pub trait TraceBackend {
    type Memory: RemoteMemory;

    /// First process of the run.
    fn root(&self) -> Pid;

    /// Block until some tracee changes state.
    fn wait(&mut self) -> Result<Stop, TraceError>;

    fn registers(&mut self, pid: Pid) -> Result<SyscallRegs, TraceError>;

    /// Continue `pid` to its next syscall stop, delivering `signal` if any.
    fn resume(&mut self, pid: Pid, signal: Option<Signal>) -> Result<(), TraceError>;

    fn kill(&mut self, pid: Pid) -> Result<(), TraceError>;

    fn memory(&self, pid: Pid) -> Self::Memory;

    /// Called once after the last tracee is gone.
    fn finish(&mut self) {}
}

fn trace_options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACESYSGOOD
        | ptrace::Options::PTRACE_O_EXITKILL
        | ptrace::Options::PTRACE_O_TRACEEXEC
        | ptrace::Options::PTRACE_O_TRACEFORK
        | ptrace::Options::PTRACE_O_TRACEVFORK
        | ptrace::Options::PTRACE_O_TRACECLONE
}

/// Real tracees, driven through ptrace(2) and waitpid(2).
pub struct PtraceBackend {
    root: Pid,
    forwarders: Vec<JoinHandle<()>>,
}

impl PtraceBackend {
    /// Launch `program` with `PTRACE_TRACEME` and stop it right after exec.
    ///
    /// With a trigger, the target's stdout and stderr are piped through
    /// [`trigger::watch_output`] and forwarded to ours.
    pub fn spawn(
        program: &str,
        args: &[String],
        trigger: Option<(&str, Enforcement)>,
    ) -> Result<Self, TraceError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if trigger.is_some() {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        // SAFETY: traceme is async-signal-safe (a single syscall)
        unsafe {
            cmd.pre_exec(|| ptrace::traceme().map_err(io::Error::from));
        }
        let mut child = cmd.spawn().map_err(|source| TraceError::Attach {
            program: program.to_string(),
            source,
        })?;
        let root = Pid::from_raw(child.id() as i32);

        let mut forwarders = Vec::new();
        if let Some((needle, enforcement)) = trigger {
            if let Some(out) = child.stdout.take() {
                forwarders.push(trigger::watch_output(
                    out,
                    io::stdout(),
                    needle.to_string(),
                    enforcement.clone(),
                ));
            }
            if let Some(err) = child.stderr.take() {
                forwarders.push(trigger::watch_output(
                    err,
                    io::stderr(),
                    needle.to_string(),
                    enforcement,
                ));
            }
        }

        // post-exec SIGTRAP
        match waitpid(root, Some(WaitPidFlag::__WALL)) {
            Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {}
            Ok(status) => {
                warn!(?status, "unexpected first stop of {program}");
                abandon(root);
                return Err(TraceError::Setup {
                    pid: root,
                    source: Errno::EINVAL,
                });
            }
            Err(source) => {
                abandon(root);
                return Err(TraceError::Setup { pid: root, source });
            }
        }
        if let Err(source) =
            ptrace::setoptions(root, trace_options()).and_then(|()| ptrace::syscall(root, None))
        {
            abandon(root);
            return Err(TraceError::Setup { pid: root, source });
        }
        debug!(pid = %root, "attached to {program}");

        Ok(Self { root, forwarders })
    }
}

/// Kill a child that never became a tracee of the loop and reap it.
fn abandon(pid: Pid) {
    if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
        debug!(%pid, "kill failed: {e}");
    }
    loop {
        match waitpid(pid, Some(WaitPidFlag::__WALL)) {
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => break,
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
}

impl TraceBackend for PtraceBackend {
    type Memory = TraceeMemory;

    fn root(&self) -> Pid {
        self.root
    }

    fn wait(&mut self) -> Result<Stop, TraceError> {
        loop {
            let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => return Ok(Stop::NoChildren),
                Err(source) => {
                    return Err(TraceError::Channel {
                        context: "waitpid",
                        source,
                    })
                }
            };
            let stop = match status {
                WaitStatus::PtraceSyscall(pid) => Stop::Syscall(pid),
                WaitStatus::PtraceEvent(pid, _, event) => {
                    let kind = EventKind::from_raw(event);
                    let new_pid = if kind.spawns() {
                        ptrace::getevent(pid)
                            .ok()
                            .map(|raw| Pid::from_raw(raw as i32))
                    } else {
                        None
                    };
                    Stop::Event { pid, kind, new_pid }
                }
                WaitStatus::Stopped(pid, signal) => Stop::Signal { pid, signal },
                WaitStatus::Exited(pid, code) => Stop::Exited { pid, code },
                WaitStatus::Signaled(pid, signal, _) => Stop::Signaled { pid, signal },
                _ => continue,
            };
            return Ok(stop);
        }
    }

    fn registers(&mut self, pid: Pid) -> Result<SyscallRegs, TraceError> {
        regs::read(pid)
    }

    fn resume(&mut self, pid: Pid, signal: Option<Signal>) -> Result<(), TraceError> {
        ptrace::syscall(pid, signal).map_err(|e| TraceError::from_ptrace(pid, "resume", e))
    }

    fn kill(&mut self, pid: Pid) -> Result<(), TraceError> {
        signal::kill(pid, Signal::SIGKILL).map_err(|e| TraceError::from_ptrace(pid, "kill", e))
    }

    fn memory(&self, pid: Pid) -> TraceeMemory {
        TraceeMemory::new(pid)
    }

    fn finish(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            if forwarder.join().is_err() {
                warn!("output forwarder panicked");
            }
        }
    }
}
