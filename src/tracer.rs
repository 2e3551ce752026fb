//! The tracer loop.
//!
//! One thread drives every tracee of a run. Each tracee alternates between
//! syscall-entry and syscall-exit stops; decisions are taken at entry and a
//! `Kill` ends the whole run: every tracee is killed and reaped and nothing
//! else is decided.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use crate::args::SyscallArguments;
use crate::decode::{self, ArgumentDecoder};
use crate::error::TraceError;
use crate::event::{LogRecord, Phase, TraceEvent};
use crate::log::EventSink;
use crate::policy::{Decision, PolicyEngine};
use crate::ptrace::{Stop, TraceBackend};
use crate::table::SyscallTable;

/// Exit status used when a target is killed for a policy violation.
pub const KILLED_BY_POLICY_STATUS: i32 = 126;
/// Exit status after an interrupt.
pub const SHUTDOWN_STATUS: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    Exited(i32),
    Signaled(Signal),
    KilledByPolicy { pid: Pid, syscall: String },
    Shutdown,
}

impl TraceOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            TraceOutcome::Exited(code) => *code,
            TraceOutcome::Signaled(signal) => 128 + *signal as i32,
            TraceOutcome::KilledByPolicy { .. } => KILLED_BY_POLICY_STATUS,
            TraceOutcome::Shutdown => SHUTDOWN_STATUS,
        }
    }
}

/// Asks a running tracer to stop. Safe to call from a signal-handling thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    /// A live tracee, killed to wake the tracer out of `waitpid`; 0 when none.
    target: Arc<AtomicI32>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the current target tracee, which wakes the tracer out of `waitpid`.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Some(pid) = self.target() {
            let _ = signal::kill(pid, Signal::SIGKILL);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Tracee a request would signal. Always one the tracer has not reaped yet.
    pub fn target(&self) -> Option<Pid> {
        let raw = self.target.load(Ordering::SeqCst);
        (raw > 0).then(|| Pid::from_raw(raw))
    }

    fn set_target(&self, pid: Option<Pid>) {
        self.target
            .store(pid.map_or(0, Pid::as_raw), Ordering::SeqCst);
    }
}

/// A syscall a tracee has entered but not yet left.
#[derive(Debug)]
struct Pending {
    nr: u64,
    name: Option<&'static str>,
    args: SyscallArguments,
    decision: Decision,
    rendered: String,
    logged: bool,
}

#[derive(Debug, Default)]
struct Tracee {
    /// Reported by waitpid at least once. Children announced by a fork event
    /// are not, until their initial SIGSTOP arrives.
    started: bool,
    pending: Option<Pending>,
}

pub struct Tracer<'c, B: TraceBackend, S: EventSink> {
    backend: B,
    engine: PolicyEngine<'c>,
    table: &'static SyscallTable,
    sink: S,
    shutdown: ShutdownHandle,
    tracees: HashMap<Pid, Tracee>,
    root: Pid,
    root_status: Option<TraceOutcome>,
}

impl<'c, B: TraceBackend, S: EventSink> Tracer<'c, B, S> {
    /// `backend` must already hold a root tracee stopped-and-resumed with the
    /// trace options set.
    pub fn new(backend: B, engine: PolicyEngine<'c>, sink: S, shutdown: ShutdownHandle) -> Self {
        let root = backend.root();
        shutdown.set_target(Some(root));
        let table = SyscallTable::for_arch(engine.config().arch);
        let mut tracees = HashMap::new();
        tracees.insert(
            root,
            Tracee {
                started: true,
                pending: None,
            },
        );
        Self {
            backend,
            engine,
            table,
            sink,
            shutdown,
            tracees,
            root,
            root_status: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Drive all tracees until the last one is gone.
    pub fn run(&mut self) -> Result<TraceOutcome, TraceError> {
        let outcome = self.trace_loop();
        if outcome.is_err() {
            // output forwarders only stop once every tracee released the pipes
            self.kill_remaining();
            self.tracees.clear();
        }
        self.shutdown.set_target(None);
        self.backend.finish();
        outcome
    }

    fn trace_loop(&mut self) -> Result<TraceOutcome, TraceError> {
        while !self.tracees.is_empty() {
            let stop = self.backend.wait()?;
            if self.shutdown.is_requested() {
                info!("shutdown requested, killing tracees");
                self.terminate_all()?;
                return Ok(TraceOutcome::Shutdown);
            }
            match stop {
                Stop::NoChildren => break,
                Stop::Syscall(pid) => {
                    if let Some(killed) = self.on_syscall(pid)? {
                        self.terminate_all()?;
                        return Ok(killed);
                    }
                }
                Stop::Event { pid, kind, new_pid } => {
                    if let Some(child) = new_pid {
                        debug!(parent = %pid, %child, ?kind, "following new tracee");
                        self.tracees.entry(child).or_default();
                    }
                    self.resume(pid, None)?;
                }
                Stop::Signal { pid, signal } => self.on_signal(pid, signal)?,
                Stop::Exited { pid, code } => self.on_gone(pid, TraceOutcome::Exited(code)),
                Stop::Signaled { pid, signal } => {
                    self.on_gone(pid, TraceOutcome::Signaled(signal))
                }
            }
        }
        self.root_status
            .take()
            .ok_or(TraceError::Vanished(self.root))
    }

    /// Handle a syscall stop. Returns the outcome when the run must end.
    fn on_syscall(&mut self, pid: Pid) -> Result<Option<TraceOutcome>, TraceError> {
        let regs = match self.backend.registers(pid) {
            Ok(regs) => regs,
            // gone before we looked; its exit is the next thing waitpid reports
            Err(TraceError::Vanished(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let tracee = self.tracees.entry(pid).or_default();
        tracee.started = true;

        match tracee.pending.take() {
            Some(pending) => {
                if pending.logged {
                    let event = TraceEvent {
                        pid,
                        phase: Phase::Exit,
                        nr: pending.nr,
                        name: pending.name,
                        args: pending.args,
                        ret: Some(regs.ret),
                    };
                    self.sink
                        .record(LogRecord::new(&event, Some(pending.decision), pending.rendered));
                }
                self.resume(pid, None)?;
                Ok(None)
            }
            None => {
                if regs.compat {
                    debug!(%pid, nr = regs.number, "32-bit syscall, no table entry");
                }
                let event = TraceEvent {
                    pid,
                    phase: Phase::Entry,
                    nr: regs.number,
                    // compat numbers index a different table
                    name: (!regs.compat)
                        .then(|| self.table.name_of(regs.number))
                        .flatten(),
                    args: SyscallArguments::from(regs.args),
                    ret: None,
                };
                let decision = self.engine.decide(event.name, &event.args);
                let rendered = self.render(&event);
                let logged = self.engine.should_log(decision, &rendered);
                if logged {
                    self.sink
                        .record(LogRecord::new(&event, Some(decision), rendered.clone()));
                }

                if decision == Decision::Kill {
                    let syscall = event.display_name().into_owned();
                    warn!(%pid, %syscall, "syscall not allowed, killing target");
                    return Ok(Some(TraceOutcome::KilledByPolicy { pid, syscall }));
                }

                if let Some(tracee) = self.tracees.get_mut(&pid) {
                    tracee.pending = Some(Pending {
                        nr: event.nr,
                        name: event.name,
                        args: event.args,
                        decision,
                        rendered,
                        logged,
                    });
                }
                self.resume(pid, None)?;
                Ok(None)
            }
        }
    }

    fn render(&self, event: &TraceEvent) -> String {
        let name = event.display_name();
        if self.engine.wants_detail() {
            let memory = self.backend.memory(event.pid);
            ArgumentDecoder::new(event.pid, &memory).summary(&name, &event.args)
        } else {
            decode::raw_summary(&name, &event.args)
        }
    }

    fn on_signal(&mut self, pid: Pid, signal: Signal) -> Result<(), TraceError> {
        match self.tracees.get_mut(&pid) {
            // initial stop of a child we already know from its parent's event
            Some(tracee) if !tracee.started && signal == Signal::SIGSTOP => {
                tracee.started = true;
                self.resume(pid, None)
            }
            Some(_) => self.resume(pid, Some(signal)),
            // initial stop of a child whose parent's event has not arrived yet
            None if signal == Signal::SIGSTOP => {
                self.tracees.insert(
                    pid,
                    Tracee {
                        started: true,
                        pending: None,
                    },
                );
                self.resume(pid, None)
            }
            None => {
                self.tracees.insert(pid, Tracee::default());
                self.resume(pid, Some(signal))
            }
        }
    }

    fn on_gone(&mut self, pid: Pid, status: TraceOutcome) {
        debug!(%pid, ?status, "tracee terminated");
        self.tracees.remove(&pid);
        if pid == self.root {
            self.root_status = Some(status);
        }
        if self.shutdown.target() == Some(pid) {
            self.shutdown
                .set_target(self.tracees.keys().next().copied());
        }
    }

    /// Resume `pid`, dropping it quietly if it has vanished.
    fn resume(&mut self, pid: Pid, signal: Option<Signal>) -> Result<(), TraceError> {
        match self.backend.resume(pid, signal) {
            Err(TraceError::Vanished(_)) => Ok(()),
            other => other,
        }
    }

    /// SIGKILL every tracee and reap them all, ignoring whatever else they report.
    fn terminate_all(&mut self) -> Result<(), TraceError> {
        self.kill_remaining();
        while !self.tracees.is_empty() {
            match self.backend.wait()? {
                Stop::NoChildren => break,
                Stop::Exited { pid, .. } | Stop::Signaled { pid, .. } => {
                    self.tracees.remove(&pid);
                }
                Stop::Event { pid, new_pid, .. } => {
                    if let Some(child) = new_pid {
                        self.tracees.insert(child, Tracee::default());
                        let _ = self.backend.kill(child);
                    }
                    let _ = self.backend.kill(pid);
                }
                Stop::Syscall(pid) | Stop::Signal { pid, .. } => {
                    self.tracees.entry(pid).or_default();
                    let _ = self.backend.kill(pid);
                }
            }
        }
        self.tracees.clear();
        Ok(())
    }

    fn kill_remaining(&mut self) {
        let pids: Vec<Pid> = self.tracees.keys().copied().collect();
        for pid in pids {
            if let Err(e) = self.backend.kill(pid) {
                debug!(%pid, "kill failed: {e}");
            }
        }
    }
}

impl<B: TraceBackend, S: EventSink> Drop for Tracer<'_, B, S> {
    fn drop(&mut self) {
        if !self.tracees.is_empty() {
            warn!(count = self.tracees.len(), "killing leftover tracees");
            self.kill_remaining();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Addr;
    use crate::category::Category;
    use crate::config::{ExecutionMode, RuntimeConfig};
    use crate::error::DecodeError;
    use crate::ptrace::EventKind;
    use crate::regs::SyscallRegs;
    use crate::table::Arch;
    use crate::trigger::Enforcement;
    use nix::errno::Errno;
    use std::collections::VecDeque;

    /// NUL-terminated strings mapped at fixed addresses.
    #[derive(Clone, Default)]
    struct Strings(Vec<(u64, &'static [u8])>);

    impl crate::args::RemoteMemory for Strings {
        fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, DecodeError> {
            let (base, text) = self
                .0
                .iter()
                .find(|(base, text)| (*base..*base + text.len() as u64).contains(&addr.0))
                .ok_or(DecodeError::Read {
                    addr,
                    source: Errno::EFAULT,
                })?;
            let start = (addr.0 - base) as usize;
            let n = buf.len().min(text.len() - start);
            buf[..n].copy_from_slice(&text[start..start + n]);
            Ok(n)
        }
    }

    /// Replays a fixed sequence of stops and register snapshots.
    #[derive(Default)]
    struct Scripted {
        root: i32,
        stops: VecDeque<Stop>,
        regs: VecDeque<SyscallRegs>,
        strings: Strings,
        /// Handle whose target is sampled at every wait.
        shutdown: Option<ShutdownHandle>,
        targets: Vec<Option<Pid>>,
        /// Fail the wait once the script is exhausted instead of reporting no children.
        lose_channel: bool,
        resumed: Vec<(Pid, Option<Signal>)>,
        killed: Vec<Pid>,
        killed_before_finish: Option<Vec<Pid>>,
    }

    impl Scripted {
        fn new(root: i32) -> Self {
            Self {
                root,
                ..Default::default()
            }
        }

        fn stop(mut self, stop: Stop) -> Self {
            self.stops.push_back(stop);
            self
        }

        fn string(mut self, addr: u64, text: &'static [u8]) -> Self {
            self.strings.0.push((addr, text));
            self
        }

        /// Entry and exit stops of one syscall of `pid`.
        fn call(mut self, pid: i32, name: &str, args: [u64; 6], ret: i64) -> Self {
            let number = x86_64(name);
            let pid = Pid::from_raw(pid);
            self.stops.push_back(Stop::Syscall(pid));
            self.regs.push_back(SyscallRegs {
                number,
                args,
                ret: -(libc::ENOSYS as i64),
                compat: false,
            });
            self.stops.push_back(Stop::Syscall(pid));
            self.regs.push_back(SyscallRegs {
                number,
                args,
                ret,
                compat: false,
            });
            self
        }

        /// Only the entry stop.
        fn enter(mut self, pid: i32, name: &str, args: [u64; 6]) -> Self {
            self.stops.push_back(Stop::Syscall(Pid::from_raw(pid)));
            self.regs.push_back(SyscallRegs {
                number: x86_64(name),
                args,
                ..Default::default()
            });
            self
        }
    }

    impl TraceBackend for Scripted {
        type Memory = Strings;

        fn root(&self) -> Pid {
            Pid::from_raw(self.root)
        }

        fn wait(&mut self) -> Result<Stop, TraceError> {
            if let Some(shutdown) = &self.shutdown {
                self.targets.push(shutdown.target());
            }
            match self.stops.pop_front() {
                Some(stop) => Ok(stop),
                None if self.lose_channel => Err(TraceError::Channel {
                    context: "waitpid",
                    source: Errno::EIO,
                }),
                None => Ok(Stop::NoChildren),
            }
        }

        fn registers(&mut self, _pid: Pid) -> Result<SyscallRegs, TraceError> {
            Ok(self.regs.pop_front().expect("script ran out of registers"))
        }

        fn resume(&mut self, pid: Pid, signal: Option<Signal>) -> Result<(), TraceError> {
            self.resumed.push((pid, signal));
            Ok(())
        }

        fn kill(&mut self, pid: Pid) -> Result<(), TraceError> {
            self.killed.push(pid);
            Ok(())
        }

        fn memory(&self, _pid: Pid) -> Strings {
            self.strings.clone()
        }

        fn finish(&mut self) {
            self.killed_before_finish = Some(self.killed.clone());
        }
    }

    fn x86_64(name: &str) -> u64 {
        SyscallTable::for_arch(Arch::X86_64)
            .number_of(name)
            .unwrap()
    }

    fn config(mode: ExecutionMode, categories: &[Category], verbose: bool) -> RuntimeConfig {
        RuntimeConfig::builder(mode)
            .arch(Arch::X86_64)
            .allow_categories(categories.iter().copied())
            .verbose(verbose)
            .build()
            .unwrap()
    }

    fn run(
        config: &RuntimeConfig,
        script: Scripted,
    ) -> (Result<TraceOutcome, TraceError>, Vec<LogRecord>, Vec<Pid>) {
        let engine = PolicyEngine::new(config, Enforcement::new(config.enforce_on_startup));
        let mut tracer = Tracer::new(script, engine, Vec::new(), ShutdownHandle::new());
        let outcome = tracer.run();
        let records = tracer.sink().clone();
        let killed = tracer.backend().killed.clone();
        (outcome, records, killed)
    }

    const OPEN_ARGS: [u64; 6] = [0x1000, 0, 0, 0, 0, 0];
    const SOCKET_INET: [u64; 6] = [libc::AF_INET as u64, 1, 0, 0, 0, 0];

    #[test]
    fn test_file_system_target_killed_on_socket() {
        let config = config(ExecutionMode::Run, &[Category::FileSystem], true);
        let script = Scripted::new(100)
            .call(100, "open", OPEN_ARGS, 3)
            .call(100, "read", [3, 0x2000, 64, 0, 0, 0], 12)
            .call(100, "write", [1, 0x2000, 12, 0, 0, 0], 12)
            .call(100, "close", [3, 0, 0, 0, 0, 0], 0)
            .enter(100, "socket", SOCKET_INET)
            // anything after the kill is never decided
            .stop(Stop::Syscall(Pid::from_raw(100)))
            .stop(Stop::Signaled {
                pid: Pid::from_raw(100),
                signal: Signal::SIGKILL,
            });

        let (outcome, records, killed) = run(&config, script);

        assert_eq!(
            outcome.unwrap(),
            TraceOutcome::KilledByPolicy {
                pid: Pid::from_raw(100),
                syscall: "socket".into()
            }
        );
        assert!(killed.contains(&Pid::from_raw(100)));

        let open = &records[0];
        assert_eq!(open.syscall, "open");
        assert_eq!(open.phase, Phase::Entry);
        assert_eq!(open.decision, Some(Decision::Allow));
        assert!(records
            .iter()
            .any(|r| r.syscall == "open" && r.phase == Phase::Exit && r.ret == Some(3)));

        let last = records.last().unwrap();
        assert_eq!(last.syscall, "socket");
        assert_eq!(last.phase, Phase::Entry);
        assert_eq!(last.decision, Some(Decision::Kill));
        assert_eq!(
            records.iter().filter(|r| r.syscall == "socket").count(),
            1,
            "no exit record for the killed call"
        );
    }

    #[test]
    fn test_allowed_run_mirrors_exit_code() {
        let config = config(ExecutionMode::Run, &[Category::FileSystem], false);
        let script = Scripted::new(7)
            .call(7, "openat", [(-100i64) as u64, 0x1000, 0, 0, 0, 0], 3)
            .enter(7, "exit_group", [3, 0, 0, 0, 0, 0])
            .stop(Stop::Exited {
                pid: Pid::from_raw(7),
                code: 3,
            });

        let (outcome, records, killed) = run(&config, script);
        assert_eq!(outcome.unwrap(), TraceOutcome::Exited(3));
        assert!(records.is_empty(), "only violations are logged: {records:?}");
        assert!(killed.is_empty());
    }

    #[test]
    fn test_trace_mode_logs_everything_and_never_kills() {
        let config = config(ExecutionMode::Trace, &[], false);
        let script = Scripted::new(9)
            .call(9, "socket", SOCKET_INET, 3)
            .call(9, "connect", [3, 0x3000, 16, 0, 0, 0], 0)
            .enter(9, "exit_group", [0; 6])
            .stop(Stop::Exited {
                pid: Pid::from_raw(9),
                code: 0,
            });

        let (outcome, records, killed) = run(&config, script);
        assert_eq!(outcome.unwrap(), TraceOutcome::Exited(0));
        assert!(killed.is_empty());
        assert_eq!(records.len(), 5);
        assert!(records
            .iter()
            .all(|r| r.decision == Some(Decision::LogOnly)));
        assert_eq!(records[0].args, "socket(0x2, 0x1, 0x0, 0x0, 0x0, 0x0)");
    }

    #[test]
    fn test_children_are_followed() {
        let config = config(ExecutionMode::Run, &[Category::ProcessManagement], false);
        let parent = Pid::from_raw(20);
        let child = Pid::from_raw(21);
        let script = Scripted::new(20)
            .enter(20, "clone", [0x1200011, 0, 0, 0, 0, 0])
            .stop(Stop::Event {
                pid: parent,
                kind: EventKind::Clone,
                new_pid: Some(child),
            })
            .stop(Stop::Signal {
                pid: child,
                signal: Signal::SIGSTOP,
            })
            .enter(21, "connect", [3, 0x3000, 16, 0, 0, 0])
            .stop(Stop::Signaled {
                pid: child,
                signal: Signal::SIGKILL,
            })
            .stop(Stop::Signaled {
                pid: parent,
                signal: Signal::SIGKILL,
            });

        let (outcome, records, killed) = run(&config, script);
        assert_eq!(
            outcome.unwrap(),
            TraceOutcome::KilledByPolicy {
                pid: child,
                syscall: "connect".into()
            }
        );
        assert!(killed.contains(&parent) && killed.contains(&child));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pid, 21);
    }

    #[test]
    fn test_signals_are_reinjected() {
        let config = config(ExecutionMode::Trace, &[], false);
        let root = Pid::from_raw(5);
        let script = Scripted::new(5)
            .stop(Stop::Signal {
                pid: root,
                signal: Signal::SIGUSR1,
            })
            .stop(Stop::Exited { pid: root, code: 0 });

        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let mut tracer = Tracer::new(script, engine, Vec::new(), ShutdownHandle::new());
        assert_eq!(tracer.run().unwrap(), TraceOutcome::Exited(0));
        assert_eq!(
            tracer.backend().resumed,
            vec![(root, Some(Signal::SIGUSR1))]
        );
    }

    #[test]
    fn test_unknown_number_is_denied() {
        let config = config(ExecutionMode::Run, &[Category::Misc], false);
        let mut script = Scripted::new(3);
        script.stops.push_back(Stop::Syscall(Pid::from_raw(3)));
        script.regs.push_back(SyscallRegs {
            number: 999,
            ..Default::default()
        });
        let (outcome, records, _) = run(&config, script);
        assert_eq!(
            outcome.unwrap(),
            TraceOutcome::KilledByPolicy {
                pid: Pid::from_raw(3),
                syscall: "syscall_999".into()
            }
        );
        assert_eq!(records[0].syscall, "syscall_999");
    }

    #[test]
    fn test_shutdown_kills_and_reports() {
        let config = config(ExecutionMode::Trace, &[], false);
        let root = Pid::from_raw(11);
        let script = Scripted::new(11)
            .call(11, "getpid", [0; 6], 11)
            .stop(Stop::Signaled {
                pid: root,
                signal: Signal::SIGKILL,
            });
        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let shutdown = ShutdownHandle::new();
        let mut tracer = Tracer::new(script, engine, Vec::new(), shutdown.clone());

        // set the flag only; request() would signal a real pid 11
        shutdown.requested.store(true, Ordering::SeqCst);
        assert_eq!(tracer.run().unwrap(), TraceOutcome::Shutdown);
        assert!(tracer.backend().killed.contains(&root));
    }

    #[test]
    fn test_shutdown_target_follows_live_tracees() {
        let config = config(ExecutionMode::Trace, &[], false);
        let root = Pid::from_raw(40);
        let child = Pid::from_raw(41);
        let shutdown = ShutdownHandle::new();
        let mut script = Scripted::new(40)
            .stop(Stop::Event {
                pid: root,
                kind: EventKind::Fork,
                new_pid: Some(child),
            })
            .stop(Stop::Signal {
                pid: child,
                signal: Signal::SIGSTOP,
            })
            .stop(Stop::Exited { pid: root, code: 0 })
            .stop(Stop::Exited { pid: child, code: 0 });
        script.shutdown = Some(shutdown.clone());

        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let mut tracer = Tracer::new(script, engine, Vec::new(), shutdown.clone());
        assert_eq!(shutdown.target(), Some(root));
        assert_eq!(tracer.run().unwrap(), TraceOutcome::Exited(0));

        // the child outlives the root, so it becomes the target
        assert_eq!(
            tracer.backend().targets,
            vec![Some(root), Some(root), Some(root), Some(child)]
        );
        assert_eq!(shutdown.target(), None);
    }

    #[test]
    fn test_shutdown_target_cleared_after_run() {
        let config = config(ExecutionMode::Run, &[Category::FileSystem], false);
        let shutdown = ShutdownHandle::new();
        let script = Scripted::new(12).stop(Stop::Exited {
            pid: Pid::from_raw(12),
            code: 0,
        });
        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let mut tracer = Tracer::new(script, engine, Vec::new(), shutdown.clone());
        tracer.run().unwrap();

        // a late Ctrl-C must not signal a reaped, possibly reused pid
        assert_eq!(shutdown.target(), None);
        shutdown.request();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn test_channel_error_kills_before_finish() {
        let config = config(ExecutionMode::Trace, &[], false);
        let root = Pid::from_raw(50);
        let child = Pid::from_raw(51);
        let mut script = Scripted::new(50)
            .stop(Stop::Event {
                pid: root,
                kind: EventKind::Clone,
                new_pid: Some(child),
            })
            .call(50, "getpid", [0; 6], 50);
        script.lose_channel = true;

        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let mut tracer = Tracer::new(script, engine, Vec::new(), ShutdownHandle::new());
        let err = tracer.run().unwrap_err();
        assert!(matches!(err, TraceError::Channel { .. }), "{err:?}");

        let mut killed = tracer
            .backend()
            .killed_before_finish
            .clone()
            .expect("finish was not called");
        killed.sort();
        assert_eq!(killed, vec![root, child]);
    }

    #[test]
    fn test_compat_syscall_is_denied() {
        // 102 is getuid in the 64-bit table, which the category allows
        let config = config(ExecutionMode::Run, &[Category::SecurityAndPermissions], false);
        let mut script = Scripted::new(60);
        script.stops.push_back(Stop::Syscall(Pid::from_raw(60)));
        script.regs.push_back(SyscallRegs {
            number: 102,
            compat: true,
            ..Default::default()
        });

        let (outcome, records, killed) = run(&config, script);
        assert_eq!(
            outcome.unwrap(),
            TraceOutcome::KilledByPolicy {
                pid: Pid::from_raw(60),
                syscall: "syscall_102".into()
            }
        );
        assert_eq!(records[0].syscall, "syscall_102");
        assert_eq!(records[0].decision, Some(Decision::Kill));
        assert_eq!(killed, vec![Pid::from_raw(60)]);
    }

    #[test]
    fn test_search_string_selects_records() {
        let config = RuntimeConfig::builder(ExecutionMode::Run)
            .arch(Arch::X86_64)
            .allow_categories([Category::FileSystem])
            .log_search_string(Some("hosts".into()))
            .build()
            .unwrap();
        let at_fdcwd = libc::AT_FDCWD as i64 as u64;
        let script = Scripted::new(70)
            .string(0x1000, b"/etc/hosts\0")
            .string(0x2000, b"/etc/passwd\0")
            .call(70, "openat", [at_fdcwd, 0x1000, 0, 0, 0, 0], 3)
            .call(70, "openat", [at_fdcwd, 0x2000, 0, 0, 0, 0], 4)
            .call(70, "socket", SOCKET_INET, 5)
            .call(70, "chroot", [0x1000, 0, 0, 0, 0, 0], -1)
            .enter(70, "exit_group", [0; 6])
            .stop(Stop::Exited {
                pid: Pid::from_raw(70),
                code: 0,
            });

        let (outcome, records, killed) = run(&config, script);
        // a search string turns kill-on-violation off
        assert_eq!(outcome.unwrap(), TraceOutcome::Exited(0));
        assert!(killed.is_empty());

        let seen: Vec<_> = records
            .iter()
            .map(|r| (r.syscall.as_str(), r.phase, r.decision))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("openat", Phase::Entry, Some(Decision::Allow)),
                ("openat", Phase::Exit, Some(Decision::Allow)),
                ("chroot", Phase::Entry, Some(Decision::LogOnly)),
                ("chroot", Phase::Exit, Some(Decision::LogOnly)),
            ]
        );
        assert_eq!(records[0].args, "openat(AT_FDCWD, \"/etc/hosts\", 0x0, 0o0)");
        assert_eq!(records[1].ret, Some(3));
        assert_eq!(records[3].ret, Some(-1));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TraceOutcome::Exited(4).exit_code(), 4);
        assert_eq!(TraceOutcome::Signaled(Signal::SIGSEGV).exit_code(), 139);
        assert_eq!(
            TraceOutcome::KilledByPolicy {
                pid: Pid::from_raw(1),
                syscall: "socket".into()
            }
            .exit_code(),
            126
        );
        assert_eq!(TraceOutcome::Shutdown.exit_code(), 130);
    }
}
