use anyhow::{Context, Result};
use clap::Parser;
use std::process::exit;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::category::Category;
use gatekeeper::cli::{Cli, Commands, Invocation};
use gatekeeper::error::ConfigError;
use gatekeeper::log::EventLog;
use gatekeeper::policy::PolicyEngine;
use gatekeeper::ptrace::PtraceBackend;
use gatekeeper::table::Arch;
use gatekeeper::tracer::{ShutdownHandle, TraceOutcome, Tracer};
use gatekeeper::trigger::Enforcement;

/// Exit status for a rejected command line or policy.
const CONFIG_ERROR_STATUS: i32 = 2;

fn main() {
    let cli = Cli::parse();
    let verbose = match &cli.cmd {
        Commands::Run { log, .. } | Commands::Trace { log, .. } => log.verbose,
        Commands::Categories { .. } => false,
    };
    init_tracing(verbose);

    let code = match dispatch(cli.cmd) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                CONFIG_ERROR_STATUS
            } else {
                1
            }
        }
    };
    exit(code);
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(cmd: Commands) -> Result<i32> {
    if let Commands::Categories { arch, category } = cmd {
        print_categories(arch, category);
        return Ok(0);
    }
    match cmd.invocation() {
        Some(invocation) => trace_target(invocation?),
        None => Ok(0),
    }
}

fn print_categories(arch: Arch, only: Option<Category>) {
    let selected: Vec<Category> = match only {
        Some(category) => vec![category],
        None => Category::ALL.to_vec(),
    };
    for category in selected {
        let names = category.syscalls(arch);
        println!("{category} ({arch}, {} syscalls)", names.len());
        for name in names {
            println!("  {name}");
        }
    }
}

fn trace_target(invocation: Invocation) -> Result<i32> {
    let Invocation {
        config,
        program,
        args,
        log,
    } = invocation;

    if !config.enforce_on_startup
        && config.trigger_enforce_on_log_match.is_none()
        && config.log_search_string.is_none()
        && config.syscalls_kill_target_if_not_allowed
    {
        warn!("enforcement starts off and no trigger is set, violations will only be logged");
    }

    let enforcement = Enforcement::new(config.enforce_on_startup);
    let events = EventLog::open(log.as_deref()).with_context(|| match &log {
        Some(path) => format!("cannot open event log {}", path.display()),
        None => "cannot open event log".to_string(),
    })?;

    let shutdown = ShutdownHandle::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || handle.request()).context("installing Ctrl-C handler")?;

    let trigger = config
        .trigger_enforce_on_log_match
        .as_deref()
        .map(|needle| (needle, enforcement.clone()));
    let backend = PtraceBackend::spawn(&program, &args, trigger)?;
    let engine = PolicyEngine::new(&config, enforcement);

    let mut tracer = Tracer::new(backend, engine, events, shutdown);
    let outcome = tracer.run()?;
    // flushes the event log
    drop(tracer);

    match &outcome {
        TraceOutcome::KilledByPolicy { pid, syscall } => {
            eprintln!("gatekeeper: killed {program} (pid {pid}): syscall `{syscall}` is not allowed");
        }
        TraceOutcome::Signaled(signal) => warn!("{program} terminated by {signal}"),
        TraceOutcome::Shutdown => warn!("interrupted, {program} was killed"),
        TraceOutcome::Exited(_) => {}
    }
    Ok(outcome.exit_code())
}
