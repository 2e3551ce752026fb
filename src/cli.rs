//! Command line of the `gatekeeper` binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::category::Category;
use crate::config::{ExecutionMode, RuntimeConfig, RuntimeConfigBuilder};
use crate::error::ConfigError;
use crate::table::Arch;

#[derive(Parser, Debug)]
#[command(
    name = "gatekeeper",
    version,
    about = "Run a program with an allow-list of syscall categories"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// run a program, killing it on the first syscall outside the allowed categories
    ///
    /// Examples:
    ///             gatekeeper run --allow-file-system --allow-memory-management ls -l
    ///             gatekeeper run --allow-networking --no-kill-on-violation curl example.com
    Run {
        #[command(flatten)]
        policy: PolicyArgs,
        #[command(flatten)]
        log: LogArgs,
        #[command(flatten)]
        target: Target,
    },

    /// log every syscall of a program without enforcing anything
    Trace {
        #[command(flatten)]
        log: LogArgs,
        #[command(flatten)]
        target: Target,
    },

    /// list syscall categories and their syscalls
    Categories {
        /// syscall table to resolve categories against
        #[arg(long, default_value_t = Arch::host())]
        arch: Arch,
        /// only this category
        #[arg(long)]
        category: Option<Category>,
    },
}

#[derive(Args, Debug, Default)]
pub struct PolicyArgs {
    #[arg(long)]
    pub allow_file_system: bool,
    #[arg(long)]
    pub allow_networking: bool,
    #[arg(long)]
    pub allow_process_management: bool,
    #[arg(long)]
    pub allow_memory_management: bool,
    #[arg(long)]
    pub allow_signals: bool,
    #[arg(long)]
    pub allow_timers_and_clocks_management: bool,
    #[arg(long)]
    pub allow_security_and_permissions: bool,
    #[arg(long)]
    pub allow_system_information: bool,
    #[arg(long)]
    pub allow_process_communication: bool,
    #[arg(long)]
    pub allow_process_synchronization: bool,
    #[arg(long)]
    pub allow_misc: bool,

    /// allow a single syscall by name (repeatable)
    #[arg(long = "allow-syscall", value_name = "NAME")]
    pub allow_syscall: Vec<String>,

    /// log violations instead of killing the target
    #[arg(long)]
    pub no_kill_on_violation: bool,

    /// start with enforcement off
    #[arg(long)]
    pub no_enforce_on_startup: bool,

    /// turn enforcement on once the target prints a line containing TEXT
    #[arg(long, value_name = "TEXT")]
    pub trigger_enforce_on_log_match: Option<String>,
}

impl PolicyArgs {
    pub fn categories(&self) -> Vec<Category> {
        [
            (self.allow_file_system, Category::FileSystem),
            (self.allow_networking, Category::Networking),
            (self.allow_process_management, Category::ProcessManagement),
            (self.allow_memory_management, Category::MemoryManagement),
            (self.allow_signals, Category::Signals),
            (self.allow_timers_and_clocks_management, Category::TimersAndClocks),
            (self.allow_security_and_permissions, Category::SecurityAndPermissions),
            (self.allow_system_information, Category::SystemInformation),
            (self.allow_process_communication, Category::ProcessCommunication),
            (self.allow_process_synchronization, Category::ProcessSynchronization),
            (self.allow_misc, Category::Misc),
        ]
        .into_iter()
        .filter_map(|(on, category)| on.then_some(category))
        .collect()
    }
}

#[derive(Args, Debug, Default)]
pub struct LogArgs {
    /// log allowed syscalls too, with decoded arguments
    #[arg(short, long)]
    pub verbose: bool,

    /// only log syscalls whose decoded form contains TEXT (disables enforcement)
    #[arg(long, value_name = "TEXT")]
    pub log_search_string: Option<String>,

    /// event log file, defaults to stderr
    #[arg(long, env = "GATEKEEPER_LOG")]
    pub log: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct Target {
    /// program to run, followed by its arguments
    #[arg(
        value_name = "PROGRAM",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

/// Everything needed to start a traced run.
#[derive(Debug)]
pub struct Invocation {
    pub config: RuntimeConfig,
    pub program: String,
    pub args: Vec<String>,
    pub log: Option<PathBuf>,
}

impl Target {
    fn split(self) -> Result<(String, Vec<String>), ConfigError> {
        let mut words = self.command.into_iter();
        let program = words.next().ok_or(ConfigError::EmptyCommand)?;
        Ok((program, words.collect()))
    }
}

fn with_log_args(builder: RuntimeConfigBuilder, log: &LogArgs) -> RuntimeConfigBuilder {
    builder
        .verbose(log.verbose)
        .log_search_string(log.log_search_string.clone())
}

impl Commands {
    /// Validate a `run` or `trace` command line. `None` for the other commands.
    pub fn invocation(self) -> Option<Result<Invocation, ConfigError>> {
        let (builder, log, target) = match self {
            Commands::Run {
                policy,
                log,
                target,
            } => {
                let mut builder = RuntimeConfig::builder(ExecutionMode::Run)
                    .allow_categories(policy.categories())
                    .kill_on_violation(!policy.no_kill_on_violation)
                    .enforce_on_startup(!policy.no_enforce_on_startup)
                    .trigger_enforce_on_log_match(policy.trigger_enforce_on_log_match);
                for name in policy.allow_syscall {
                    builder = builder.allow_syscall(name);
                }
                (with_log_args(builder, &log), log, target)
            }
            Commands::Trace { log, target } => (
                with_log_args(RuntimeConfig::builder(ExecutionMode::Trace), &log),
                log,
                target,
            ),
            Commands::Categories { .. } => return None,
        };
        Some(build_invocation(builder, log, target))
    }
}

fn build_invocation(
    builder: RuntimeConfigBuilder,
    log: LogArgs,
    target: Target,
) -> Result<Invocation, ConfigError> {
    let config = builder.build()?;
    let (program, args) = target.split()?;
    Ok(Invocation {
        config,
        program,
        args,
        log: log.log,
    })
}
