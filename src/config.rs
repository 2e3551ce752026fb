//! Run configuration.
//!
//! A [`RuntimeConfig`] is built once, validated, and then handed by reference
//! to the policy engine and the tracer. Nothing mutates it while a run is in
//! progress; the one piece of state that may change mid-run (deferred
//! enforcement) lives in [`crate::trigger::Enforcement`].

use serde::Serialize;
use std::{collections::BTreeSet, fmt};

use crate::category::Category;
use crate::error::ConfigError;
use crate::policy::AllowList;
use crate::table::{Arch, SyscallTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Enforce the allow-list.
    Run,
    /// Observe only, never kill.
    Trace,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Run => f.write_str("run"),
            ExecutionMode::Trace => f.write_str("trace"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    pub execution_mode: ExecutionMode,
    pub arch: Arch,
    pub categories: BTreeSet<Category>,
    pub syscalls_allow_list: AllowList,
    pub syscalls_kill_target_if_not_allowed: bool,
    pub verbose_log: bool,
    pub log_search_string: Option<String>,
    pub enforce_on_startup: bool,
    pub trigger_enforce_on_log_match: Option<String>,
}

impl RuntimeConfig {
    pub fn builder(mode: ExecutionMode) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new(mode)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder {
    mode: ExecutionMode,
    arch: Arch,
    categories: Vec<Category>,
    syscalls: Vec<String>,
    kill_on_violation: bool,
    verbose: bool,
    log_search_string: Option<String>,
    enforce_on_startup: bool,
    trigger: Option<String>,
}

impl RuntimeConfigBuilder {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            arch: Arch::host(),
            categories: Vec::new(),
            syscalls: Vec::new(),
            kill_on_violation: true,
            verbose: false,
            log_search_string: None,
            enforce_on_startup: true,
            trigger: None,
        }
    }

    pub fn arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    pub fn allow(mut self, category: Category) -> Self {
        self.categories.push(category);
        self
    }

    pub fn allow_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.categories.extend(categories);
        self
    }

    /// Allow one syscall by name, independent of categories.
    pub fn allow_syscall(mut self, name: impl Into<String>) -> Self {
        self.syscalls.push(name.into());
        self
    }

    pub fn kill_on_violation(mut self, kill: bool) -> Self {
        self.kill_on_violation = kill;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn log_search_string(mut self, needle: Option<String>) -> Self {
        self.log_search_string = needle;
        self
    }

    pub fn enforce_on_startup(mut self, enforce: bool) -> Self {
        self.enforce_on_startup = enforce;
        self
    }

    pub fn trigger_enforce_on_log_match(mut self, needle: Option<String>) -> Self {
        self.trigger = needle;
        self
    }

    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        let search = self.log_search_string.filter(|s| !s.is_empty());
        let trigger = self.trigger.filter(|s| !s.is_empty());

        if trigger.is_some() && self.mode == ExecutionMode::Trace {
            return Err(ConfigError::Conflict(
                "an enforcement trigger has nothing to enforce in trace mode".into(),
            ));
        }
        if trigger.is_some() && search.is_some() {
            return Err(ConfigError::Conflict(
                "a log search string disables enforcement, it cannot be combined with an enforcement trigger"
                    .into(),
            ));
        }

        let table = SyscallTable::for_arch(self.arch);
        if let Some(unknown) = self.syscalls.iter().find(|name| !table.contains(name)) {
            return Err(ConfigError::UnknownSyscall {
                name: unknown.clone(),
                arch: self.arch,
            });
        }

        let categories: BTreeSet<Category> = self.categories.into_iter().collect();
        let allow_list = AllowList::build(
            self.arch,
            &categories,
            self.syscalls.iter().map(String::as_str),
        );

        // searching the log means observing, not blocking
        let observing = search.is_some();

        Ok(RuntimeConfig {
            execution_mode: self.mode,
            arch: self.arch,
            categories,
            syscalls_allow_list: allow_list,
            syscalls_kill_target_if_not_allowed: self.kill_on_violation && !observing,
            verbose_log: self.verbose,
            log_search_string: search,
            enforce_on_startup: self.enforce_on_startup && !observing && trigger.is_none(),
            trigger_enforce_on_log_match: trigger,
        })
    }
}
