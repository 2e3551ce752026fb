//! Allow-list construction and the per-syscall decision.

use serde::Serialize;
use std::{collections::BTreeSet, fmt};

use crate::args::SyscallArguments;
use crate::category::Category;
use crate::config::{ExecutionMode, RuntimeConfig};
use crate::table::Arch;
use crate::trigger::Enforcement;

/// Always allowed, whatever the selected categories: a target must be able to
/// terminate and to return from a signal handler.
pub const BASELINE: [&str; 3] = ["exit", "exit_group", "rt_sigreturn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    LogOnly,
    Kill,
}

impl Decision {
    pub fn is_violation(&self) -> bool {
        !matches!(self, Decision::Allow)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Allow => "allow",
            Decision::LogOnly => "log-only",
            Decision::Kill => "kill",
        })
    }
}

/// Syscall names a target may invoke in run mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AllowList {
    names: BTreeSet<String>,
}

impl AllowList {
    /// Union of `categories` on `arch`, the baseline and any extra names.
    pub fn build<'a>(
        arch: Arch,
        categories: &BTreeSet<Category>,
        extra: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut names: BTreeSet<String> = BASELINE.iter().map(|s| s.to_string()).collect();
        for category in categories {
            names.extend(category.syscalls(arch).into_iter().map(str::to_string));
        }
        names.extend(extra.into_iter().map(str::to_string));
        Self { names }
    }

    pub fn from_categories(arch: Arch, categories: &BTreeSet<Category>) -> Self {
        Self::build(arch, categories, [])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// A grant that looks at argument values, for calls whose category depends on
/// how they are invoked.
struct ArgumentRule {
    syscalls: &'static [&'static str],
    category: Category,
    grants: fn(&SyscallArguments) -> bool,
}

/// A local (`AF_UNIX`) socket is interprocess communication, not networking.
fn unix_domain(args: &SyscallArguments) -> bool {
    args[0].int() == libc::AF_UNIX
}

const ARGUMENT_RULES: &[ArgumentRule] = &[ArgumentRule {
    syscalls: &["socket", "socketpair"],
    category: Category::ProcessCommunication,
    grants: unix_domain,
}];

pub struct PolicyEngine<'c> {
    config: &'c RuntimeConfig,
    enforcement: Enforcement,
}

impl<'c> PolicyEngine<'c> {
    pub fn new(config: &'c RuntimeConfig, enforcement: Enforcement) -> Self {
        Self {
            config,
            enforcement,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.config
    }

    pub fn enforcement(&self) -> &Enforcement {
        &self.enforcement
    }

    /// `name` is `None` for numbers missing from the syscall table; those are
    /// never allowed in run mode.
    pub fn decide(&self, name: Option<&str>, args: &SyscallArguments) -> Decision {
        if self.config.execution_mode == ExecutionMode::Trace {
            return Decision::LogOnly;
        }
        if let Some(name) = name {
            if self.config.syscalls_allow_list.contains(name) || self.granted_by_args(name, args)
            {
                return Decision::Allow;
            }
        }
        if self.config.syscalls_kill_target_if_not_allowed && self.enforcement.is_active() {
            Decision::Kill
        } else {
            Decision::LogOnly
        }
    }

    fn granted_by_args(&self, name: &str, args: &SyscallArguments) -> bool {
        ARGUMENT_RULES.iter().any(|rule| {
            rule.syscalls.contains(&name)
                && self.config.categories.contains(&rule.category)
                && (rule.grants)(args)
        })
    }

    /// Whether arguments must be decoded before [`should_log`](Self::should_log)
    /// can be answered.
    pub fn wants_detail(&self) -> bool {
        self.config.verbose_log || self.config.log_search_string.is_some()
    }

    pub fn should_log(&self, decision: Decision, rendered: &str) -> bool {
        if let Some(needle) = &self.config.log_search_string {
            return rendered.contains(needle.as_str());
        }
        match self.config.execution_mode {
            ExecutionMode::Trace => true,
            ExecutionMode::Run => decision.is_violation() || self.config.verbose_log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SyscallTable;

    fn args(words: [u64; 6]) -> SyscallArguments {
        SyscallArguments::from(words)
    }

    fn run_config(categories: &[Category]) -> RuntimeConfig {
        RuntimeConfig::builder(ExecutionMode::Run)
            .arch(Arch::X86_64)
            .allow_categories(categories.iter().copied())
            .build()
            .unwrap()
    }

    #[test]
    fn test_allow_list_is_union_plus_baseline() {
        let both: BTreeSet<_> = [Category::FileSystem, Category::MemoryManagement].into();
        let list = AllowList::from_categories(Arch::X86_64, &both);

        let mut expected: BTreeSet<String> = BASELINE.iter().map(|s| s.to_string()).collect();
        for cat in &both {
            expected.extend(cat.syscalls(Arch::X86_64).into_iter().map(str::to_string));
        }
        assert_eq!(list.iter().map(str::to_string).collect::<BTreeSet<_>>(), expected);
        assert!(list.contains("mmap"));
        assert!(list.contains("open"));
        assert!(!list.contains("socket"));

        // selecting a category twice changes nothing
        let again = AllowList::build(
            Arch::X86_64,
            &both,
            ["mmap", "exit"].iter().copied(),
        );
        assert_eq!(again, list);
    }

    #[test]
    fn test_empty_allow_list_keeps_baseline() {
        let list = AllowList::from_categories(Arch::Riscv64, &BTreeSet::new());
        assert_eq!(list.len(), BASELINE.len());
        for name in BASELINE {
            assert!(list.contains(name));
        }
    }

    #[test]
    fn test_allow_list_resolves_in_table() {
        for arch in Arch::ALL {
            let all: BTreeSet<_> = Category::ALL.into_iter().collect();
            let list = AllowList::from_categories(arch, &all);
            let table = SyscallTable::for_arch(arch);
            for name in list.iter() {
                assert!(table.contains(name), "{name} missing on {arch}");
            }
        }
    }

    #[test]
    fn test_run_mode_decisions() {
        let config = run_config(&[Category::FileSystem]);
        let engine = PolicyEngine::new(&config, Enforcement::new(config.enforce_on_startup));
        let none = SyscallArguments::default();

        assert_eq!(engine.decide(Some("open"), &none), Decision::Allow);
        assert_eq!(engine.decide(Some("exit_group"), &none), Decision::Allow);
        assert_eq!(engine.decide(Some("connect"), &none), Decision::Kill);
        assert_eq!(engine.decide(None, &none), Decision::Kill);
    }

    #[test]
    fn test_exact_names_only() {
        let config = run_config(&[Category::FileSystem]);
        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let none = SyscallArguments::default();
        assert_eq!(engine.decide(Some("ope"), &none), Decision::Kill);
        assert_eq!(engine.decide(Some("open_tree"), &none), Decision::Kill);
        assert_eq!(engine.decide(Some("OPEN"), &none), Decision::Kill);
    }

    #[test]
    fn test_without_kill_violations_are_logged() {
        let config = RuntimeConfig::builder(ExecutionMode::Run)
            .kill_on_violation(false)
            .build()
            .unwrap();
        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let decision = engine.decide(Some("socket"), &SyscallArguments::default());
        assert_eq!(decision, Decision::LogOnly);
        assert!(engine.should_log(decision, "socket(2, 0x1, 0)"));
        assert!(!engine.should_log(Decision::Allow, "exit_group(0)"));
    }

    #[test]
    fn test_trace_mode_never_kills() {
        let config = RuntimeConfig::builder(ExecutionMode::Trace).build().unwrap();
        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        let table = SyscallTable::for_arch(Arch::X86_64);
        for nr in 0..500 {
            let decision = engine.decide(table.name_of(nr), &SyscallArguments::default());
            assert_eq!(decision, Decision::LogOnly);
            assert!(engine.should_log(decision, "anything"));
        }
    }

    #[test]
    fn test_deferred_enforcement() {
        let config = RuntimeConfig::builder(ExecutionMode::Run)
            .trigger_enforce_on_log_match(Some("ready".into()))
            .build()
            .unwrap();
        let switch = Enforcement::new(config.enforce_on_startup);
        let engine = PolicyEngine::new(&config, switch.clone());
        let none = SyscallArguments::default();

        assert_eq!(engine.decide(Some("socket"), &none), Decision::LogOnly);
        switch.activate();
        assert_eq!(engine.decide(Some("socket"), &none), Decision::Kill);
    }

    #[test]
    fn test_unix_socket_grant() {
        let af_unix = libc::AF_UNIX as u64;
        let af_inet = libc::AF_INET as u64;

        let ipc = run_config(&[Category::ProcessCommunication]);
        let engine = PolicyEngine::new(&ipc, Enforcement::new(true));
        assert_eq!(
            engine.decide(Some("socket"), &args([af_unix, 1, 0, 0, 0, 0])),
            Decision::Allow
        );
        assert_eq!(
            engine.decide(Some("socketpair"), &args([af_unix, 1, 0, 0x7ff0, 0, 0])),
            Decision::Allow
        );
        assert_eq!(
            engine.decide(Some("socket"), &args([af_inet, 1, 0, 0, 0, 0])),
            Decision::Kill
        );

        let plain = run_config(&[Category::FileSystem]);
        let engine = PolicyEngine::new(&plain, Enforcement::new(true));
        assert_eq!(
            engine.decide(Some("socket"), &args([af_unix, 1, 0, 0, 0, 0])),
            Decision::Kill
        );
    }

    #[test]
    fn test_search_string_filters_log() {
        let config = RuntimeConfig::builder(ExecutionMode::Run)
            .log_search_string(Some("hosts".into()))
            .build()
            .unwrap();
        let engine = PolicyEngine::new(&config, Enforcement::new(config.enforce_on_startup));
        assert!(engine.wants_detail());

        let decision = engine.decide(Some("openat"), &SyscallArguments::default());
        assert_eq!(decision, Decision::LogOnly);
        assert!(engine.should_log(decision, "openat(AT_FDCWD, \"/etc/hosts\", 0x0, 0o0)"));
        assert!(!engine.should_log(decision, "openat(AT_FDCWD, \"/etc/passwd\", 0x0, 0o0)"));
        assert!(engine.should_log(Decision::Allow, "exit_group(0) /etc/hosts"));
    }

    #[test]
    fn test_verbose_logs_allowed_calls() {
        let config = RuntimeConfig::builder(ExecutionMode::Run)
            .verbose(true)
            .build()
            .unwrap();
        let engine = PolicyEngine::new(&config, Enforcement::new(true));
        assert!(engine.wants_detail());
        assert!(engine.should_log(Decision::Allow, "exit_group(0)"));
    }
}
