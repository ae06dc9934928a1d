// src/security/policy.rs
//! Security policy rules
//!
//! A policy is evaluated in two steps:
//! 1. The per-runtime policy, if the operation's runtime has one
//! 2. The highest-priority rule matching the operation kind and target
//!
//! No matching rule allows the operation. `Audit` allows it and logs.

use crate::utils::errors::{HostError, Result};
use regex::Regex;
use std::collections::HashMap;
use tracing::info;

/// Category of a checked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    FileRead,
    FileWrite,
    NetConnect,
    NetListen,
    Exec,
    MemAlloc,
    Syscall,
    RuntimeCall,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::FileRead => "file_read",
            OperationKind::FileWrite => "file_write",
            OperationKind::NetConnect => "net_connect",
            OperationKind::NetListen => "net_listen",
            OperationKind::Exec => "exec",
            OperationKind::MemAlloc => "mem_alloc",
            OperationKind::Syscall => "syscall",
            OperationKind::RuntimeCall => "runtime_call",
        }
    }
}

/// An operation submitted for a policy decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    /// Path, host, function name, ...
    pub target: String,
    /// Runtime performing the operation
    pub runtime: String,
}

impl Operation {
    pub fn new(kind: OperationKind, target: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            runtime: runtime.into(),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.kind.as_str(), self.target, self.runtime)
    }
}

/// What to do with a matching operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
    Audit,
}

/// A single policy rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub operation: OperationKind,
    /// Matches every target when `None`
    pub target: Option<Regex>,
    pub action: Action,
    /// Higher wins
    pub priority: i32,
}

impl Rule {
    pub fn new(operation: OperationKind, action: Action, priority: i32) -> Self {
        Self {
            operation,
            target: None,
            action,
            priority,
        }
    }

    /// Restrict the rule to targets matching `pattern`
    pub fn with_target(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| HostError::ConfigInvalid(format!("invalid rule pattern {:?}: {}", pattern, e)))?;
        self.target = Some(regex);
        Ok(self)
    }

    fn matches(&self, op: &Operation) -> bool {
        if self.operation != op.kind {
            return false;
        }
        match &self.target {
            Some(regex) if !op.target.is_empty() => regex.is_match(&op.target),
            _ => true,
        }
    }
}

/// Capabilities granted to one runtime
#[derive(Debug, Clone, Default)]
pub struct RuntimePolicy {
    pub allow_network: bool,
    pub allow_file_read: bool,
    pub allow_file_write: bool,
    pub allow_exec: bool,
    /// When non-empty, file targets must match one of these
    pub allowed_paths: Vec<Regex>,
    /// File targets matching any of these are rejected
    pub denied_paths: Vec<Regex>,
}

impl RuntimePolicy {
    fn permits(&self, op: &Operation) -> bool {
        match op.kind {
            OperationKind::NetConnect | OperationKind::NetListen => self.allow_network,
            OperationKind::FileRead => self.allow_file_read && self.path_allowed(&op.target),
            OperationKind::FileWrite => self.allow_file_write && self.path_allowed(&op.target),
            OperationKind::Exec => self.allow_exec,
            _ => true,
        }
    }

    fn path_allowed(&self, target: &str) -> bool {
        if self.denied_paths.iter().any(|p| p.is_match(target)) {
            return false;
        }
        self.allowed_paths.is_empty() || self.allowed_paths.iter().any(|p| p.is_match(target))
    }
}

/// Named rule set
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    rules: Vec<Rule>,
    runtime_policies: HashMap<String, RuntimePolicy>,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            runtime_policies: HashMap::new(),
        }
    }

    /// Restrictive default: deny exec, audit outbound connections
    pub fn default_policy() -> Self {
        let mut policy = Self::new("default");
        policy.add_rule(Rule::new(OperationKind::Exec, Action::Deny, 100));
        policy.add_rule(Rule::new(OperationKind::NetConnect, Action::Audit, 50));
        policy
    }

    /// Development policy: allow everything, audit writes and connections
    pub fn permissive() -> Self {
        let mut policy = Self::new("permissive");
        policy.add_rule(Rule::new(OperationKind::FileWrite, Action::Audit, 10));
        policy.add_rule(Rule::new(OperationKind::NetConnect, Action::Audit, 10));
        policy
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn set_runtime_policy(&mut self, runtime: impl Into<String>, policy: RuntimePolicy) {
        self.runtime_policies.insert(runtime.into(), policy);
    }

    /// Decide whether `op` may proceed
    pub fn allow(&self, op: &Operation) -> bool {
        if let Some(runtime_policy) = self.runtime_policies.get(&op.runtime) {
            if !runtime_policy.permits(op) {
                return false;
            }
        }

        // First rule wins among equal priorities
        let best = self
            .rules
            .iter()
            .filter(|rule| rule.matches(op))
            .fold(None::<&Rule>, |best, rule| match best {
                Some(b) if b.priority >= rule.priority => Some(b),
                _ => Some(rule),
            });

        match best.map(|rule| rule.action) {
            None | Some(Action::Allow) => true,
            Some(Action::Audit) => {
                info!(policy = %self.name, "audit: {}", op);
                true
            }
            Some(Action::Deny) => false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn runtime_policy(&self, runtime: &str) -> Option<&RuntimePolicy> {
        self.runtime_policies.get(runtime)
    }
}
