// src/security/mod.rs
//! Security policies and enforcement
//!
//! - **Policy**: prioritized rules plus per-runtime capabilities
//! - **Enforcer**: pluggable decision point; `PolicyEnforcer` evaluates a `Policy`
//! - **GuardedRuntime**: wraps an adapter and checks each dispatch

pub mod enforcer;
pub mod policy;

pub use enforcer::{Enforcer, GuardedRuntime, PolicyEnforcer};
pub use policy::{Action, Operation, OperationKind, Policy, Rule, RuntimePolicy};
