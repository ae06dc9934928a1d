// src/security/enforcer.rs
//! Policy enforcement around the runtime contract
//!
//! Platform sandboxes (seccomp, sandbox-exec, job objects) plug in behind the
//! [`Enforcer`] trait. [`GuardedRuntime`] wraps any adapter and checks every
//! `execute`/`call` before delegating; the orchestrator itself stays policy-free.

use crate::runtime::contract::{Runtime, Value};
use crate::security::policy::{Operation, OperationKind, Policy};
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{HostError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Target recorded for `Runtime::execute` checks
pub const EXECUTE_TARGET: &str = "<execute>";

/// Decides whether an operation may proceed
pub trait Enforcer: Send + Sync {
    /// `Ok(())` to allow, `PolicyDenied` to reject
    fn check(&self, op: &Operation) -> Result<()>;

    fn name(&self) -> &str;
}

/// In-process enforcer evaluating a [`Policy`]
pub struct PolicyEnforcer {
    policy: RwLock<Policy>,
    active: AtomicBool,
}

impl PolicyEnforcer {
    /// Create an active enforcer
    pub fn new(policy: Policy) -> Self {
        info!("Enforcing policy {}", policy.name());
        Self {
            policy: RwLock::new(policy),
            active: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stop enforcing; every operation is allowed until `enable`
    pub fn disable(&self) {
        warn!("Policy enforcement disabled");
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Swap the policy in place
    pub fn update_policy(&self, policy: Policy) {
        info!("Switching policy to {}", policy.name());
        *self.policy.write() = policy;
    }

    pub fn policy_name(&self) -> String {
        self.policy.read().name().to_string()
    }
}

impl Enforcer for PolicyEnforcer {
    fn check(&self, op: &Operation) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let policy = self.policy.read();
        if policy.allow(op) {
            Ok(())
        } else {
            warn!(policy = policy.name(), "denied: {}", op);
            metrics::counter!("polyhost_policy_denials_total", "runtime" => op.runtime.clone()).increment(1);
            Err(HostError::PolicyDenied {
                operation: op.to_string(),
                policy: policy.name().to_string(),
            })
        }
    }

    fn name(&self) -> &str {
        "policy"
    }
}

/// Runtime decorator checking each dispatch against an enforcer
pub struct GuardedRuntime<R> {
    inner: R,
    enforcer: Arc<dyn Enforcer>,
}

impl<R: Runtime> GuardedRuntime<R> {
    pub fn new(inner: R, enforcer: Arc<dyn Enforcer>) -> Self {
        Self { inner, enforcer }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn check(&self, target: &str) -> Result<()> {
        self.enforcer
            .check(&Operation::new(OperationKind::RuntimeCall, target, self.inner.name()))
    }
}

#[async_trait]
impl<R: Runtime> Runtime for GuardedRuntime<R> {
    async fn initialize(&self, cancel: &CancellationToken, config: &RuntimeConfig) -> Result<()> {
        self.inner.initialize(cancel, config).await
    }

    async fn execute(&self, cancel: &CancellationToken, code: &str, args: &[Value]) -> Result<Value> {
        self.check(EXECUTE_TARGET)?;
        self.inner.execute(cancel, code, args).await
    }

    async fn call(&self, cancel: &CancellationToken, function: &str, args: &[Value]) -> Result<Value> {
        self.check(function)?;
        self.inner.call(cancel, function, args).await
    }

    async fn shutdown(&self, cancel: &CancellationToken) -> Result<()> {
        self.inner.shutdown(cancel).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> String {
        self.inner.version()
    }
}
