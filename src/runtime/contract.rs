// src/runtime/contract.rs
//! The capability set every language adapter implements
//!
//! The orchestrator only ever sees `Arc<dyn Runtime>`. Adapters own their
//! worker pool and native resources and are responsible for their own
//! internal concurrency safety; every method takes `&self`.

use crate::utils::config::RuntimeConfig;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Dynamic value crossing the runtime boundary
pub type Value = serde_json::Value;

/// Shared handle to a registered runtime
pub type RuntimeRef = Arc<dyn Runtime>;

/// An embedded language execution engine
///
/// Lifecycle: `initialize` at most once, `shutdown` at most once (repeat
/// calls to `shutdown` are no-ops). `execute`/`call` after shutdown fail
/// with `InvalidState`.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Prepare the runtime (build the worker pool, load libraries, ...)
    async fn initialize(&self, cancel: &CancellationToken, config: &RuntimeConfig) -> Result<()>;

    /// Run a snippet of code
    async fn execute(&self, cancel: &CancellationToken, code: &str, args: &[Value]) -> Result<Value>;

    /// Invoke a named function
    async fn call(&self, cancel: &CancellationToken, function: &str, args: &[Value]) -> Result<Value>;

    /// Release workers and native resources
    async fn shutdown(&self, cancel: &CancellationToken) -> Result<()>;

    /// Unique registry key
    fn name(&self) -> &str;

    /// Engine version string
    fn version(&self) -> String;
}
