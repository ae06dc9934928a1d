// src/host/bridge.rs
//! Name → async function registry for a frontend layer
//!
//! The map lock is only held for lookups and mutations. Calls run on a
//! cloned handle, so long-running functions never block registration.

use crate::host::orchestrator::Orchestrator;
use crate::runtime::contract::Value;
use crate::utils::errors::{HostError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A callable exposed over the bridge
pub type BridgeFunc =
    Arc<dyn Fn(CancellationToken, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`BridgeFunc`]
pub fn bridge_fn<F, Fut>(f: F) -> BridgeFunc
where
    F: Fn(CancellationToken, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(
        move |cancel: CancellationToken, args: Vec<Value>| -> BoxFuture<'static, Result<Value>> {
            Box::pin(f(cancel, args))
        },
    )
}

/// Function registry
#[derive(Default)]
pub struct Bridge {
    functions: DashMap<String, BridgeFunc>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function; fails if the name is taken
    pub fn register(&self, name: impl Into<String>, func: BridgeFunc) -> Result<()> {
        match self.functions.entry(name.into()) {
            Entry::Occupied(entry) => Err(HostError::FunctionAlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!("Registered bridge function {}", entry.key());
                entry.insert(func);
                Ok(())
            }
        }
    }

    /// Remove a function
    pub fn unregister(&self, name: &str) -> Result<()> {
        if self.functions.remove(name).is_none() {
            return Err(HostError::FunctionNotFound(name.to_string()));
        }
        debug!("Unregistered bridge function {}", name);
        Ok(())
    }

    /// Invoke a function outside of the registry lock, racing `cancel`
    pub async fn call(&self, cancel: &CancellationToken, name: &str, args: Vec<Value>) -> Result<Value> {
        let func = self
            .functions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HostError::FunctionNotFound(name.to_string()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HostError::OperationCancelled),
            result = func(cancel.child_token(), args) => result,
        }
    }

    /// Registered names, sorted
    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Register `name` as a forwarder to `runtime.function` on `orchestrator`
    pub fn expose(
        &self,
        name: impl Into<String>,
        orchestrator: Arc<Orchestrator>,
        runtime: impl Into<String>,
        function: impl Into<String>,
    ) -> Result<()> {
        let runtime: Arc<str> = runtime.into().into();
        let function: Arc<str> = function.into().into();
        let name = name.into();

        info!("Exposing {}.{} as {}", runtime, function, name);

        self.register(
            name,
            bridge_fn(move |cancel, args| {
                let orchestrator = Arc::clone(&orchestrator);
                let runtime = Arc::clone(&runtime);
                let function = Arc::clone(&function);
                async move { orchestrator.call(&cancel, &runtime, &function, &args).await }
            }),
        )
    }
}
