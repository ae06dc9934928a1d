// src/runtime/native_runtime.rs
//! In-process runtime backed by a table of Rust functions
//!
//! Used to host compiled code behind the same contract as the interpreter
//! adapters. `execute` treats its code argument as a symbol name; `call`
//! looks the function up directly. Functions run on the blocking thread
//! pool and receive the operation's cancellation token.

use crate::runtime::contract::{Runtime, Value};
use crate::runtime::lifecycle::Lifecycle;
use crate::runtime::worker_pool::{Worker, WorkerPool, WorkerPoolConfig};
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{HostError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Signature of a hosted native function
pub type NativeFn = Arc<dyn Fn(&[Value], &CancellationToken) -> Result<Value> + Send + Sync>;

type FunctionTable = Arc<HashMap<String, NativeFn>>;

/// Builder for [`NativeRuntime`]
pub struct NativeRuntimeBuilder {
    name: String,
    version: String,
    functions: HashMap<String, NativeFn>,
}

impl NativeRuntimeBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add a function; a later registration under the same name wins
    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &CancellationToken) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn build(self) -> NativeRuntime {
        NativeRuntime {
            lifecycle: Lifecycle::new(self.name.clone()),
            name: self.name,
            version: self.version,
            functions: Arc::new(self.functions),
        }
    }
}

/// Pool slot for native calls
pub struct NativeWorker {
    id: usize,
    runtime: String,
    functions: FunctionTable,
    calls: u64,
}

impl NativeWorker {
    async fn invoke(&mut self, symbol: &str, args: Vec<Value>, token: CancellationToken) -> Result<Value> {
        let f = self.functions.get(symbol).cloned().ok_or_else(|| {
            HostError::execution(&self.runtime, format!("symbol not found: {}", symbol))
        })?;
        self.calls += 1;

        let runtime = self.runtime.clone();
        tokio::task::spawn_blocking(move || f(&args, &token))
            .await
            .map_err(|e| HostError::execution(&runtime, format!("native call failed: {}", e)))?
    }
}

#[async_trait]
impl Worker for NativeWorker {
    fn id(&self) -> usize {
        self.id
    }

    async fn shutdown(&mut self) -> Result<()> {
        debug!("{} worker #{} served {} calls", self.runtime, self.id, self.calls);
        Ok(())
    }
}

/// Runtime adapter for functions compiled into the host
pub struct NativeRuntime {
    name: String,
    version: String,
    functions: FunctionTable,
    lifecycle: Lifecycle<WorkerPool<NativeWorker>>,
}

impl NativeRuntime {
    pub fn builder(name: impl Into<String>) -> NativeRuntimeBuilder {
        NativeRuntimeBuilder {
            name: name.into(),
            version: "unknown".to_string(),
            functions: HashMap::new(),
        }
    }

    /// Names of the hosted functions, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    async fn invoke(&self, cancel: &CancellationToken, symbol: &str, args: &[Value]) -> Result<Value> {
        let pool = self.lifecycle.running()?;
        let symbol = symbol.to_string();
        let args = args.to_vec();

        pool.run(cancel, move |worker: &mut NativeWorker, token| {
            Box::pin(async move { worker.invoke(&symbol, args, token).await })
        })
        .await
    }
}

#[async_trait]
impl Runtime for NativeRuntime {
    async fn initialize(&self, cancel: &CancellationToken, config: &RuntimeConfig) -> Result<()> {
        self.lifecycle.begin()?;
        if cancel.is_cancelled() {
            self.lifecycle.abort();
            return Err(HostError::OperationCancelled);
        }

        let mut pool_config = WorkerPoolConfig::new(self.name.clone(), config.pool_size());
        if let Some(grace) = config.option_u64("cancel_grace_ms") {
            pool_config = pool_config.with_cancel_grace(Duration::from_millis(grace));
        }

        let functions = Arc::clone(&self.functions);
        let runtime = self.name.clone();
        let pool = WorkerPool::initialize(pool_config, move |id| {
            let worker = NativeWorker {
                id,
                runtime: runtime.clone(),
                functions: Arc::clone(&functions),
                calls: 0,
            };
            async move { Ok(worker) }
        })
        .await;

        match pool {
            Ok(pool) => {
                info!("{} runtime ready with {} functions", self.name, self.functions.len());
                self.lifecycle.finish(pool);
                Ok(())
            }
            Err(e) => {
                self.lifecycle.abort();
                Err(e)
            }
        }
    }

    async fn execute(&self, cancel: &CancellationToken, code: &str, args: &[Value]) -> Result<Value> {
        self.invoke(cancel, code.trim(), args).await
    }

    async fn call(&self, cancel: &CancellationToken, function: &str, args: &[Value]) -> Result<Value> {
        self.invoke(cancel, function, args).await
    }

    async fn shutdown(&self, _cancel: &CancellationToken) -> Result<()> {
        if let Some(pool) = self.lifecycle.stop() {
            info!("Shutting down {} runtime", self.name);
            pool.close().await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> NativeRuntime {
        NativeRuntime::builder("rust")
            .version("1.0.0")
            .function("add", |args, _| {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            })
            .function("fail", |_, _| Err(HostError::execution("rust", "always fails")))
            .function("wait", |_, token| {
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(HostError::OperationCancelled)
            })
            .build()
    }

    async fn started() -> NativeRuntime {
        let runtime = calculator();
        runtime
            .initialize(&CancellationToken::new(), &RuntimeConfig::new("rust", "1.0.0").with_max_concurrency(2))
            .await
            .unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_call_and_execute() {
        let runtime = started().await;
        let cancel = CancellationToken::new();

        let sum = runtime.call(&cancel, "add", &[json!(1), json!(2)]).await.unwrap();
        assert_eq!(sum, json!(3));

        let sum = runtime.execute(&cancel, " add\n", &[json!(40), json!(2)]).await.unwrap();
        assert_eq!(sum, json!(42));

        assert_eq!(runtime.name(), "rust");
        assert_eq!(runtime.version(), "1.0.0");
        assert_eq!(runtime.symbols(), vec!["add", "fail", "wait"]);
    }

    #[tokio::test]
    async fn test_unknown_symbol_and_function_errors() {
        let runtime = started().await;
        let cancel = CancellationToken::new();

        let missing = runtime.call(&cancel, "nope", &[]).await;
        assert!(matches!(missing, Err(HostError::Execution { .. })));

        let failed = runtime.call(&cancel, "fail", &[]).await;
        assert!(matches!(failed, Err(HostError::Execution { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_reaches_native_function() {
        let runtime = started().await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), runtime.call(&cancel, "wait", &[]))
            .await
            .unwrap();
        assert!(matches!(result, Err(HostError::OperationCancelled)));

        let again = runtime
            .call(&CancellationToken::new(), "add", &[json!(1)])
            .await
            .unwrap();
        assert_eq!(again, json!(1));
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let runtime = calculator();
        let cancel = CancellationToken::new();

        let early = runtime.call(&cancel, "add", &[]).await;
        assert!(matches!(early, Err(HostError::InvalidState(_))));

        runtime
            .initialize(&cancel, &RuntimeConfig::new("rust", "1.0.0"))
            .await
            .unwrap();
        runtime.shutdown(&cancel).await.unwrap();
        runtime.shutdown(&cancel).await.unwrap();

        let late = runtime.call(&cancel, "add", &[]).await;
        assert!(matches!(late, Err(HostError::InvalidState(_))));
    }
}
