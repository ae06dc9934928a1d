// src/host/orchestrator.rs
//! Runtime registry, lifecycle driver and dispatcher
//!
//! The orchestrator never constructs runtimes; adapters are registered by
//! the embedding application and looked up by name on every dispatch.

use crate::host::profiler::Profiler;
use crate::memory::MemoryCoordinator;
use crate::runtime::contract::{RuntimeRef, Value};
use crate::utils::config::HostConfig;
use crate::utils::errors::{HostError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Central coordinator of all language runtimes
pub struct Orchestrator {
    config: HostConfig,
    runtimes: RwLock<HashMap<String, RuntimeRef>>,
    memory: Arc<MemoryCoordinator>,
    profiler: Profiler,
}

impl Orchestrator {
    /// Validate `config` and build the memory coordinator from it
    pub fn new(config: HostConfig) -> Result<Self> {
        config.validate()?;

        info!("Creating orchestrator for {}", config.app.name);

        Ok(Self {
            memory: Arc::new(MemoryCoordinator::new(config.memory.clone())),
            config,
            runtimes: RwLock::new(HashMap::new()),
            profiler: Profiler::new(),
        })
    }

    /// Add a runtime under its own name
    pub fn register_runtime(&self, runtime: RuntimeRef) -> Result<()> {
        let name = runtime.name().to_string();
        let mut runtimes = self.runtimes.write();

        if runtimes.contains_key(&name) {
            return Err(HostError::DuplicateRegistration(name));
        }

        debug!("Registered runtime {} ({})", name, runtime.version());
        runtimes.insert(name, runtime);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<RuntimeRef> {
        self.runtimes.read().get(name).cloned()
    }

    /// Initialize every enabled runtime, in name order, stopping at the first failure
    ///
    /// Runtimes initialized before a failure are left running; callers are
    /// expected to `shutdown` on error.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        for (name, runtime_config) in self.config.enabled_runtimes() {
            let runtime = self
                .lookup(name)
                .ok_or_else(|| HostError::RuntimeNotRegistered(name.clone()))?;

            info!("Initializing runtime {}", name);

            let init = runtime.initialize(cancel, runtime_config);
            let result = match runtime_config.timeout() {
                Some(limit) => tokio::time::timeout(limit, init)
                    .await
                    .unwrap_or(Err(HostError::InitTimeout(limit))),
                None => init.await,
            };

            if let Err(e) = result {
                error!("Failed to initialize {}: {}", name, e);
                return Err(HostError::Initialization {
                    runtime: name.clone(),
                    source: Box::new(e),
                });
            }
        }

        Ok(())
    }

    /// Run code in a registered runtime
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        runtime: &str,
        code: &str,
        args: &[Value],
    ) -> Result<Value> {
        let rt = self
            .lookup(runtime)
            .ok_or_else(|| HostError::RuntimeNotFound(runtime.to_string()))?;

        self.profiler
            .track(runtime, "<execute>", rt.execute(cancel, code, args))
            .await
    }

    /// Invoke a named function in a registered runtime
    pub async fn call(
        &self,
        cancel: &CancellationToken,
        runtime: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value> {
        let rt = self
            .lookup(runtime)
            .ok_or_else(|| HostError::RuntimeNotFound(runtime.to_string()))?;

        self.profiler
            .track(runtime, function, rt.call(cancel, function, args))
            .await
    }

    /// Shut down every registered runtime, collecting failures
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<()> {
        let mut runtimes: Vec<(String, RuntimeRef)> = self
            .runtimes
            .read()
            .iter()
            .map(|(name, rt)| (name.clone(), Arc::clone(rt)))
            .collect();
        runtimes.sort_by(|a, b| a.0.cmp(&b.0));

        info!("Shutting down {} runtimes", runtimes.len());

        let mut failures = Vec::new();
        for (name, runtime) in runtimes {
            if let Err(e) = runtime.shutdown(cancel).await {
                warn!("Failed to shut down {}: {}", name, e);
                failures.push((name, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HostError::Shutdown { failures })
        }
    }

    /// Shared memory coordinator
    pub fn memory(&self) -> &Arc<MemoryCoordinator> {
        &self.memory
    }

    /// Registered runtime names, sorted
    pub fn runtimes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runtimes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn runtime(&self, name: &str) -> Option<RuntimeRef> {
        self.lookup(name)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }
}
