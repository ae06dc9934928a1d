// src/utils/errors.rs
//! Error types for the host kernel
//!
//! Every kernel operation returns [`Result`]; nothing in the orchestration
//! path panics on caller input. Variants carry enough context to log, and
//! [`HostError::as_label`] yields a stable snake_case label for metrics.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors produced by the host kernel and its adapters
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HostError {
    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An enabled language has no runtime registered under its name
    #[error("runtime {0} not registered")]
    RuntimeNotRegistered(String),

    /// Dispatch targeted a runtime name that is not in the registry
    #[error("runtime {0} not found")]
    RuntimeNotFound(String),

    /// A runtime with the same name is already registered
    #[error("runtime {0} already registered")]
    DuplicateRegistration(String),

    /// The worker pool has been closed
    #[error("worker pool is closed")]
    PoolClosed,

    /// Allocation would push shared memory usage past the configured limit
    #[error("memory limit exceeded: requested {requested} bytes, usage {usage}/{limit}")]
    MemoryLimitExceeded {
        requested: u64,
        usage: u64,
        limit: u64,
    },

    /// A region with this id already exists
    #[error("region {0} already exists")]
    RegionExists(String),

    /// No region with this id
    #[error("region {0} not found")]
    RegionNotFound(String),

    /// The region still has declared readers or writers
    #[error("region {id} still has active users (readers={readers}, writers={writers})")]
    RegionBusy {
        id: String,
        readers: usize,
        writers: usize,
    },

    /// The region already has a declared writer
    #[error("region {0} already has a writer")]
    WriterConflict(String),

    /// No bridge function under this name
    #[error("function {0} not found")]
    FunctionNotFound(String),

    /// A bridge function with this name is already registered
    #[error("function {0} already registered")]
    FunctionAlreadyRegistered(String),

    /// The caller's cancellation token fired before the operation completed
    #[error("operation cancelled")]
    OperationCancelled,

    /// A runtime failed during `Orchestrator::initialize`
    #[error("failed to initialize {runtime}: {source}")]
    Initialization {
        runtime: String,
        #[source]
        source: Box<HostError>,
    },

    /// One or more runtimes failed during `Orchestrator::shutdown`
    #[error("shutdown errors: {}", format_failures(.failures))]
    Shutdown { failures: Vec<(String, HostError)> },

    /// Runtime initialization exceeded its configured timeout
    #[error("initialization timed out after {0:?}")]
    InitTimeout(Duration),

    /// A single execution exceeded its timeout
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// The adapter ran the code and it failed
    #[error("execution failed in {runtime}: {message}")]
    Execution { runtime: String, message: String },

    /// The operation is not valid in the component's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A security policy rejected the operation
    #[error("operation {operation} denied by policy {policy}")]
    PolicyDenied { operation: String, policy: String },

    /// An adapter could not start its backing process
    #[error("failed to spawn process: {0}")]
    ProcessSpawnFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_failures(failures: &[(String, HostError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{}: {}", name, err))
        .collect::<Vec<_>>()
        .join("; ")
}

impl HostError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::ConfigInvalid(_) => "config_invalid",
            HostError::RuntimeNotRegistered(_) => "runtime_not_registered",
            HostError::RuntimeNotFound(_) => "runtime_not_found",
            HostError::DuplicateRegistration(_) => "duplicate_registration",
            HostError::PoolClosed => "pool_closed",
            HostError::MemoryLimitExceeded { .. } => "memory_limit_exceeded",
            HostError::RegionExists(_) => "region_exists",
            HostError::RegionNotFound(_) => "region_not_found",
            HostError::RegionBusy { .. } => "region_busy",
            HostError::WriterConflict(_) => "writer_conflict",
            HostError::FunctionNotFound(_) => "function_not_found",
            HostError::FunctionAlreadyRegistered(_) => "function_already_registered",
            HostError::OperationCancelled => "operation_cancelled",
            HostError::Initialization { .. } => "initialization_failed",
            HostError::Shutdown { .. } => "shutdown_failed",
            HostError::InitTimeout(_) => "init_timeout",
            HostError::ExecutionTimeout(_) => "execution_timeout",
            HostError::Execution { .. } => "execution_failed",
            HostError::InvalidState(_) => "invalid_state",
            HostError::PolicyDenied { .. } => "policy_denied",
            HostError::ProcessSpawnFailed(_) => "process_spawn_failed",
            HostError::Io(_) => "io",
        }
    }

    /// True when the error came from the caller's cancellation token rather
    /// than from the code that ran.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HostError::OperationCancelled)
    }

    pub(crate) fn execution(runtime: &str, message: impl Into<String>) -> Self {
        HostError::Execution {
            runtime: runtime.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(HostError::PoolClosed.as_label(), "pool_closed");
        assert_eq!(
            HostError::RegionNotFound("a".into()).as_label(),
            "region_not_found"
        );
        assert_eq!(HostError::OperationCancelled.as_label(), "operation_cancelled");
    }

    #[test]
    fn test_shutdown_message_lists_every_failure() {
        let err = HostError::Shutdown {
            failures: vec![
                ("lua".to_string(), HostError::PoolClosed),
                ("python".to_string(), HostError::InvalidState("stuck".into())),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("lua: worker pool is closed"));
        assert!(message.contains("python: invalid state: stuck"));
    }

    #[test]
    fn test_initialization_keeps_source() {
        let err = HostError::Initialization {
            runtime: "ruby".to_string(),
            source: Box::new(HostError::ProcessSpawnFailed("no ruby".into())),
        };
        assert!(err.to_string().starts_with("failed to initialize ruby"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_cancelled());
        assert!(HostError::OperationCancelled.is_cancelled());
    }
}
