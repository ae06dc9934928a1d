// src/runtime/mod.rs
//! Language runtime contract and adapters
//!
//! This module provides everything an embedded language engine needs to
//! plug into the host:
//!
//! - **Contract**: the `Runtime` trait the orchestrator dispatches through
//! - **Worker Pool**: bounded pool of pre-initialized execution contexts
//! - **Process Manager**: interpreter discovery, spawning and termination
//! - **Process Runtime**: adapter running Python, Node.js, Ruby or PHP programs
//! - **Native Runtime**: adapter hosting Rust functions in-process
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Orchestrator                    │
//! │        name → Arc<dyn Runtime>               │
//! └──────────────┬───────────────────────────────┘
//!                │ execute / call (+ CancellationToken)
//!     ┌──────────┴──────────┐
//!     ▼                     ▼
//! ProcessRuntime       NativeRuntime
//!     │                     │
//! WorkerPool<ProcessWorker> WorkerPool<NativeWorker>
//!     │                     │
//! interpreter per call  spawn_blocking
//! ```

pub mod contract;
pub mod lifecycle;
pub mod native_runtime;
pub mod process_manager;
pub mod process_runtime;
pub mod worker_pool;

// Re-export commonly used types
pub use contract::{Runtime, RuntimeRef, Value};
pub use native_runtime::{NativeFn, NativeRuntime, NativeRuntimeBuilder};
pub use process_manager::{Language, ProcessManager, SpawnConfig};
pub use process_runtime::ProcessRuntime;
pub use worker_pool::{PoolStats, Worker, WorkerPool, WorkerPoolConfig};
