// src/lib.rs
//! Polyglot Host Library
//!
//! Embeds multiple language runtimes behind one contract, dispatches calls
//! into them, and arbitrates shared memory regions for zero-copy exchange
//! between them.
//!
//! # Architecture
//!
//! The host is structured into several key modules:
//!
//! - **host**: Orchestrator (registry, lifecycle, dispatch), bridge, profiler
//! - **runtime**: Runtime contract, generic worker pool, reference adapters
//! - **memory**: Shared memory coordinator and regions
//! - **security**: Policies, enforcers and the guarded runtime decorator
//! - **observability**: Tracing and metrics setup
//! - **utils**: Configuration and errors

// Public module exports
pub mod host;
pub mod memory;
pub mod observability;
pub mod runtime;
pub mod security;
pub mod utils;

// Re-export commonly used types
pub use host::{Bridge, Orchestrator, Profiler};
pub use memory::{MemoryCoordinator, MemoryRegion, MemoryType};
pub use runtime::{Runtime, RuntimeRef, Value, WorkerPool};
pub use utils::config::{HostConfig, RuntimeConfig};
pub use utils::errors::{HostError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Host build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
