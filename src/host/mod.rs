// src/host/mod.rs
//! Host kernel
//!
//! - **Orchestrator**: runtime registry, lifecycle and dispatch
//! - **Bridge**: named async functions callable from a frontend
//! - **Profiler**: per-function call timings

pub mod bridge;
pub mod orchestrator;
pub mod profiler;

pub use bridge::{bridge_fn, Bridge, BridgeFunc};
pub use orchestrator::Orchestrator;
pub use profiler::{CallMetrics, Profiler};
