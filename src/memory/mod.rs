// src/memory/mod.rs
//! Shared memory for cross-runtime data exchange
//!
//! - **Region**: fixed-size anonymous memory map with a declared element type
//! - **Coordinator**: id → region table, global byte budget, reader/writer protocol

pub mod coordinator;
pub mod region;

pub use coordinator::{MemoryCoordinator, MemoryStats, ReadGuard, WriteGuard};
pub use region::{MemoryRegion, MemoryType};
