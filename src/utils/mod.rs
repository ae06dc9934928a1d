// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{AccessPolicy, AppConfig, HostConfig, MemoryConfig, RuntimeConfig};
pub use errors::{HostError, Result};
