// src/runtime/lifecycle.rs
//! Initialize-once / shutdown-once state shared by the adapters

use crate::utils::errors::{HostError, Result};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of an adapter holding started state `S`
///
/// `begin` claims the single initialization; a failed start can be retried
/// via `abort`. Once `stop` has been called the adapter is permanently shut.
pub struct Lifecycle<S> {
    name: String,
    claimed: AtomicBool,
    stopped: AtomicBool,
    started: OnceCell<S>,
}

impl<S> Lifecycle<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            claimed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            started: OnceCell::new(),
        }
    }

    /// Claim the right to initialize
    pub fn begin(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(HostError::InvalidState(format!("{} runtime is shut down", self.name)));
        }
        if self.claimed.swap(true, Ordering::SeqCst) {
            return Err(HostError::InvalidState(format!(
                "{} runtime already initialized",
                self.name
            )));
        }
        Ok(())
    }

    /// Release a claim after a failed start
    pub fn abort(&self) {
        self.claimed.store(false, Ordering::SeqCst);
    }

    /// Publish the started state; the claim must be held
    pub fn finish(&self, state: S) {
        if self.started.set(state).is_err() {
            tracing::warn!("{} runtime started twice", self.name);
        }
    }

    /// Started state, or `InvalidState` when not running
    pub fn running(&self) -> Result<&S> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(HostError::InvalidState(format!("{} runtime is shut down", self.name)));
        }
        self.started
            .get()
            .ok_or_else(|| HostError::InvalidState(format!("{} runtime not initialized", self.name)))
    }

    /// Started state if any, without checking for shutdown
    pub fn started(&self) -> Option<&S> {
        self.started.get()
    }

    /// Mark stopped; returns the started state only on the first call
    pub fn stop(&self) -> Option<&S> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.started.get()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_once() {
        let lifecycle: Lifecycle<u32> = Lifecycle::new("lua");
        assert!(matches!(lifecycle.running(), Err(HostError::InvalidState(_))));

        lifecycle.begin().unwrap();
        assert!(lifecycle.begin().is_err());
        lifecycle.finish(7);
        assert_eq!(*lifecycle.running().unwrap(), 7);
    }

    #[test]
    fn test_abort_allows_retry() {
        let lifecycle: Lifecycle<u32> = Lifecycle::new("lua");
        lifecycle.begin().unwrap();
        lifecycle.abort();
        assert!(lifecycle.begin().is_ok());
    }

    #[test]
    fn test_stop_once() {
        let lifecycle: Lifecycle<u32> = Lifecycle::new("lua");
        lifecycle.begin().unwrap();
        lifecycle.finish(1);

        assert_eq!(lifecycle.stop(), Some(&1));
        assert_eq!(lifecycle.stop(), None);
        assert!(lifecycle.is_stopped());
        assert!(lifecycle.running().is_err());
        assert!(lifecycle.begin().is_err());
    }
}
