// src/memory/coordinator.rs
//! Named-region allocator with a global byte budget
//!
//! Regions cross runtime boundaries by id. Users declare their access with
//! the reader/writer counter protocol (`acquire_read`/`release_read`,
//! `acquire_write`/`release_write`) or, preferably, through the scoped
//! [`ReadGuard`]/[`WriteGuard`] which release on drop.
//!
//! A single table lock guards the region map and every counter mutation.
//! The byte buffers themselves sit behind a per-region lock, so the
//! counter protocol decides *who may* touch a region while the buffer lock
//! keeps concurrent access memory-safe under either [`AccessPolicy`].

use crate::memory::region::{MemoryRegion, MemoryType};
use crate::utils::config::{AccessPolicy, MemoryConfig};
use crate::utils::errors::{HostError, Result};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Point-in-time coordinator statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub regions: usize,
    pub usage: u64,
    pub limit: u64,
    /// usage / limit
    pub utilization: f64,
}

/// Shared memory coordinator
pub struct MemoryCoordinator {
    config: MemoryConfig,
    regions: RwLock<HashMap<String, Arc<MemoryRegion>>>,
    usage: AtomicU64,
}

impl MemoryCoordinator {
    pub fn new(config: MemoryConfig) -> Self {
        info!(
            "Memory coordinator: limit {} bytes, {:?} access",
            config.max_shared_memory, config.access_policy
        );
        Self {
            config,
            regions: RwLock::new(HashMap::new()),
            usage: AtomicU64::new(0),
        }
    }

    /// Create a zero-filled region
    ///
    /// Either the region is created and its size counted, or nothing changes.
    pub fn allocate(&self, id: &str, size: usize, memory_type: MemoryType) -> Result<Arc<MemoryRegion>> {
        let mut regions = self.regions.write();

        if regions.contains_key(id) {
            return Err(HostError::RegionExists(id.to_string()));
        }

        let requested = size as u64;
        let limit = self.config.max_shared_memory;
        // Writers of the counter all hold the table lock, so check before storing
        let previous = self.usage.load(Ordering::SeqCst);
        if previous.saturating_add(requested) > limit {
            warn!(
                "Refusing region {}: {} bytes requested with {}/{} in use",
                id, requested, previous, limit
            );
            return Err(HostError::MemoryLimitExceeded {
                requested,
                usage: previous,
                limit,
            });
        }

        let region = Arc::new(MemoryRegion::new(id, size, memory_type)?);

        regions.insert(id.to_string(), Arc::clone(&region));
        self.usage.fetch_add(requested, Ordering::SeqCst);
        drop(regions);

        self.record_usage();
        debug!("Allocated region {} ({} bytes)", id, size);
        Ok(region)
    }

    /// Look a region up
    pub fn get(&self, id: &str) -> Result<Arc<MemoryRegion>> {
        self.regions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| HostError::RegionNotFound(id.to_string()))
    }

    /// Remove a region that nobody has declared access to
    pub fn free(&self, id: &str) -> Result<()> {
        let mut regions = self.regions.write();

        let region = regions
            .get(id)
            .ok_or_else(|| HostError::RegionNotFound(id.to_string()))?;

        let (readers, writers) = (region.readers(), region.writers());
        if readers > 0 || writers > 0 {
            return Err(HostError::RegionBusy {
                id: id.to_string(),
                readers,
                writers,
            });
        }

        if let Some(region) = regions.remove(id) {
            self.usage.fetch_sub(region.size() as u64, Ordering::SeqCst);
        }
        drop(regions);

        self.record_usage();
        debug!("Freed region {}", id);
        Ok(())
    }

    /// Declare a reader
    pub fn acquire_read(&self, id: &str) -> Result<()> {
        self.acquire(id, Access::Read).map(|_| ())
    }

    /// Withdraw a reader declaration
    pub fn release_read(&self, id: &str) -> Result<()> {
        let region = self.get(id)?;
        self.release(&region, Access::Read);
        Ok(())
    }

    /// Declare the single writer
    pub fn acquire_write(&self, id: &str) -> Result<()> {
        self.acquire(id, Access::Write).map(|_| ())
    }

    /// Withdraw the writer declaration
    pub fn release_write(&self, id: &str) -> Result<()> {
        let region = self.get(id)?;
        self.release(&region, Access::Write);
        Ok(())
    }

    /// Scoped read access; the reader declaration ends when the guard drops
    pub fn read(&self, id: &str) -> Result<ReadGuard<'_>> {
        let region = self.acquire(id, Access::Read)?;
        Ok(ReadGuard {
            coordinator: self,
            region,
        })
    }

    /// Scoped write access; the writer declaration ends when the guard drops
    pub fn write(&self, id: &str) -> Result<WriteGuard<'_>> {
        let region = self.acquire(id, Access::Write)?;
        Ok(WriteGuard {
            coordinator: self,
            region,
        })
    }

    fn acquire(&self, id: &str, access: Access) -> Result<Arc<MemoryRegion>> {
        let regions = self.regions.write();

        let region = regions
            .get(id)
            .ok_or_else(|| HostError::RegionNotFound(id.to_string()))?;

        let exclusive = self.config.access_policy == AccessPolicy::Exclusive;
        match access {
            Access::Read => {
                if exclusive && region.writers() > 0 {
                    return Err(HostError::WriterConflict(id.to_string()));
                }
                region.readers.fetch_add(1, Ordering::SeqCst);
            }
            Access::Write => {
                if region.writers() > 0 {
                    return Err(HostError::WriterConflict(id.to_string()));
                }
                if exclusive && region.readers() > 0 {
                    return Err(HostError::RegionBusy {
                        id: id.to_string(),
                        readers: region.readers(),
                        writers: 0,
                    });
                }
                region.writers.fetch_add(1, Ordering::SeqCst);
            }
        }

        Ok(Arc::clone(region))
    }

    fn release(&self, region: &MemoryRegion, access: Access) {
        let _table = self.regions.write();

        let counter: &AtomicUsize = match access {
            Access::Read => &region.readers,
            Access::Write => &region.writers,
        };

        if counter.load(Ordering::SeqCst) == 0 {
            warn!("Release of {:?} on region {} with no holder", access, region.id());
            return;
        }
        counter.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_usage(&self) {
        metrics::gauge!("polyhost_shared_memory_bytes").set(self.usage() as f64);
    }

    /// Bytes currently allocated
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u64 {
        self.config.max_shared_memory
    }

    pub fn access_policy(&self) -> AccessPolicy {
        self.config.access_policy
    }

    /// Ids of all live regions, sorted
    pub fn region_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.regions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> MemoryStats {
        let regions = self.regions.read();
        let usage = self.usage();
        let limit = self.config.max_shared_memory;
        MemoryStats {
            regions: regions.len(),
            usage,
            limit,
            utilization: if limit == 0 { 0.0 } else { usage as f64 / limit as f64 },
        }
    }
}

/// Scoped reader declaration on a region
pub struct ReadGuard<'a> {
    coordinator: &'a MemoryCoordinator,
    region: Arc<MemoryRegion>,
}

impl ReadGuard<'_> {
    pub fn region(&self) -> &Arc<MemoryRegion> {
        &self.region
    }

    pub fn bytes(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        self.region.bytes()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(&self.region, Access::Read);
    }
}

/// Scoped writer declaration on a region
pub struct WriteGuard<'a> {
    coordinator: &'a MemoryCoordinator,
    region: Arc<MemoryRegion>,
}

impl WriteGuard<'_> {
    pub fn region(&self) -> &Arc<MemoryRegion> {
        &self.region
    }

    pub fn bytes(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        self.region.bytes()
    }

    pub fn bytes_mut(&mut self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.region.bytes_mut()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(&self.region, Access::Write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coordinator(limit: u64, access_policy: AccessPolicy) -> MemoryCoordinator {
        MemoryCoordinator::new(MemoryConfig {
            max_shared_memory: limit,
            access_policy,
        })
    }

    #[test]
    fn test_allocate_and_get() {
        let memory = coordinator(1024, AccessPolicy::Exclusive);
        let region = memory.allocate("a", 100, MemoryType::Bytes).unwrap();
        assert_eq!(region.size(), 100);
        assert_eq!(memory.usage(), 100);

        let fetched = memory.get("a").unwrap();
        assert!(Arc::ptr_eq(&region, &fetched));
        assert!(matches!(memory.get("b"), Err(HostError::RegionNotFound(_))));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let memory = coordinator(1024, AccessPolicy::Exclusive);
        memory.allocate("a", 10, MemoryType::Bytes).unwrap();
        let result = memory.allocate("a", 10, MemoryType::Int32);
        assert!(matches!(result, Err(HostError::RegionExists(_))));
        assert_eq!(memory.usage(), 10);
    }

    #[test]
    fn test_limit_enforced_without_side_effects() {
        // Exactly the limit is allowed, one more byte is not
        let memory = coordinator(100, AccessPolicy::Exclusive);
        memory.allocate("a", 60, MemoryType::Bytes).unwrap();
        memory.allocate("b", 40, MemoryType::Bytes).unwrap();

        let result = memory.allocate("c", 1, MemoryType::Bytes);
        match result {
            Err(HostError::MemoryLimitExceeded { requested, usage, limit }) => {
                assert_eq!((requested, usage, limit), (1, 100, 100));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(memory.usage(), 100);
        assert!(matches!(memory.get("c"), Err(HostError::RegionNotFound(_))));
    }

    #[test]
    fn test_free_returns_budget() {
        let memory = coordinator(100, AccessPolicy::Exclusive);
        memory.allocate("a", 100, MemoryType::Bytes).unwrap();
        memory.free("a").unwrap();
        assert_eq!(memory.usage(), 0);
        assert!(matches!(memory.free("a"), Err(HostError::RegionNotFound(_))));

        // The id is reusable once freed
        memory.allocate("a", 50, MemoryType::Bytes).unwrap();
    }

    #[test]
    fn test_free_busy_region_fails() {
        let memory = coordinator(1024, AccessPolicy::Exclusive);
        memory.allocate("a", 8, MemoryType::Int64).unwrap();

        memory.acquire_read("a").unwrap();
        assert!(matches!(
            memory.free("a"),
            Err(HostError::RegionBusy { readers: 1, writers: 0, .. })
        ));

        memory.release_read("a").unwrap();
        memory.free("a").unwrap();
    }

    #[test]
    fn test_double_write_conflicts() {
        for policy in [AccessPolicy::Cooperative, AccessPolicy::Exclusive] {
            let memory = coordinator(1024, policy);
            memory.allocate("a", 8, MemoryType::Bytes).unwrap();

            memory.acquire_write("a").unwrap();
            assert!(matches!(memory.acquire_write("a"), Err(HostError::WriterConflict(_))));
            memory.release_write("a").unwrap();
            memory.acquire_write("a").unwrap();
        }
    }

    #[test]
    fn test_exclusive_policy_separates_readers_and_writers() {
        let memory = coordinator(1024, AccessPolicy::Exclusive);
        memory.allocate("a", 8, MemoryType::Bytes).unwrap();

        memory.acquire_read("a").unwrap();
        assert!(matches!(memory.acquire_write("a"), Err(HostError::RegionBusy { .. })));
        memory.release_read("a").unwrap();

        memory.acquire_write("a").unwrap();
        assert!(matches!(memory.acquire_read("a"), Err(HostError::WriterConflict(_))));
    }

    #[test]
    fn test_cooperative_policy_allows_mixed_declarations() {
        let memory = coordinator(1024, AccessPolicy::Cooperative);
        memory.allocate("a", 8, MemoryType::Bytes).unwrap();

        memory.acquire_read("a").unwrap();
        memory.acquire_read("a").unwrap();
        memory.acquire_write("a").unwrap();
        memory.acquire_read("a").unwrap();

        let region = memory.get("a").unwrap();
        assert_eq!(region.readers(), 3);
        assert_eq!(region.writers(), 1);
    }

    #[test]
    fn test_release_on_zero_is_noop() {
        let memory = coordinator(1024, AccessPolicy::Exclusive);
        memory.allocate("a", 8, MemoryType::Bytes).unwrap();

        memory.release_read("a").unwrap();
        memory.release_write("a").unwrap();

        let region = memory.get("a").unwrap();
        assert_eq!((region.readers(), region.writers()), (0, 0));
        assert!(matches!(memory.release_read("zz"), Err(HostError::RegionNotFound(_))));
    }

    #[test]
    fn test_guards_release_on_drop() {
        let memory = coordinator(1024, AccessPolicy::Exclusive);
        memory.allocate("a", 4, MemoryType::Int32).unwrap();

        {
            let mut writer = memory.write("a").unwrap();
            writer.bytes_mut().copy_from_slice(&42i32.to_le_bytes());
            assert!(matches!(memory.free("a"), Err(HostError::RegionBusy { .. })));
            assert!(matches!(memory.read("a"), Err(HostError::WriterConflict(_))));
        }

        {
            let first = memory.read("a").unwrap();
            let second = memory.read("a").unwrap();
            assert_eq!(first.region().readers(), 2);
            assert_eq!(&*second.bytes(), &42i32.to_le_bytes());
        }

        memory.free("a").unwrap();
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn fails_midway(memory: &MemoryCoordinator) -> Result<()> {
            let _guard = memory.read("a")?;
            Err(HostError::InvalidState("midway".into()))
        }

        let memory = coordinator(1024, AccessPolicy::Exclusive);
        memory.allocate("a", 4, MemoryType::Bytes).unwrap();
        assert!(fails_midway(&memory).is_err());
        assert_eq!(memory.get("a").unwrap().readers(), 0);
    }

    #[test]
    fn test_stats() {
        let memory = coordinator(1000, AccessPolicy::Exclusive);
        memory.allocate("b", 250, MemoryType::Float32).unwrap();
        memory.allocate("a", 250, MemoryType::Float64).unwrap();

        let stats = memory.stats();
        assert_eq!(stats.regions, 2);
        assert_eq!(stats.usage, 500);
        assert_eq!(stats.limit, 1000);
        assert!((stats.utilization - 0.5).abs() < f64::EPSILON);
        assert_eq!(memory.region_ids(), vec!["a", "b"]);
    }

    /// Two runtimes exchanging a float buffer through the coordinator
    #[test]
    fn test_cross_runtime_handoff() {
        let memory = coordinator(1024 * 1024, AccessPolicy::Exclusive);
        memory
            .allocate("shared_data", 1024, MemoryType::Float64)
            .unwrap();

        {
            let mut producer = memory.write("shared_data").unwrap();
            let mut bytes = producer.bytes_mut();
            bytes[..8].copy_from_slice(&3.5f64.to_le_bytes());
        }

        {
            let consumer = memory.read("shared_data").unwrap();
            let bytes = consumer.bytes();
            let mut first = [0u8; 8];
            first.copy_from_slice(&bytes[..8]);
            assert_eq!(f64::from_le_bytes(first), 3.5);
        }

        memory.free("shared_data").unwrap();
        assert_eq!(memory.usage(), 0);
    }

    #[test]
    fn test_concurrent_allocations_respect_limit() {
        let memory = Arc::new(coordinator(1000, AccessPolicy::Exclusive));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || memory.allocate(&format!("r{}", i), 100, MemoryType::Bytes).is_ok())
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 10);
        assert_eq!(memory.stats().regions, 10);
        assert_eq!(memory.usage(), 1000);
    }

    #[test]
    fn test_usage_never_observed_above_limit() {
        let memory = Arc::new(coordinator(1000, AccessPolicy::Exclusive));
        memory.allocate("base", 1000, MemoryType::Bytes).unwrap();

        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watcher = {
            let memory = Arc::clone(&memory);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut peak = 0;
                while !done.load(Ordering::SeqCst) {
                    peak = peak.max(memory.usage());
                }
                peak
            })
        };

        let refusals: Vec<_> = (0..4)
            .map(|t| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let size = if i % 2 == 0 { 1 } else { usize::MAX };
                        let result = memory.allocate(&format!("r{}-{}", t, i), size, MemoryType::Bytes);
                        assert!(matches!(result, Err(HostError::MemoryLimitExceeded { .. })));
                    }
                })
            })
            .collect();
        for handle in refusals {
            handle.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);

        assert_eq!(watcher.join().unwrap(), 1000);
        assert_eq!(memory.usage(), 1000);
        assert_eq!(memory.stats().regions, 1);
    }

    proptest! {
        #[test]
        fn prop_usage_matches_live_regions(
            ops in prop::collection::vec((0usize..8, 0usize..300, any::<bool>()), 1..60)
        ) {
            let memory = coordinator(1000, AccessPolicy::Exclusive);

            for (slot, size, allocate) in ops {
                let id = format!("r{}", slot);
                if allocate {
                    let _ = memory.allocate(&id, size, MemoryType::Bytes);
                } else {
                    let _ = memory.free(&id);
                }

                let live: u64 = memory
                    .region_ids()
                    .iter()
                    .map(|id| memory.get(id).unwrap().size() as u64)
                    .sum();
                prop_assert_eq!(memory.usage(), live);
                prop_assert!(memory.usage() <= memory.limit());
            }
        }
    }
}
