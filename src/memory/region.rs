// src/memory/region.rs
//! Shared memory regions
//!
//! A region is a fixed-size, zero-initialised anonymous memory map. The
//! coordinator owns every region; callers only ever hold `Arc` references.

use crate::utils::errors::{HostError, Result};
use bytes::Bytes;
use memmap2::MmapMut;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Declared element type of a region's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Bytes,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Struct,
}

impl MemoryType {
    /// Element width in bytes, `None` for variable-width types
    pub fn element_size(&self) -> Option<usize> {
        match self {
            MemoryType::Bytes => Some(1),
            MemoryType::Int32 | MemoryType::Float32 => Some(4),
            MemoryType::Int64 | MemoryType::Float64 => Some(8),
            MemoryType::String | MemoryType::Struct => None,
        }
    }
}

/// A named shared buffer
pub struct MemoryRegion {
    id: String,
    size: usize,
    memory_type: MemoryType,
    data: RwLock<MmapMut>,
    pub(crate) readers: AtomicUsize,
    pub(crate) writers: AtomicUsize,
}

impl MemoryRegion {
    pub(crate) fn new(id: impl Into<String>, size: usize, memory_type: MemoryType) -> Result<Self> {
        let id = id.into();

        // Anonymous maps of length zero are rejected by the kernel
        let mmap = MmapMut::map_anon(size.max(1)).map_err(|e| {
            HostError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to map region {}: {}", id, e),
            ))
        })?;

        debug!("Mapped region {} ({} bytes, {:?})", id, size, memory_type);

        Ok(Self {
            id,
            size,
            memory_type,
            data: RwLock::new(mmap),
            readers: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Declared readers
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Declared writers
    pub fn writers(&self) -> usize {
        self.writers.load(Ordering::SeqCst)
    }

    /// Borrow the contents for reading
    pub fn bytes(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let size = self.size;
        RwLockReadGuard::map(self.data.read(), move |m| &m[..size])
    }

    /// Borrow the contents for writing
    pub fn bytes_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        let size = self.size;
        RwLockWriteGuard::map(self.data.write(), move |m| &mut m[..size])
    }

    /// Copy the current contents out
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bytes())
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("memory_type", &self.memory_type)
            .field("readers", &self.readers())
            .field("writers", &self.writers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_is_zeroed() {
        let region = MemoryRegion::new("buf", 64, MemoryType::Bytes).unwrap();
        assert_eq!(region.size(), 64);
        assert_eq!(region.bytes().len(), 64);
        assert!(region.bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_write_then_snapshot() {
        let region = MemoryRegion::new("buf", 4, MemoryType::Int32).unwrap();
        region.bytes_mut().copy_from_slice(&7i32.to_le_bytes());
        assert_eq!(region.snapshot(), Bytes::from_static(&[7, 0, 0, 0]));
    }

    #[test]
    fn test_zero_sized_region() {
        let region = MemoryRegion::new("empty", 0, MemoryType::Bytes).unwrap();
        assert_eq!(region.size(), 0);
        assert!(region.bytes().is_empty());
    }

    #[test]
    fn test_element_size() {
        assert_eq!(MemoryType::Float64.element_size(), Some(8));
        assert_eq!(MemoryType::Int32.element_size(), Some(4));
        assert_eq!(MemoryType::Struct.element_size(), None);
    }
}
