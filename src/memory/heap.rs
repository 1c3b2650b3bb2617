//! Heap-backed pipeline memory.

use super::{Allocator, AllocatorKind, Memory};
use crate::error::{Error, Result};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// Default alignment for [`SystemAllocator`] blocks.
const DEFAULT_ALIGN: usize = 16;

/// A zeroed heap block, freed when the last [`HeapMemory`] referencing it drops.
struct HeapBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout in SystemAllocator::allocate.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: the block is plain bytes owned by this struct; access goes through
// raw pointers whose synchronization is the caller's responsibility.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

/// Heap memory handed out by [`SystemAllocator`].
///
/// Unlike port buffers, heap memory may be shared: every share points at the
/// same block, which lives until the last reference drops.
pub struct HeapMemory {
    block: Arc<HeapBlock>,
    offset: usize,
    size: usize,
}

impl HeapMemory {
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn capacity(&self) -> usize {
        self.block.layout.size()
    }

    pub(crate) fn align(&self) -> usize {
        self.block.layout.align()
    }

    pub(crate) fn share(&self) -> HeapMemory {
        HeapMemory {
            block: Arc::clone(&self.block),
            offset: self.offset,
            size: self.size,
        }
    }

    pub(crate) fn set_window(&mut self, offset: usize, size: usize) {
        self.offset = offset;
        self.size = size;
    }

    fn data_ptr(&self) -> NonNull<u8> {
        // SAFETY: offset <= capacity is maintained by Memory::resize.
        unsafe { self.block.ptr.add(self.offset) }
    }
}

impl std::fmt::Debug for HeapMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapMemory")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .field("shares", &Arc::strong_count(&self.block))
            .finish()
    }
}

/// Allocator for ordinary heap memory objects.
///
/// # Example
///
/// ```rust
/// use portmem::memory::{Allocator, SystemAllocator};
///
/// let allocator = SystemAllocator::new();
/// let memory = allocator.allocate(1024).unwrap();
/// assert_eq!(memory.size(), 1024);
/// allocator.free(memory);
/// ```
#[derive(Debug, Clone)]
pub struct SystemAllocator {
    align: usize,
}

impl SystemAllocator {
    /// Create an allocator with the default alignment.
    pub fn new() -> Self {
        Self {
            align: DEFAULT_ALIGN,
        }
    }

    /// Create an allocator with a specific alignment.
    ///
    /// # Errors
    ///
    /// Returns an error if `align` is not a power of 2.
    pub fn with_alignment(align: usize) -> Result<Self> {
        if !align.is_power_of_two() {
            return Err(Error::AllocationFailed(
                "alignment must be a power of 2".into(),
            ));
        }
        Ok(Self { align })
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SystemAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::System
    }

    fn allocate(&self, size: usize) -> Result<Memory> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }
        let layout = Layout::from_size_align(size, self.align)
            .map_err(|e| Error::AllocationFailed(format!("invalid layout: {}", e)))?;

        // SAFETY: layout has non-zero size.
        let ptr = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
            .ok_or_else(|| Error::AllocationFailed(format!("heap exhausted ({} bytes)", size)))?;

        Ok(Memory::Heap(HeapMemory {
            block: Arc::new(HeapBlock { ptr, layout }),
            offset: 0,
            size,
        }))
    }

    fn free(&self, memory: Memory) {
        if memory.kind() != AllocatorKind::System {
            tracing::warn!(
                kind = memory.kind().name(),
                "system allocator asked to free foreign memory, routing to its owner"
            );
        }
        memory.release();
    }

    fn map(&self, memory: &Memory) -> Result<NonNull<u8>> {
        match memory {
            Memory::Heap(m) => Ok(m.data_ptr()),
            other => Err(Error::ForeignMemory {
                expected: AllocatorKind::System,
                actual: other.kind(),
            }),
        }
    }

    fn unmap(&self, _memory: &Memory) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_memory_creation() {
        let allocator = SystemAllocator::new();
        let memory = allocator.allocate(1024).unwrap();

        assert_eq!(memory.size(), 1024);
        assert_eq!(memory.offset(), 0);
        assert_eq!(memory.align(), DEFAULT_ALIGN);
        assert_eq!(allocator.kind(), AllocatorKind::System);
    }

    #[test]
    fn test_heap_memory_zero_size_fails() {
        let result = SystemAllocator::new().allocate(0);
        assert!(matches!(result, Err(Error::AllocationFailed(_))));
    }

    #[test]
    fn test_heap_memory_read_write() {
        let allocator = SystemAllocator::new();
        let memory = allocator.allocate(64).unwrap();

        let ptr = allocator.map(&memory).unwrap();
        unsafe {
            std::ptr::write(ptr.as_ptr(), 42);
            std::ptr::write(ptr.as_ptr().add(1), 43);

            let slice = std::slice::from_raw_parts(ptr.as_ptr(), memory.size());
            assert_eq!(slice[0], 42);
            assert_eq!(slice[1], 43);
            assert!(slice[2..].iter().all(|&b| b == 0));
        }
        allocator.unmap(&memory);
        allocator.free(memory);
    }

    #[test]
    fn test_with_alignment() {
        let allocator = SystemAllocator::with_alignment(4096).unwrap();
        let memory = allocator.allocate(100).unwrap();
        let ptr = allocator.map(&memory).unwrap();

        assert_eq!(ptr.as_ptr() as usize % 4096, 0);
        assert_eq!(memory.align(), 4096);
        assert!(SystemAllocator::with_alignment(3).is_err());
    }

    #[test]
    fn test_share_outlives_original() {
        let allocator = SystemAllocator::new();
        let memory = allocator.allocate(32).unwrap();
        let shared = memory.share().unwrap();

        unsafe { *allocator.map(&memory).unwrap().as_ptr() = 9 };
        allocator.free(memory);

        unsafe { assert_eq!(*allocator.map(&shared).unwrap().as_ptr(), 9) };
    }
}
