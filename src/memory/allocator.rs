//! Pipeline memory objects and the allocator interface.
//!
//! Every buffer the pipeline sees is a [`Memory`]: a closed set of memory
//! kinds, each tagged with the [`AllocatorKind`] that produced it. Code that
//! needs the hardware descriptor behind a port buffer asks the owning
//! allocator family for it (see
//! [`PortBufferAllocator::native_buffer`](crate::hardware::PortBufferAllocator::native_buffer))
//! instead of reinterpreting an untyped pointer.

use super::heap::HeapMemory;
use crate::error::{Error, Result};
use crate::hardware::PortMemory;
use std::ptr::NonNull;

/// Allocator family a memory object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// Buffers owned by a hardware codec port.
    PortBuffer,
    /// Ordinary process heap memory.
    System,
}

impl AllocatorKind {
    /// Stable name used in logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            AllocatorKind::PortBuffer => "port-buffer",
            AllocatorKind::System => "system",
        }
    }
}

/// Pluggable buffer source.
///
/// One implementation exists per buffer source. Allocation and freeing may be
/// delegated elsewhere (the hardware component, for port buffers); `map`
/// never copies.
pub trait Allocator: Send + Sync {
    /// Which family this allocator's memory is tagged with.
    fn kind(&self) -> AllocatorKind;

    /// Allocate a memory object of `size` bytes.
    fn allocate(&self, size: usize) -> Result<Memory>;

    /// Release a memory object previously returned by [`allocate`](Self::allocate).
    ///
    /// Never fails: whatever the backing store reports, the in-process
    /// wrapper is gone after this call.
    fn free(&self, memory: Memory);

    /// Pointer to the first valid byte of `memory`.
    fn map(&self, memory: &Memory) -> Result<NonNull<u8>>;

    /// Counterpart of [`map`](Self::map).
    fn unmap(&self, memory: &Memory);
}

/// A pipeline-visible memory object.
#[derive(Debug)]
pub enum Memory {
    /// A hardware port buffer; freed through the hardware component.
    Port(PortMemory),
    /// Plain heap memory.
    Heap(HeapMemory),
}

impl Memory {
    /// Allocator family this object was produced by.
    pub fn kind(&self) -> AllocatorKind {
        match self {
            Memory::Port(_) => AllocatorKind::PortBuffer,
            Memory::Heap(_) => AllocatorKind::System,
        }
    }

    /// Offset of the valid window from the start of the underlying buffer.
    pub fn offset(&self) -> usize {
        match self {
            Memory::Port(m) => m.offset(),
            Memory::Heap(m) => m.offset(),
        }
    }

    /// Size of the valid window in bytes.
    pub fn size(&self) -> usize {
        match self {
            Memory::Port(m) => m.size(),
            Memory::Heap(m) => m.size(),
        }
    }

    /// Total bytes available in the underlying buffer.
    pub fn capacity(&self) -> usize {
        match self {
            Memory::Port(m) => m.capacity(),
            Memory::Heap(m) => m.capacity(),
        }
    }

    /// Alignment of the underlying buffer.
    pub fn align(&self) -> usize {
        match self {
            Memory::Port(m) => m.align(),
            Memory::Heap(m) => m.align(),
        }
    }

    /// Whether a second reference may be taken with [`share`](Self::share).
    ///
    /// Port buffers are never shareable: the hardware hands out one mapping
    /// per buffer.
    pub fn is_shareable(&self) -> bool {
        matches!(self, Memory::Heap(_))
    }

    /// Take a second reference to the same bytes.
    ///
    /// Returns `None` for non-shareable memory.
    pub fn share(&self) -> Option<Memory> {
        match self {
            Memory::Port(_) => None,
            Memory::Heap(m) => Some(Memory::Heap(m.share())),
        }
    }

    /// Narrow the valid window to `size` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWindow`] if the window does not fit in the
    /// underlying buffer.
    pub fn resize(&mut self, offset: usize, size: usize) -> Result<()> {
        let capacity = self.capacity();
        if offset.checked_add(size).is_none_or(|end| end > capacity) {
            return Err(Error::InvalidWindow {
                offset,
                size,
                capacity,
            });
        }
        match self {
            Memory::Port(m) => m.set_window(offset, size),
            Memory::Heap(m) => m.set_window(offset, size),
        }
        Ok(())
    }

    /// Release the object through the path its family requires.
    pub(crate) fn release(self) {
        match self {
            Memory::Port(m) => {
                // Hardware errors are already logged by the port binding.
                let _ = m.release();
            }
            Memory::Heap(m) => drop(m),
        }
    }
}
