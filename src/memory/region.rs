//! Page-aligned, multi-slot memory regions backing hardware buffers.
//!
//! A [`DeviceMemoryRegion`] is either a shared mapping of a device fd or, when
//! the device has no fd, a heap block laid out the same way. Slots are
//! addressed through the region's [`HardwareBufferHandle`] using the
//! *unrounded* per-slot size, while the region itself is always a whole
//! number of pages.
//!
//! # Example
//!
//! ```rust,ignore
//! use portmem::memory::DeviceMemoryRegion;
//!
//! // Three 100-byte slots on the heap: 300 bytes rounded up to one page.
//! let region = DeviceMemoryRegion::acquire(None, 100, 3)?;
//! assert_eq!(region.size(), 4096);
//!
//! let base = region.base().unwrap();
//! let slot1 = region.slot_pointer(1).unwrap();
//! assert_eq!(slot1.as_ptr() as usize, base.as_ptr() as usize + 100);
//! assert!(region.slot_pointer(3).is_none());
//! ```

use super::backend::{MemoryBackend, SystemBackend, round_to_page};
use crate::error::{Error, Result};
use crate::observability::{record_region_acquired, record_region_released, span_region};
use rustix::fd::{AsRawFd, BorrowedFd, RawFd};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::Span;

/// Where a region's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionBacking {
    /// Plain heap block; the device exposed no fd.
    Heap,
    /// Shared mapping of the given device fd.
    Device(RawFd),
}

impl RegionBacking {
    fn label(self) -> &'static str {
        match self {
            RegionBacking::Heap => "heap",
            RegionBacking::Device(_) => "device",
        }
    }
}

/// Ownership record for the memory behind a region.
///
/// Exactly one handle exists per mapping or heap block, and it is consumed
/// when the region releases its memory.
pub struct HardwareBufferHandle {
    backing: RegionBacking,
    base: NonNull<u8>,
    /// Mapped/allocated length (page-rounded).
    len: usize,
    /// Unrounded per-slot size used for addressing.
    slot_size: usize,
    slot_count: usize,
    backend: Arc<dyn MemoryBackend>,
}

impl HardwareBufferHandle {
    /// The device fd the memory was mapped from, or `None` for heap memory.
    pub fn source_fd(&self) -> Option<RawFd> {
        match self.backing {
            RegionBacking::Heap => None,
            RegionBacking::Device(fd) => Some(fd),
        }
    }

    /// How the memory is backed.
    pub fn backing(&self) -> RegionBacking {
        self.backing
    }

    /// Per-slot size in bytes, before page rounding.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Pointer to the start of slot `index`, or `None` if out of range.
    pub fn slot_pointer(&self, index: usize) -> Option<NonNull<u8>> {
        if index >= self.slot_count {
            return None;
        }
        // SAFETY: index * slot_size < slot_count * slot_size <= len, so the
        // offset stays inside the allocation.
        Some(unsafe { self.base.add(index * self.slot_size) })
    }

    fn release(self) {
        match self.backing {
            RegionBacking::Heap => {
                // SAFETY: base/len came from heap_alloc and the handle is consumed.
                unsafe { self.backend.heap_free(self.base, self.len) };
            }
            RegionBacking::Device(fd) => {
                // SAFETY: base/len came from map_shared and the handle is consumed.
                if let Err(e) = unsafe { self.backend.unmap(self.base, self.len) } {
                    tracing::warn!(fd, len = self.len, error = %e, "munmap failed, mapping dropped anyway");
                }
            }
        }
        record_region_released(self.backing.label(), self.len);
        tracing::debug!(len = self.len, backing = self.backing.label(), "region released");
    }
}

impl std::fmt::Debug for HardwareBufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareBufferHandle")
            .field("backing", &self.backing)
            .field("len", &self.len)
            .field("slot_size", &self.slot_size)
            .field("slot_count", &self.slot_count)
            .finish()
    }
}

// SAFETY: the handle exclusively owns its mapping/heap block; the raw base
// pointer is only dereferenced by callers through slot pointers.
unsafe impl Send for HardwareBufferHandle {}
unsafe impl Sync for HardwareBufferHandle {}

/// A page-aligned memory region split into equally sized slots.
///
/// The region owns its [`HardwareBufferHandle`]; releasing the region (either
/// explicitly or on drop) unmaps or frees the memory exactly once.
pub struct DeviceMemoryRegion {
    handle: Option<HardwareBufferHandle>,
    /// Total size in bytes, a multiple of the page size.
    size: usize,
    /// `slot_size * slot_count` as requested.
    requested_size: usize,
    span: Span,
}

impl DeviceMemoryRegion {
    /// Acquire a region using the system backend.
    ///
    /// With `fd == None` the region is heap-backed; otherwise `fd` is mapped
    /// shared and read-write at offset zero. The fd only needs to stay open
    /// for the duration of this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the total size is zero or
    /// overflows, or if mapping/allocation fails.
    pub fn acquire(fd: Option<BorrowedFd<'_>>, slot_size: usize, slot_count: usize) -> Result<Self> {
        Self::acquire_with(Arc::new(SystemBackend), fd, slot_size, slot_count)
    }

    /// Acquire a region using a specific backend.
    pub fn acquire_with(
        backend: Arc<dyn MemoryBackend>,
        fd: Option<BorrowedFd<'_>>,
        slot_size: usize,
        slot_count: usize,
    ) -> Result<Self> {
        let span = span_region(fd.map(|fd| fd.as_raw_fd()), slot_size, slot_count);

        let (handle, requested_size) = span.in_scope(|| -> Result<_> {
            let requested = slot_size.checked_mul(slot_count).ok_or_else(|| {
                Error::AllocationFailed(format!(
                    "{} slots of {} bytes overflows usize",
                    slot_count, slot_size
                ))
            })?;
            if requested == 0 {
                return Err(Error::AllocationFailed(
                    "size must be greater than 0".into(),
                ));
            }

            let page_size = backend.page_size();
            let len = round_to_page(requested, page_size).ok_or_else(|| {
                Error::AllocationFailed(format!("{} bytes overflows when page-rounded", requested))
            })?;
            if len != requested {
                tracing::info!(requested, rounded = len, page_size, "region size rounded up to page multiple");
            }

            let (base, backing) = match fd {
                None => (backend.heap_alloc(len)?, RegionBacking::Heap),
                Some(fd) => (backend.map_shared(fd, len)?, RegionBacking::Device(fd.as_raw_fd())),
            };

            record_region_acquired(backing.label(), len);
            tracing::debug!(len, backing = backing.label(), "region acquired");

            Ok((
                HardwareBufferHandle {
                    backing,
                    base,
                    len,
                    slot_size,
                    slot_count,
                    backend: Arc::clone(&backend),
                },
                requested,
            ))
        })?;

        Ok(Self {
            size: handle.len,
            handle: Some(handle),
            requested_size,
            span,
        })
    }

    /// Pointer to the start of slot `index`.
    ///
    /// Returns `None` once the region is released or when `index` is not
    /// below the slot count.
    #[inline]
    pub fn slot_pointer(&self, index: usize) -> Option<NonNull<u8>> {
        self.handle.as_ref()?.slot_pointer(index)
    }

    /// Like [`slot_pointer`](Self::slot_pointer), but says why there is no slot.
    pub fn slot(&self, index: usize) -> Result<NonNull<u8>> {
        let handle = self.handle.as_ref().ok_or(Error::RegionReleased)?;
        handle.slot_pointer(index).ok_or(Error::OutOfRange {
            index,
            slot_count: handle.slot_count,
        })
    }

    /// Base address, or `None` once released.
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.handle.as_ref().map(|h| h.base)
    }

    /// Total size in bytes (page-rounded).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size originally requested (`slot_size * slot_count`).
    pub fn requested_size(&self) -> usize {
        self.requested_size
    }

    /// Whether page rounding grew the region.
    pub fn was_rounded(&self) -> bool {
        self.size != self.requested_size
    }

    /// Per-slot size (unrounded); zero once released.
    pub fn slot_size(&self) -> usize {
        self.handle.as_ref().map_or(0, |h| h.slot_size)
    }

    /// Number of slots; zero once released.
    pub fn slot_count(&self) -> usize {
        self.handle.as_ref().map_or(0, |h| h.slot_count)
    }

    /// The device fd backing the region, if any.
    pub fn source_fd(&self) -> Option<RawFd> {
        self.handle.as_ref().and_then(|h| h.source_fd())
    }

    /// Whether the region lives on the heap rather than a device mapping.
    pub fn is_heap_backed(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.backing == RegionBacking::Heap)
    }

    /// The ownership record, or `None` once released.
    pub fn handle(&self) -> Option<&HardwareBufferHandle> {
        self.handle.as_ref()
    }

    /// Whether the memory has been released.
    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Release the backing memory. Later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _enter = self.span.enter();
            handle.release();
        }
    }
}

impl Drop for DeviceMemoryRegion {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DeviceMemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemoryRegion")
            .field("size", &self.size)
            .field("requested_size", &self.requested_size)
            .field("handle", &self.handle)
            .finish()
    }
}
