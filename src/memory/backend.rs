//! Device/OS memory primitives used to back regions.
//!
//! [`MemoryBackend`] is the seam between region bookkeeping and the kernel:
//! page size queries, shared mappings over a device fd, and plain heap blocks.
//! [`SystemBackend`] is the real implementation; tests substitute counting
//! doubles to observe which primitive a region used.

use crate::error::{Error, Result};
use rustix::fd::BorrowedFd;
use rustix::mm::{MapFlags, ProtFlags};
use std::alloc::Layout;
use std::ptr::NonNull;

/// Primitives a [`DeviceMemoryRegion`](super::DeviceMemoryRegion) needs from the OS.
///
/// Implementations must return pointers valid for `len` bytes until the
/// matching `unmap`/`heap_free` call, and must accept back exactly the
/// pointer/length pairs they handed out.
pub trait MemoryBackend: Send + Sync {
    /// System page size in bytes. Always a power of two.
    fn page_size(&self) -> usize;

    /// Map `len` bytes of `fd` shared and read-write at offset zero.
    fn map_shared(&self, fd: BorrowedFd<'_>, len: usize) -> Result<NonNull<u8>>;

    /// Unmap a range previously returned by [`map_shared`](Self::map_shared).
    ///
    /// # Safety
    ///
    /// `ptr`/`len` must come from a single prior `map_shared` call and must
    /// not be used afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<()>;

    /// Allocate a zeroed, page-aligned heap block of `len` bytes.
    fn heap_alloc(&self, len: usize) -> Result<NonNull<u8>>;

    /// Free a block returned by [`heap_alloc`](Self::heap_alloc).
    ///
    /// # Safety
    ///
    /// `ptr`/`len` must come from a single prior `heap_alloc` call and must
    /// not be used afterwards.
    unsafe fn heap_free(&self, ptr: NonNull<u8>, len: usize);
}

/// The real backend: `mmap`/`munmap` via rustix and page-aligned `std::alloc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SystemBackend {
    fn heap_layout(&self, len: usize) -> Result<Layout> {
        Layout::from_size_align(len, self.page_size())
            .map_err(|e| Error::AllocationFailed(format!("invalid heap layout: {}", e)))
    }
}

impl MemoryBackend for SystemBackend {
    fn page_size(&self) -> usize {
        rustix::param::page_size()
    }

    fn map_shared(&self, fd: BorrowedFd<'_>, len: usize) -> Result<NonNull<u8>> {
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )
            .map_err(|e| Error::AllocationFailed(format!("mmap of device fd failed: {}", e)))?
        };

        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<()> {
        // SAFETY: caller guarantees the range came from map_shared.
        unsafe { rustix::mm::munmap(ptr.as_ptr().cast(), len)? };
        Ok(())
    }

    fn heap_alloc(&self, len: usize) -> Result<NonNull<u8>> {
        if len == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }
        let layout = self.heap_layout(len)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr)
            .ok_or_else(|| Error::AllocationFailed(format!("heap exhausted ({} bytes)", len)))
    }

    unsafe fn heap_free(&self, ptr: NonNull<u8>, len: usize) {
        match self.heap_layout(len) {
            // SAFETY: caller guarantees ptr came from heap_alloc with this len,
            // and the page size does not change for the life of the process.
            Ok(layout) => unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) },
            Err(e) => tracing::error!(len, error = %e, "cannot rebuild heap layout, leaking block"),
        }
    }
}

/// Round `len` up to a multiple of `page_size`.
///
/// Returns `None` on overflow.
#[inline]
pub fn round_to_page(len: usize, page_size: usize) -> Option<usize> {
    debug_assert!(page_size.is_power_of_two());
    len.checked_add(page_size - 1).map(|v| v & !(page_size - 1))
}
