//! Shared test doubles for integration tests.

#![allow(dead_code)]

use portmem::error::{Error, Result};
use portmem::hardware::{
    ContextToken, HardwareComponent, HwErrorCode, NativeBuffer, PortDefinition, PortIndex,
};
use portmem::memory::{MemoryBackend, SystemBackend};
use rustix::fd::BorrowedFd;
use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend double that counts every primitive and reports a fixed page size.
pub struct CountingBackend {
    page_size: usize,
    pub maps: AtomicUsize,
    pub unmaps: AtomicUsize,
    pub heap_allocs: AtomicUsize,
    pub heap_frees: AtomicUsize,
    pub fail_map: bool,
    pub fail_unmap: bool,
}

impl CountingBackend {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
            heap_allocs: AtomicUsize::new(0),
            heap_frees: AtomicUsize::new(0),
            fail_map: false,
            fail_unmap: false,
        }
    }

    pub fn failing_map(page_size: usize) -> Self {
        Self {
            fail_map: true,
            ..Self::new(page_size)
        }
    }

    pub fn failing_unmap(page_size: usize) -> Self {
        Self {
            fail_unmap: true,
            ..Self::new(page_size)
        }
    }

    pub fn maps(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    pub fn unmaps(&self) -> usize {
        self.unmaps.load(Ordering::SeqCst)
    }

    pub fn heap_allocs(&self) -> usize {
        self.heap_allocs.load(Ordering::SeqCst)
    }

    pub fn heap_frees(&self) -> usize {
        self.heap_frees.load(Ordering::SeqCst)
    }

    /// Mappings plus heap blocks not yet given back.
    pub fn outstanding(&self) -> usize {
        (self.maps() - self.unmaps()) + (self.heap_allocs() - self.heap_frees())
    }
}

impl MemoryBackend for CountingBackend {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn map_shared(&self, fd: BorrowedFd<'_>, len: usize) -> Result<NonNull<u8>> {
        if self.fail_map {
            return Err(Error::AllocationFailed("injected mmap failure".into()));
        }
        let ptr = SystemBackend.map_shared(fd, len)?;
        self.maps.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<()> {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded from the caller.
        unsafe { SystemBackend.unmap(ptr, len)? };
        if self.fail_unmap {
            return Err(Error::System(rustix::io::Errno::INVAL));
        }
        Ok(())
    }

    fn heap_alloc(&self, len: usize) -> Result<NonNull<u8>> {
        let layout = Layout::from_size_align(len, self.page_size).unwrap();
        let ptr = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
            .ok_or_else(|| Error::AllocationFailed("heap exhausted".into()))?;
        self.heap_allocs.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn heap_free(&self, ptr: NonNull<u8>, len: usize) {
        let layout = Layout::from_size_align(len, self.page_size).unwrap();
        // SAFETY: ptr came from heap_alloc with this layout.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        self.heap_frees.fetch_add(1, Ordering::SeqCst);
    }
}

/// A memfd standing in for a device fd, sized to `len` bytes.
pub fn device_fd(len: usize) -> rustix::fd::OwnedFd {
    let fd = rustix::fs::memfd_create("portmem_device", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
    rustix::fs::ftruncate(&fd, len as u64).unwrap();
    fd
}

#[derive(Default)]
struct ComponentState {
    buffers: HashMap<(PortIndex, u64), Box<[u8]>>,
    allocate_calls: usize,
    free_calls: usize,
    definition_queries: usize,
    fail_free: Option<HwErrorCode>,
}

/// In-process stand-in for a hardware codec component.
pub struct SimulatedComponent {
    definitions: HashMap<PortIndex, PortDefinition>,
    state: Mutex<ComponentState>,
}

impl SimulatedComponent {
    pub fn new(ports: &[(PortIndex, PortDefinition)]) -> Self {
        Self {
            definitions: ports.iter().copied().collect(),
            state: Mutex::new(ComponentState::default()),
        }
    }

    pub fn single_port(buffer_size: usize, buffer_count: usize) -> Self {
        Self::new(&[(
            PortIndex(0),
            PortDefinition {
                buffer_size,
                buffer_alignment: 16,
                buffer_count,
            },
        )])
    }

    pub fn fail_free_with(&self, code: HwErrorCode) {
        self.state.lock().unwrap().fail_free = Some(code);
    }

    pub fn allocate_calls(&self) -> usize {
        self.state.lock().unwrap().allocate_calls
    }

    pub fn free_calls(&self) -> usize {
        self.state.lock().unwrap().free_calls
    }

    pub fn definition_queries(&self) -> usize {
        self.state.lock().unwrap().definition_queries
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }
}

impl HardwareComponent for SimulatedComponent {
    fn allocate_buffer(
        &self,
        port: PortIndex,
        token: ContextToken,
        size: usize,
    ) -> std::result::Result<NativeBuffer, HwErrorCode> {
        let mut state = self.state.lock().unwrap();
        state.allocate_calls += 1;
        if !self.definitions.contains_key(&port) {
            return Err(HwErrorCode(0x8000_101b));
        }
        let mut data = vec![0u8; size].into_boxed_slice();
        let ptr = NonNull::new(data.as_mut_ptr()).unwrap();
        state.buffers.insert((port, token.0), data);
        Ok(NativeBuffer::new(ptr, size, port, token))
    }

    fn free_buffer(
        &self,
        port: PortIndex,
        buffer: NativeBuffer,
    ) -> std::result::Result<(), HwErrorCode> {
        let mut state = self.state.lock().unwrap();
        state.free_calls += 1;
        state.buffers.remove(&(port, buffer.token().0));
        match state.fail_free {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn port_definition(&self, port: PortIndex) -> std::result::Result<PortDefinition, HwErrorCode> {
        self.state.lock().unwrap().definition_queries += 1;
        self.definitions
            .get(&port)
            .copied()
            .ok_or(HwErrorCode(0x8000_101b))
    }
}
