//! Hardware codec component boundary.
//!
//! The codec/camera component is an opaque service reached through
//! [`HardwareComponent`]. It owns its port buffers: this crate asks it to
//! allocate and free them, and wraps what it returns as pipeline memory via
//! [`PortBufferAllocator`].
//!
//! # Example
//!
//! ```rust,ignore
//! use portmem::hardware::{PortBufferAllocator, PortIndex};
//! use portmem::memory::Allocator;
//!
//! let allocator = PortBufferAllocator::new(component, PortIndex(1))?;
//! let size = allocator.port_definition().buffer_size;
//! let memory = allocator.allocate(size)?;
//!
//! // Zero-copy view of the hardware buffer.
//! let ptr = allocator.map(&memory)?;
//!
//! // The component frees the native buffer, then the wrapper goes away.
//! allocator.free(memory);
//! ```

mod port_allocator;

pub use port_allocator::{PortBufferAllocator, PortMemory};

use std::fmt;
use std::ptr::NonNull;

/// Index of a port on the hardware component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortIndex(pub u32);

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque value passed with every allocate command so the component can
/// correlate the buffers it hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(pub u64);

/// Error code reported by the hardware component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwErrorCode(pub u32);

impl fmt::Display for HwErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Commands this crate issues to the hardware component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferCommand {
    /// Allocate a port buffer.
    AllocateBuffer,
    /// Free a port buffer.
    FreeBuffer,
    /// Read the port's negotiated buffer configuration.
    GetPortDefinition,
}

impl BufferCommand {
    /// Stable name used in logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            BufferCommand::AllocateBuffer => "allocate_buffer",
            BufferCommand::FreeBuffer => "free_buffer",
            BufferCommand::GetPortDefinition => "get_port_definition",
        }
    }
}

impl fmt::Display for BufferCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Buffer configuration negotiated on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDefinition {
    /// Size of each buffer in bytes.
    pub buffer_size: usize,
    /// Required buffer alignment in bytes.
    pub buffer_alignment: usize,
    /// Number of buffers the port works with.
    pub buffer_count: usize,
}

/// The hardware component's own record of a buffer it allocated.
///
/// The component owns the memory behind `data` from `allocate_buffer` until
/// `free_buffer`; this crate only borrows a view of it.
#[derive(Debug)]
pub struct NativeBuffer {
    data: NonNull<u8>,
    alloc_len: usize,
    port: PortIndex,
    token: ContextToken,
}

impl NativeBuffer {
    /// Describe a buffer of `alloc_len` bytes at `data`.
    ///
    /// Called by [`HardwareComponent`] implementations.
    pub fn new(data: NonNull<u8>, alloc_len: usize, port: PortIndex, token: ContextToken) -> Self {
        Self {
            data,
            alloc_len,
            port,
            token,
        }
    }

    /// Start of the buffer's memory.
    pub fn data(&self) -> NonNull<u8> {
        self.data
    }

    /// Bytes the component allocated.
    pub fn alloc_len(&self) -> usize {
        self.alloc_len
    }

    /// Port the buffer belongs to.
    pub fn port(&self) -> PortIndex {
        self.port
    }

    /// Token passed with the allocate command.
    pub fn token(&self) -> ContextToken {
        self.token
    }
}

// SAFETY: the descriptor is a plain record; the memory it points at is owned
// by the hardware component, which accepts calls from any thread.
unsafe impl Send for NativeBuffer {}
unsafe impl Sync for NativeBuffer {}

/// Buffer commands the hardware component exposes.
///
/// Implementations may complete buffers on their own threads, so they must be
/// `Send + Sync`. Calls are synchronous and may block on hardware latency.
pub trait HardwareComponent: Send + Sync {
    /// Allocate a buffer of `size` bytes on `port`.
    fn allocate_buffer(
        &self,
        port: PortIndex,
        token: ContextToken,
        size: usize,
    ) -> std::result::Result<NativeBuffer, HwErrorCode>;

    /// Free a buffer previously returned by `allocate_buffer`.
    fn free_buffer(
        &self,
        port: PortIndex,
        buffer: NativeBuffer,
    ) -> std::result::Result<(), HwErrorCode>;

    /// Current buffer configuration of `port`.
    fn port_definition(&self, port: PortIndex) -> std::result::Result<PortDefinition, HwErrorCode>;
}
