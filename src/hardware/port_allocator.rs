//! Allocator that exposes hardware port buffers as pipeline memory.
//!
//! The hardware component does the real allocation and freeing; this module
//! only wraps its [`NativeBuffer`] descriptors. A wrapped buffer is never
//! freed by ordinary memory-drop logic: dropping or freeing a [`PortMemory`]
//! first asks the component to free the native buffer, and only then lets the
//! wrapper go.

use super::{BufferCommand, ContextToken, HardwareComponent, NativeBuffer, PortDefinition, PortIndex};
use crate::error::{Error, Result};
use crate::memory::{Allocator, AllocatorKind, DeviceMemoryRegion, Memory, MemoryBackend};
use crate::observability::{
    record_hw_command_failure, record_port_buffer_allocated, record_port_buffer_freed,
    span_port_allocator,
};
use rustix::fd::BorrowedFd;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::Span;

/// Component and port a family of port buffers is bound to.
///
/// Shared by the allocator and every buffer it produced, so a buffer can be
/// freed on the right port even after the allocator is gone.
struct PortBinding {
    component: Arc<dyn HardwareComponent>,
    port: PortIndex,
    span: Span,
}

impl PortBinding {
    fn command_failed(&self, command: BufferCommand, code: super::HwErrorCode) -> Error {
        tracing::error!(port = %self.port, %command, %code, "hardware buffer command failed");
        record_hw_command_failure(self.port, command);
        Error::HardwareCommandFailed {
            port: self.port,
            command,
            code,
        }
    }

    fn query_definition(&self) -> Result<PortDefinition> {
        self.component
            .port_definition(self.port)
            .map_err(|code| self.command_failed(BufferCommand::GetPortDefinition, code))
    }

    fn free_native(&self, native: NativeBuffer) -> Result<()> {
        let _enter = self.span.enter();
        let token = native.token();
        match self.component.free_buffer(self.port, native) {
            Ok(()) => {
                record_port_buffer_freed(self.port);
                tracing::debug!(token = token.0, "port buffer freed");
                Ok(())
            }
            Err(code) => Err(self.command_failed(BufferCommand::FreeBuffer, code)),
        }
    }
}

/// A hardware port buffer wrapped as pipeline memory.
///
/// Holds a borrowed view of memory the hardware component owns. Dropping it
/// frees the native buffer on the component.
pub struct PortMemory {
    native: Option<NativeBuffer>,
    offset: usize,
    size: usize,
    align: usize,
    binding: Arc<PortBinding>,
}

impl PortMemory {
    /// Port the buffer was allocated on.
    pub fn port(&self) -> PortIndex {
        self.binding.port
    }

    /// Free the native buffer on the component and drop the wrapper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HardwareCommandFailed`] if the component rejected the
    /// free. The wrapper is gone either way.
    pub fn release(mut self) -> Result<()> {
        match self.native.take() {
            Some(native) => self.binding.free_native(native),
            None => Ok(()),
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn capacity(&self) -> usize {
        self.native.as_ref().map_or(0, NativeBuffer::alloc_len)
    }

    pub(crate) fn align(&self) -> usize {
        self.align
    }

    pub(crate) fn set_window(&mut self, offset: usize, size: usize) {
        self.offset = offset;
        self.size = size;
    }

    fn data_ptr(&self) -> Option<NonNull<u8>> {
        // SAFETY: offset <= alloc_len is maintained by Memory::resize.
        self.native
            .as_ref()
            .map(|native| unsafe { native.data().add(self.offset) })
    }
}

impl Drop for PortMemory {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            // Failure is logged by the binding; the hardware side is out of our hands.
            let _ = self.binding.free_native(native);
        }
    }
}

impl std::fmt::Debug for PortMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMemory")
            .field("port", &self.binding.port)
            .field("token", &self.native.as_ref().map(NativeBuffer::token))
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

/// Allocator bound to one port of a hardware codec component.
///
/// The port's [`PortDefinition`] is read once when the allocator is created
/// and cached; allocation is only allowed at its negotiated buffer size, so a
/// rejected size never reaches the hardware. Call
/// [`refresh_port_definition`](Self::refresh_port_definition) after the port
/// is renegotiated. Memory produced here is not shareable and maps directly
/// onto the hardware buffer.
pub struct PortBufferAllocator {
    binding: Arc<PortBinding>,
    definition: PortDefinition,
    next_token: AtomicU64,
    region: Option<DeviceMemoryRegion>,
}

impl PortBufferAllocator {
    /// Create an allocator for `port` on `component`, reading the port's
    /// buffer configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HardwareCommandFailed`] if the component cannot report
    /// the port definition.
    pub fn new(component: Arc<dyn HardwareComponent>, port: PortIndex) -> Result<Self> {
        let binding = Arc::new(PortBinding {
            component,
            port,
            span: span_port_allocator(port),
        });
        let definition = binding.query_definition()?;
        tracing::debug!(
            parent: &binding.span,
            buffer_size = definition.buffer_size,
            buffer_count = definition.buffer_count,
            "port definition negotiated"
        );

        Ok(Self {
            binding,
            definition,
            next_token: AtomicU64::new(0),
            region: None,
        })
    }

    /// Acquire a staging region with one slot per port buffer.
    ///
    /// `fd` is the device fd to map, or `None` for a heap-backed region. The
    /// region lives as long as the allocator, but port buffers never point
    /// into it: what goes into its slots is up to the caller.
    pub fn with_device_region(
        mut self,
        fd: Option<BorrowedFd<'_>>,
        backend: Arc<dyn MemoryBackend>,
    ) -> Result<Self> {
        let definition = self.definition;
        let region = self.binding.span.in_scope(|| {
            DeviceMemoryRegion::acquire_with(
                backend,
                fd,
                definition.buffer_size,
                definition.buffer_count,
            )
        })?;
        self.region = Some(region);
        Ok(self)
    }

    /// The port this allocator serves.
    pub fn port(&self) -> PortIndex {
        self.binding.port
    }

    /// The staging region owned by this allocator, if one was acquired.
    pub fn region(&self) -> Option<&DeviceMemoryRegion> {
        self.region.as_ref()
    }

    /// The cached port buffer configuration.
    pub fn port_definition(&self) -> PortDefinition {
        self.definition
    }

    /// Re-read the port definition after renegotiation.
    ///
    /// On failure the previous definition is kept. An existing staging
    /// region keeps its original layout.
    pub fn refresh_port_definition(&mut self) -> Result<PortDefinition> {
        let definition = self.binding.query_definition()?;
        if definition != self.definition {
            tracing::info!(
                parent: &self.binding.span,
                old_size = self.definition.buffer_size,
                new_size = definition.buffer_size,
                "port definition changed"
            );
        }
        self.definition = definition;
        Ok(definition)
    }

    /// Allocate every buffer the port declares.
    ///
    /// If any allocation fails, the buffers already obtained are freed before
    /// the error is returned.
    pub fn allocate_port_buffers(&self) -> Result<Vec<Memory>> {
        let definition = self.definition;
        let mut buffers = Vec::with_capacity(definition.buffer_count);

        for _ in 0..definition.buffer_count {
            match self.allocate(definition.buffer_size) {
                Ok(memory) => buffers.push(memory),
                Err(e) => {
                    let _enter = self.binding.span.enter();
                    tracing::warn!(
                        allocated = buffers.len(),
                        wanted = definition.buffer_count,
                        "rolling back partial port allocation"
                    );
                    for memory in buffers {
                        self.free(memory);
                    }
                    return Err(e);
                }
            }
        }

        Ok(buffers)
    }

    /// The native descriptor behind `memory`, if it is a port buffer.
    ///
    /// Returns `None` for memory of any other allocator family.
    pub fn native_buffer(memory: &Memory) -> Option<&NativeBuffer> {
        match memory {
            Memory::Port(port_memory) => port_memory.native.as_ref(),
            _ => None,
        }
    }
}

impl Allocator for PortBufferAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::PortBuffer
    }

    fn allocate(&self, size: usize) -> Result<Memory> {
        let definition = self.definition;
        let _enter = self.binding.span.enter();

        if size != definition.buffer_size {
            tracing::debug!(
                requested = size,
                negotiated = definition.buffer_size,
                "rejecting allocation at non-negotiated size"
            );
            return Err(Error::SizeMismatch {
                requested: size,
                negotiated: definition.buffer_size,
            });
        }

        let token = ContextToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let native = self
            .binding
            .component
            .allocate_buffer(self.binding.port, token, size)
            .map_err(|code| {
                self.binding
                    .command_failed(BufferCommand::AllocateBuffer, code)
            })?;

        record_port_buffer_allocated(self.binding.port);
        tracing::debug!(
            token = token.0,
            alloc_len = native.alloc_len(),
            "port buffer allocated"
        );

        Ok(Memory::Port(PortMemory {
            offset: 0,
            size: native.alloc_len(),
            align: definition.buffer_alignment,
            native: Some(native),
            binding: Arc::clone(&self.binding),
        }))
    }

    fn free(&self, memory: Memory) {
        match memory {
            Memory::Port(port_memory) => {
                if port_memory.port() != self.binding.port {
                    let _enter = self.binding.span.enter();
                    tracing::warn!(
                        owner = %port_memory.port(),
                        "freeing buffer that belongs to another port"
                    );
                }
                // Logged by the binding; the wrapper is released regardless.
                let _ = port_memory.release();
            }
            other => {
                let _enter = self.binding.span.enter();
                tracing::warn!(
                    kind = other.kind().name(),
                    "port allocator asked to free foreign memory, routing to its owner"
                );
                other.release();
            }
        }
    }

    fn map(&self, memory: &Memory) -> Result<NonNull<u8>> {
        match memory {
            Memory::Port(port_memory) => port_memory.data_ptr().ok_or(Error::RegionReleased),
            other => Err(Error::ForeignMemory {
                expected: AllocatorKind::PortBuffer,
                actual: other.kind(),
            }),
        }
    }

    fn unmap(&self, _memory: &Memory) {}
}

impl std::fmt::Debug for PortBufferAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortBufferAllocator")
            .field("port", &self.binding.port)
            .field("definition", &self.definition)
            .field("next_token", &self.next_token.load(Ordering::Relaxed))
            .field("region", &self.region)
            .finish()
    }
}
