//! Memory management for portmem.
//!
//! This module provides the memory layer between a media pipeline and a
//! hardware codec component.
//!
//! # Architecture
//!
//! - [`DeviceMemoryRegion`]: page-aligned, multi-slot region mapped from a
//!   device fd or allocated on the heap
//! - [`Memory`] / [`Allocator`]: pipeline memory objects and the allocators
//!   that produce, map and free them
//! - [`BufferPool`]: counting gate over buffers checked out to the hardware
//!
//! # Example
//!
//! ```rust,ignore
//! use portmem::memory::{BufferPool, DeviceMemoryRegion};
//!
//! // Four 1 MiB slots mapped from a device fd
//! let region = DeviceMemoryRegion::acquire(Some(device.as_fd()), 1 << 20, 4)?;
//! let slot = region.slot_pointer(2).expect("slot in range");
//!
//! // Gate the producer on buffers held by the hardware
//! let pool = BufferPool::new();
//! pool.on_buffer_acquired_by_hardware();
//! ```

mod allocator;
mod backend;
mod buffer_pool;
mod heap;
mod region;

pub use allocator::{Allocator, AllocatorKind, Memory};
pub use backend::{MemoryBackend, SystemBackend, round_to_page};
pub use buffer_pool::{BufferPool, PoolConfig, PoolStats, WaitOutcome};
pub use heap::{HeapMemory, SystemAllocator};
pub use region::{DeviceMemoryRegion, HardwareBufferHandle, RegionBacking};
