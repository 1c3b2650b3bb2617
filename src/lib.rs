//! # portmem
//!
//! Zero-copy ownership of hardware codec port buffers for media pipelines.
//!
//! A hardware codec or camera component owns the memory behind its port
//! buffers. portmem lets a pipeline use that memory without copying it while
//! keeping every buffer attributable to exactly one owner:
//!
//! - **Device regions**: page-aligned, multi-slot memory mapped from a device
//!   fd, or heap-backed when the device has none
//! - **Port allocator**: wraps hardware-allocated buffers as pipeline memory;
//!   freeing always goes back through the hardware component
//! - **Buffer pool**: a counting gate that blocks the producer until the
//!   hardware hands a buffer back, with a clean shutdown path
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portmem::prelude::*;
//!
//! let allocator = PortBufferAllocator::new(component, PortIndex(0))?;
//! let pool = BufferPool::with_config(PoolConfig::named("encoder-input"));
//!
//! for memory in allocator.allocate_port_buffers()? {
//!     let data = allocator.map(&memory)?;
//!     // fill `data`, hand the buffer to the hardware ...
//!     pool.on_buffer_acquired_by_hardware();
//! }
//!
//! // Hardware callback thread: pool.on_buffer_returned();
//! while pool.wait_for_buffer() {
//!     // refill and resubmit
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod hardware;
pub mod memory;
pub mod observability;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::hardware::{
        HardwareComponent, NativeBuffer, PortBufferAllocator, PortDefinition, PortIndex,
    };
    pub use crate::memory::{
        Allocator, AllocatorKind, BufferPool, DeviceMemoryRegion, Memory, PoolConfig,
        SystemAllocator,
    };
}

pub use error::{Error, Result};
