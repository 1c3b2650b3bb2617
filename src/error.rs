//! Error types for portmem.

use crate::hardware::{BufferCommand, HwErrorCode, PortIndex};
use crate::memory::AllocatorKind;
use thiserror::Error;

/// Result type alias using portmem's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for portmem operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Device mapping or heap allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Requested allocation size differs from the port's negotiated buffer size.
    #[error("requested {requested} bytes but port negotiated {negotiated} bytes")]
    SizeMismatch {
        /// Size the caller asked for.
        requested: usize,
        /// Buffer size fixed at port negotiation.
        negotiated: usize,
    },

    /// The hardware component rejected a buffer command.
    #[error("{command} on port {port} failed: {code}")]
    HardwareCommandFailed {
        /// Port the command was issued against.
        port: PortIndex,
        /// The command that failed.
        command: BufferCommand,
        /// Error code reported by the component.
        code: HwErrorCode,
    },

    /// Slot index beyond the region's slot count.
    #[error("slot {index} out of range (region has {slot_count} slots)")]
    OutOfRange {
        /// Requested slot index.
        index: usize,
        /// Number of slots in the region.
        slot_count: usize,
    },

    /// A memory window does not fit inside its underlying buffer.
    #[error("window {offset}+{size} exceeds buffer capacity {capacity}")]
    InvalidWindow {
        /// Requested window start.
        offset: usize,
        /// Requested window length.
        size: usize,
        /// Bytes available in the buffer.
        capacity: usize,
    },

    /// The region's backing memory has already been released.
    #[error("memory region already released")]
    RegionReleased,

    /// A memory object was handed to an allocator of a different family.
    #[error("memory belongs to {actual:?} allocator, expected {expected:?}")]
    ForeignMemory {
        /// Allocator family the operation belongs to.
        expected: AllocatorKind,
        /// Allocator family the memory object carries.
        actual: AllocatorKind,
    },

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Whether the error came back from the hardware component.
    pub fn is_hardware(&self) -> bool {
        matches!(self, Error::HardwareCommandFailed { .. })
    }
}
