//! Spans that carry each component's identity into its log events.
//!
//! Components create their span once at construction and attach every event
//! to it, so there is no global logging category to initialize.

use crate::hardware::PortIndex;
use rustix::fd::RawFd;
use tracing::{Level, Span, span};

/// Create a span for a device memory region.
///
/// # Example
///
/// ```rust,ignore
/// use portmem::observability::span_region;
///
/// let span = span_region(Some(fd), 4096, 3);
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_region(fd: Option<RawFd>, slot_size: usize, slot_count: usize) -> Span {
    span!(
        Level::DEBUG,
        "region",
        fd = ?fd,
        slot_size,
        slot_count
    )
}

/// Create a span for a port buffer allocator.
#[inline]
pub fn span_port_allocator(port: PortIndex) -> Span {
    span!(Level::DEBUG, "port_allocator", port = %port)
}

/// Create a span for a buffer pool.
#[inline]
pub fn span_pool(name: &str) -> Span {
    span!(Level::DEBUG, "buffer_pool", pool = %name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_without_subscriber() {
        // Without a subscriber spans are disabled but still usable.
        let region = span_region(None, 100, 3);
        let _g = region.enter();

        let port = span_port_allocator(PortIndex(1));
        port.in_scope(|| {});

        let pool = span_pool("test");
        let _g2 = pool.enter();
    }
}
