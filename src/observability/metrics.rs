//! Metrics collection using metrics-rs.

use crate::hardware::{BufferCommand, PortIndex};
use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const POOL_OUTSTANDING: &str = "portmem_pool_outstanding";
const PORT_BUFFERS_ALLOCATED: &str = "portmem_port_buffers_allocated";
const PORT_BUFFERS_FREED: &str = "portmem_port_buffers_freed";
const HW_COMMAND_FAILURES: &str = "portmem_hw_command_failures";
const REGION_BYTES: &str = "portmem_region_bytes";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_gauge!(
        POOL_OUTSTANDING,
        Unit::Count,
        "Buffers currently checked out to the hardware component"
    );
    metrics::describe_counter!(
        PORT_BUFFERS_ALLOCATED,
        Unit::Count,
        "Port buffers allocated by the hardware component"
    );
    metrics::describe_counter!(
        PORT_BUFFERS_FREED,
        Unit::Count,
        "Port buffers freed by the hardware component"
    );
    metrics::describe_counter!(
        HW_COMMAND_FAILURES,
        Unit::Count,
        "Buffer commands rejected by the hardware component"
    );
    metrics::describe_gauge!(
        REGION_BYTES,
        Unit::Bytes,
        "Bytes held by device memory regions"
    );
}

/// Record a pool's outstanding-buffer count.
#[inline]
pub fn record_pool_outstanding(pool: &str, outstanding: i64) {
    gauge!(POOL_OUTSTANDING, "pool" => pool.to_string()).set(outstanding as f64);
}

/// Record a port buffer allocated by the hardware.
#[inline]
pub fn record_port_buffer_allocated(port: PortIndex) {
    counter!(PORT_BUFFERS_ALLOCATED, "port" => port.to_string()).increment(1);
}

/// Record a port buffer freed by the hardware.
#[inline]
pub fn record_port_buffer_freed(port: PortIndex) {
    counter!(PORT_BUFFERS_FREED, "port" => port.to_string()).increment(1);
}

/// Record a buffer command the hardware rejected.
#[inline]
pub fn record_hw_command_failure(port: PortIndex, command: BufferCommand) {
    counter!(HW_COMMAND_FAILURES, "port" => port.to_string(), "command" => command.name())
        .increment(1);
}

/// Record a region acquiring `bytes` of `backing` memory.
#[inline]
pub fn record_region_acquired(backing: &'static str, bytes: usize) {
    gauge!(REGION_BYTES, "backing" => backing).increment(bytes as f64);
}

/// Record a region releasing `bytes` of `backing` memory.
#[inline]
pub fn record_region_released(backing: &'static str, bytes: usize) {
    gauge!(REGION_BYTES, "backing" => backing).decrement(bytes as f64);
}
