//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! portmem exposes the following metrics:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `portmem_pool_outstanding` | Gauge | Buffers checked out to the hardware, per pool |
//! | `portmem_port_buffers_allocated` | Counter | Port buffers allocated, per port |
//! | `portmem_port_buffers_freed` | Counter | Port buffers freed, per port |
//! | `portmem_hw_command_failures` | Counter | Rejected buffer commands, per port and command |
//! | `portmem_region_bytes` | Gauge | Bytes held by regions, per backing |
//!
//! ## Tracing
//!
//! portmem emits spans for regions, port allocators and buffer pools; every
//! event a component logs is attached to its span.

mod metrics;
mod tracing_support;

pub use self::metrics::{
    init_metrics, record_hw_command_failure, record_pool_outstanding, record_port_buffer_allocated,
    record_port_buffer_freed, record_region_acquired, record_region_released,
};
pub use self::tracing_support::{span_pool, span_port_allocator, span_region};
