//! Counting gate over buffers checked out to the hardware component.
//!
//! The producer thread hands buffers to the hardware and must not overrun the
//! hardware's buffer slots; the hardware returns buffers on its own callback
//! thread. [`BufferPool`] tracks how many buffers are outstanding and lets the
//! producer block until one comes back.
//!
//! # Design
//!
//! - One mutex guards the outstanding count, the return generation and the
//!   closing flag; one condition variable wakes waiters.
//! - A waiter records the return generation on entry and wakes once it has
//!   moved, so it only reports success for a buffer returned *after* it
//!   started waiting.
//! - Shutdown is a separate flag, not encoded in the count. Once set it stays
//!   set and every current and future waiter returns `false`.
//! - Capacity is the caller's business; the pool never refuses an increment.
//!
//! # Example
//!
//! ```rust
//! use portmem::memory::BufferPool;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let pool = Arc::new(BufferPool::new());
//! pool.on_buffer_acquired_by_hardware();
//!
//! let hw = Arc::clone(&pool);
//! let callback = thread::spawn(move || {
//!     while hw.waiting() == 0 {
//!         thread::yield_now();
//!     }
//!     hw.on_buffer_returned();
//! });
//!
//! assert!(pool.wait_for_buffer());
//! callback.join().unwrap();
//! assert_eq!(pool.outstanding(), 0);
//! ```

use crate::observability::{record_pool_outstanding, span_pool};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::Span;

/// Configuration for a [`BufferPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used in logs and metrics labels.
    pub name: String,
    /// Whether to publish the outstanding count as a gauge.
    pub record_metrics: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "portmem-pool".to_string(),
            record_metrics: true,
        }
    }
}

impl PoolConfig {
    /// Default configuration with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// How a timed wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A buffer was returned after the wait began.
    Returned,
    /// The pool is shutting down.
    Closing,
    /// The timeout expired first.
    TimedOut,
}

/// Statistics about gate usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently checked out to the hardware.
    pub outstanding: i64,
    /// Total buffers handed to the hardware.
    pub acquired: u64,
    /// Total buffers returned by the hardware.
    pub returned: u64,
    /// Total calls that waited for a buffer.
    pub waits: u64,
    /// Waits that ended with a returned buffer.
    pub wakeups: u64,
    /// Threads blocked right now.
    pub waiting: usize,
}

#[derive(Debug, Default)]
struct GateState {
    outstanding: i64,
    acquired: u64,
    /// Doubles as the return generation waiters watch.
    returned: u64,
    waits: u64,
    wakeups: u64,
    waiting: usize,
    closing: bool,
}

/// Counting gate between a buffer producer and the hardware component.
pub struct BufferPool {
    state: Mutex<GateState>,
    cond: Condvar,
    config: PoolConfig,
    span: Span,
}

impl BufferPool {
    /// Create a pool with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with the given configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        let span = span_pool(&config.name);
        let pool = Self {
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
            config,
            span,
        };
        pool.publish(0);
        pool
    }

    /// The pool's name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Record that a buffer was handed to the hardware.
    pub fn on_buffer_acquired_by_hardware(&self) {
        let outstanding = {
            let mut state = self.lock();
            state.outstanding += 1;
            state.acquired += 1;
            state.outstanding
        };
        self.publish(outstanding);
        tracing::trace!(parent: &self.span, outstanding, "buffer handed to hardware");
    }

    /// Record that the hardware returned a buffer and wake waiters.
    pub fn on_buffer_returned(&self) {
        let outstanding = {
            let mut state = self.lock();
            if state.outstanding <= 0 {
                tracing::warn!(
                    parent: &self.span,
                    outstanding = state.outstanding,
                    "buffer returned with none outstanding"
                );
            }
            state.outstanding -= 1;
            state.returned += 1;
            self.cond.notify_all();
            state.outstanding
        };
        self.publish(outstanding);
        tracing::trace!(parent: &self.span, outstanding, "buffer returned by hardware");
    }

    /// Block until a buffer is returned after this call began.
    ///
    /// Returns `true` for a returned buffer and `false` if the pool is
    /// shutting down.
    pub fn wait_for_buffer(&self) -> bool {
        self.wait_until(None) == WaitOutcome::Returned
    }

    /// Like [`wait_for_buffer`](Self::wait_for_buffer), giving up after `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait_for_buffer_timeout(&self, timeout: Duration) -> WaitOutcome {
        self.wait_until(Instant::now().checked_add(timeout))
    }

    /// Shut the gate: wake every waiter and make all future waits return
    /// immediately.
    ///
    /// Buffers still held by the hardware are not reclaimed here.
    pub fn shutdown(&self) {
        let (outstanding, waiting) = {
            let mut state = self.lock();
            if state.closing {
                return;
            }
            state.closing = true;
            self.cond.notify_all();
            (state.outstanding, state.waiting)
        };
        tracing::info!(parent: &self.span, outstanding, waiting, "buffer pool shutting down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closing(&self) -> bool {
        self.lock().closing
    }

    /// Buffers currently checked out to the hardware.
    pub fn outstanding(&self) -> i64 {
        self.lock().outstanding
    }

    /// Threads currently blocked in a wait.
    pub fn waiting(&self) -> usize {
        self.lock().waiting
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            outstanding: state.outstanding,
            acquired: state.acquired,
            returned: state.returned,
            waits: state.waits,
            wakeups: state.wakeups,
            waiting: state.waiting,
        }
    }

    fn wait_until(&self, deadline: Option<Instant>) -> WaitOutcome {
        let mut state = self.lock();
        let generation = state.returned;
        state.waits += 1;
        state.waiting += 1;

        let outcome = loop {
            if state.returned != generation {
                break WaitOutcome::Returned;
            }
            if state.closing {
                break WaitOutcome::Closing;
            }
            match deadline {
                None => {
                    state = self
                        .cond
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break WaitOutcome::TimedOut;
                    }
                    state = self
                        .cond
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };

        state.waiting -= 1;
        if outcome == WaitOutcome::Returned {
            state.wakeups += 1;
        }
        drop(state);

        tracing::trace!(parent: &self.span, ?outcome, "wait for buffer finished");
        outcome
    }

    /// Return a buffer and shut down in one critical section, so a blocked
    /// waiter sees both before it wakes.
    #[cfg(test)]
    fn return_and_shutdown(&self) {
        let mut state = self.lock();
        state.outstanding -= 1;
        state.returned += 1;
        state.closing = true;
        self.cond.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // Every critical section leaves the state consistent, so a panic
        // elsewhere never invalidates it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, outstanding: i64) {
        if self.config.record_metrics {
            record_pool_outstanding(&self.config.name, outstanding);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.config.name)
            .field("stats", &self.stats())
            .field("closing", &self.is_closing())
            .finish()
    }
}
