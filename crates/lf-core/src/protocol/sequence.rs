//! Per-source sequence counter for accepted envelopes.
//!
//! # What is a sequence number? (for beginners)
//!
//! Every envelope the hub accepts from a connection carries an integer that
//! grows by one with each accepted message from that same connection.
//! Subscribers use it to:
//!
//! - **Detect dropped messages** – receiving 1, 2 and 4 from one source means
//!   message 3 was discarded (for example by drop-oldest backpressure).
//! - **Check ordering** – messages from one source always arrive in
//!   increasing order.
//!
//! Numbering starts at **1**, so `0` can mean "nothing issued yet".
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64` internally, so it can be shared between the
//! reader task that accepts publishes and the diagnostics that read it without
//! taking a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, strictly increasing counter starting at 1.
///
/// # Examples
///
/// ```rust
/// use lf_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.last_issued(), 0);
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// assert_eq!(counter.last_issued(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    /// Last value handed out; 0 before the first call to [`next`](Self::next).
    last: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Atomically issues the next sequence number.
    ///
    /// `Ordering::Relaxed` is enough: the value orders messages, it does not
    /// publish any other memory.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// The most recently issued number, or 0 if none has been issued.
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
