//! Fixed-capacity blocking FIFO shared by producer and consumer workers
//!
//! One mutex guards the buffer and the closed flag; one condition variable
//! carries every state change. Each change wakes *all* waiters and each waiter
//! re-checks its own predicate in a loop, so producers and consumers sharing
//! the condvar can never lose a wakeup to each other.

use crate::domain::error::{ClosedQueueError, ConfigError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items accepted by `enqueue`
    pub enqueued: u64,
    /// Items handed out by `dequeue`
    pub dequeued: u64,
    /// Highest number of buffered items ever observed
    pub peak_depth: usize,
    /// Times a producer had to wait for space
    pub producer_waits: u64,
    /// Times a consumer had to wait for an item
    pub consumer_waits: u64,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    stats: QueueStats,
}

/// Bounded, blocking, closable FIFO queue
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    changed: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                stats: QueueStats::default(),
            }),
            changed: Condvar::new(),
            capacity,
        })
    }

    /// Append an item, blocking while the queue is full
    ///
    /// Fails (handing the item back) if the queue is closed, including when it
    /// is closed while this call is waiting for space.
    pub fn enqueue(&self, item: T) -> Result<(), ClosedQueueError<T>> {
        let mut state = self.state.lock();
        let mut waited = false;
        while !state.closed && state.items.len() >= self.capacity {
            if !waited {
                state.stats.producer_waits += 1;
                waited = true;
            }
            self.changed.wait(&mut state);
        }
        if state.closed {
            return Err(ClosedQueueError(item));
        }

        state.items.push_back(item);
        state.stats.enqueued += 1;
        let depth = state.items.len();
        if depth > state.stats.peak_depth {
            state.stats.peak_depth = depth;
        }
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    /// Remove and return the oldest item, blocking while the queue is empty
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        let mut waited = false;
        while state.items.is_empty() && !state.closed {
            if !waited {
                state.stats.consumer_waits += 1;
                waited = true;
            }
            self.changed.wait(&mut state);
        }

        let item = state.items.pop_front()?;
        state.stats.dequeued += 1;
        drop(state);

        self.changed.notify_all();
        Some(item)
    }

    /// Signal that no further items will be enqueued (idempotent)
    ///
    /// Items already buffered remain available to `dequeue`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);

        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }
}
