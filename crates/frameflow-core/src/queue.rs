//! Blocking FIFO connecting pipeline stages.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::frame::Frame;

/// Queue of frames flowing between pipeline stages.
pub type FrameQueue = BlockingQueue<Frame>;

/// Result of a push attempt. `Full` and `Closed` hand the value back so the
/// caller can retry, block, or release it.
#[must_use]
#[derive(Debug)]
pub enum PushOutcome<T> {
    /// Value accepted.
    Ok,
    /// Bounded queue at capacity.
    Full(T),
    /// Queue closed to further pushes.
    Closed(T),
}

impl<T> PushOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, PushOutcome::Ok)
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// MPMC blocking queue with optional capacity and a shutdown notification.
///
/// Ownership of enqueued values transfers to the queue and then to the
/// popper. [`close`](BlockingQueue::close) wakes every waiter so blocked
/// producers and consumers return during shutdown; remaining items can still
/// be drained after the close.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> BlockingQueue<T> {
    /// Queue that reports [`PushOutcome::Full`] once `capacity` items are
    /// waiting.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    /// Queue without a capacity limit; `push` never reports `Full`.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue without blocking.
    pub fn push(&self, value: T) -> PushOutcome<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed(value);
        }
        if let Some(capacity) = self.capacity {
            if inner.items.len() >= capacity {
                return PushOutcome::Full(value);
            }
        }
        inner.items.push_back(value);
        drop(inner);
        self.not_empty.notify_one();
        PushOutcome::Ok
    }

    /// Enqueue, blocking until space is available or the queue is closed.
    pub fn push_wait(&self, value: T) -> PushOutcome<T> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return PushOutcome::Closed(value);
            }
            match self.capacity {
                Some(capacity) if inner.items.len() >= capacity => {
                    self.not_full.wait(&mut inner);
                }
                _ => break,
            }
        }
        inner.items.push_back(value);
        drop(inner);
        self.not_empty.notify_one();
        PushOutcome::Ok
    }

    /// Dequeue, blocking until an item arrives. Returns `None` only once the
    /// queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(value);
            }
            if inner.closed {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Dequeue without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let value = inner.items.pop_front();
        drop(inner);
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    /// Wait up to `timeout` for an item to become available. Returns whether
    /// the queue is non-empty; a popping race with another consumer is still
    /// possible afterwards.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if !inner.items.is_empty() {
            return true;
        }
        if inner.closed {
            return false;
        }
        self.not_empty.wait_for(&mut inner, timeout);
        !inner.items.is_empty()
    }

    /// Read the front item in place, without dequeuing it.
    pub fn front<R>(&self, read: impl FnOnce(&T) -> R) -> Option<R> {
        let inner = self.inner.lock();
        inner.items.front().map(read)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
