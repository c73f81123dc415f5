//! Blocking FIFO channel
//!
//! A pipe is the only resource shared between tasks: an unbounded,
//! order-preserving integer queue with a blocking dequeue. One end is held by
//! a machine, the other by a second machine or an external driver; both ends
//! hold the pipe behind an `Arc`, so it lives as long as its longest-lived
//! endpoint.
//!
//! Internally it pairs a queue with a zero-permit semaphore: `enqueue` adds a
//! permit per value, `dequeue` takes one before popping. The semaphore's
//! queued acquires are served in FIFO order, which is what gives waiting
//! consumers longest-waiter-first wakeup.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Semaphore;

/// Unbounded, order-preserving, blocking integer queue.
#[derive(Debug)]
pub struct Pipe {
    queue: Mutex<VecDeque<i64>>,
    available: Semaphore,
}

impl Pipe {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    /// Append a value to the tail and wake one waiting consumer.
    /// Never blocks; the queue is unbounded.
    pub fn enqueue(&self, value: i64) {
        self.queue.lock().expect("pipe lock poisoned").push_back(value);
        self.available.add_permits(1);
    }

    /// Remove and return the head, suspending while the queue is empty.
    ///
    /// Cancel-safe: a waiter that is dropped before acquiring its permit
    /// consumes neither a signal nor a value.
    pub async fn dequeue(&self) -> i64 {
        let permit = self
            .available
            .acquire()
            .await
            .expect("pipe semaphore closed");
        permit.forget();
        self.queue
            .lock()
            .expect("pipe lock poisoned")
            .pop_front()
            .expect("pipe signalled with an empty queue")
    }

    /// Head of the queue without removing it.
    ///
    /// Callers must already know data is present (e.g. the producer side has
    /// finished); `None` means that precondition was violated.
    pub fn peek(&self) -> Option<i64> {
        self.queue.lock().expect("pipe lock poisoned").front().copied()
    }

    /// Empty the queue and reset pending wakeup signals so the pipe can be
    /// reused for a fresh scenario. Must not race an in-flight run; rewiring
    /// and clearing happen only between runs.
    pub fn clear(&self) {
        self.queue.lock().expect("pipe lock poisoned").clear();
        while let Ok(permit) = self.available.try_acquire() {
            permit.forget();
        }
    }

    /// Remove and return everything queued, in order. Same precondition as
    /// `peek`: only valid once the producer side is done.
    pub fn drain(&self) -> Vec<i64> {
        let drained: Vec<i64> = self
            .queue
            .lock()
            .expect("pipe lock poisoned")
            .drain(..)
            .collect();
        for _ in &drained {
            if let Ok(permit) = self.available.try_acquire() {
                permit.forget();
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("pipe lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}
