//! The reassembly buffer: a bounded FIFO of bytes bridging the link's
//! message-oriented inbound decoding to the engine's byte-stream `receive`
//! calls. Single producer (channel callback path), single consumer (engine
//! thread); the only state shared between the two paths.

use crate::codec::TransportError;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct ReassemblyBuffer {
    queue: Mutex<VecDeque<u8>>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl ReassemblyBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Appends `bytes` as one contiguous write, blocking while the buffer is
    /// full, up to `timeout`. A write larger than the whole capacity can
    /// never succeed and fails with `NoMemory`; a bounded wait that expires
    /// before space frees up fails with `Timeout`. Nothing is written on
    /// failure.
    pub fn push(&self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        if bytes.len() > self.capacity {
            return Err(TransportError::NoMemory);
        }

        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap();

        while self.capacity - queue.len() < bytes.len() {
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            let (guard, wait) = self
                .writable
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
            if wait.timed_out() && self.capacity - queue.len() < bytes.len() {
                return Err(TransportError::Timeout);
            }
        }

        queue.extend(bytes.iter().copied());
        self.readable.notify_one();
        Ok(())
    }

    /// Pops up to `out.len()` bytes, blocking until at least one byte is
    /// available or `timeout` expires. Returns the number of bytes written
    /// into `out`; 0 on timeout. Bytes left undrained stay queued for the
    /// next call.
    pub fn pop(&self, out: &mut [u8], timeout: Duration) -> usize {
        if out.is_empty() {
            return 0;
        }

        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().unwrap();

        while queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let (guard, wait) = self
                .readable
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
            if wait.timed_out() && queue.is_empty() {
                return 0;
            }
        }

        let count = out.len().min(queue.len());
        for slot in out[..count].iter_mut() {
            *slot = queue.pop_front().unwrap();
        }
        self.writable.notify_one();
        count
    }
}
