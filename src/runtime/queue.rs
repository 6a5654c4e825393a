// The MIT License (MIT)

// Copyright (c) 2025 braid developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Unbounded MPMC queue backing the global submission queue of the pool.
//!
//! A growable ring under a mutex and a condition variable. `size_approx` is
//! an atomic counter kept beside the lock; it is approximate because readers
//! may race with concurrent enqueues and dequeues.
//!
//! Closing the queue is the shutdown signal: blocked consumers wake, drain
//! whatever is left, and interpret closed-and-empty as "stop".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct UnboundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    size: AtomicUsize,
    closed: AtomicBool,
}

impl<T> UnboundedQueue<T> {
    pub fn new() -> UnboundedQueue<T> {
        UnboundedQueue::with_capacity(32)
    }

    pub fn with_capacity(capacity: usize) -> UnboundedQueue<T> {
        UnboundedQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn size_approx(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wake-one on enqueue. Returns `false` (dropping the value) once the
    /// queue has been closed.
    pub fn enqueue(&self, value: T) -> bool {
        let mut queue = self.inner.lock().unwrap();
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        queue.push_back(value);
        self.size.fetch_add(1, Ordering::Release);
        self.not_empty.notify_one();
        true
    }

    pub fn try_dequeue(&self) -> Option<T> {
        if self.size_approx() == 0 {
            return None;
        }
        let mut queue = self.inner.lock().unwrap();
        let value = queue.pop_front();
        if value.is_some() {
            self.size.fetch_sub(1, Ordering::Release);
        }
        value
    }

    fn drain_locked(&self, queue: &mut VecDeque<T>, out: &mut Vec<T>, max: usize) -> usize {
        let mut count = 0;
        while count < max {
            match queue.pop_front() {
                Some(value) => {
                    out.push(value);
                    count += 1;
                }
                None => break,
            }
        }
        if count > 0 {
            self.size.fetch_sub(count, Ordering::Release);
            if !queue.is_empty() {
                // more work left for another consumer
                self.not_empty.notify_one();
            }
        }
        count
    }

    /// Non-blocking bulk dequeue of up to `max` elements into `out`.
    pub fn try_dequeue_bulk(&self, out: &mut Vec<T>, max: usize) -> usize {
        if max == 0 || self.size_approx() == 0 {
            return 0;
        }
        let mut queue = self.inner.lock().unwrap();
        self.drain_locked(&mut queue, out, max)
    }

    /// Blocks until at least one element is available or the queue is closed.
    /// Returns 0 only when closed and drained.
    pub fn wait_dequeue_bulk(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut queue = self.inner.lock().unwrap();
        loop {
            if !queue.is_empty() {
                return self.drain_locked(&mut queue, out, max);
            }
            if self.closed.load(Ordering::Relaxed) {
                return 0;
            }
            queue = self.not_empty.wait(queue).unwrap();
        }
    }

    /// As `wait_dequeue_bulk` but gives up after `timeout`. Returns 0 on
    /// timeout as well as on closed-and-drained.
    pub fn wait_dequeue_bulk_timed(&self, out: &mut Vec<T>, max: usize, timeout: Duration) -> usize {
        let queue = self.inner.lock().unwrap();
        let (mut queue, wait_result) = self
            .not_empty
            .wait_timeout_while(queue, timeout, |queue| {
                queue.is_empty() && !self.closed.load(Ordering::Relaxed)
            })
            .unwrap();
        if wait_result.timed_out() && queue.is_empty() {
            return 0;
        }
        self.drain_locked(&mut queue, out, max)
    }

    /// Blocking single-element dequeue; `None` only when closed and drained.
    pub fn wait_dequeue(&self) -> Option<T> {
        let mut queue = self.inner.lock().unwrap();
        loop {
            if let Some(value) = queue.pop_front() {
                self.size.fetch_sub(1, Ordering::Release);
                if !queue.is_empty() {
                    self.not_empty.notify_one();
                }
                return Some(value);
            }
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            queue = self.not_empty.wait(queue).unwrap();
        }
    }

    /// Wake-all shutdown signal. Elements already queued stay drainable.
    pub fn close(&self) {
        let _queue = self.inner.lock().unwrap();
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }
}

impl<T> Default for UnboundedQueue<T> {
    fn default() -> UnboundedQueue<T> {
        UnboundedQueue::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_bulk_roundtrip() {
        let queue = UnboundedQueue::new();
        for i in 0..10 {
            assert!(queue.enqueue(i));
        }
        assert_eq!(queue.size_approx(), 10);

        let mut out = Vec::new();
        assert_eq!(queue.try_dequeue_bulk(&mut out, 4), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        out.clear();
        assert_eq!(queue.try_dequeue_bulk(&mut out, 100), 6);
        assert_eq!(queue.size_approx(), 0);
        assert_eq!(queue.try_dequeue_bulk(&mut out, 1), 0);
    }

    #[test]
    fn test_wait_wakes_on_enqueue() {
        let queue = Arc::new(UnboundedQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut out = Vec::new();
                queue.wait_dequeue_bulk(&mut out, 8);
                out
            })
        };
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(7usize);
        assert_eq!(consumer.join().unwrap(), vec![7]);
    }

    #[test]
    fn test_close_unblocks_consumers() {
        let queue: Arc<UnboundedQueue<usize>> = Arc::new(UnboundedQueue::new());
        let consumers = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut out = Vec::new();
                    queue.wait_dequeue_bulk(&mut out, 8)
                })
            })
            .collect::<Vec<_>>();
        thread::sleep(Duration::from_millis(20));
        queue.close();
        for c in consumers {
            assert_eq!(c.join().unwrap(), 0);
        }
        assert!(!queue.enqueue(1));
    }

    #[test]
    fn test_timed_wait_times_out() {
        let queue: UnboundedQueue<usize> = UnboundedQueue::new();
        let mut out = Vec::new();
        let n = queue.wait_dequeue_bulk_timed(&mut out, 8, Duration::from_millis(10));
        assert_eq!(n, 0);
    }
}
