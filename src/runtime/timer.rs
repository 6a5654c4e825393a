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

//! Timer thread: delayed dispatch of zero-argument callables.
//!
//! One background thread sleeps on a condition variable until the earliest
//! deadline in a min-heap, then fires every due callable off-lock. A zero
//! delay runs the callable synchronously on the caller.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

use log::trace;

pub type TimerFn = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline: Instant,
    seq: u64,
    callback: TimerFn,
}

// min-heap over (deadline, seq); seq keeps equal deadlines FIFO
impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<Entry>>,
    not_empty: Condvar,
    running: AtomicBool,
    seq: AtomicU64,
}

pub struct TimerThread {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    pub fn new() -> TimerThread {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            running: AtomicBool::new(true),
            seq: AtomicU64::new(0),
        });

        let worker = shared.clone();
        let thread = Builder::new()
            .name("braid: timer".to_string())
            .spawn(move || TimerThread::run(worker))
            .unwrap();

        trace!("timer thread started");
        TimerThread {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Fire `callback` after `delay`. A zero delay runs it synchronously on
    /// the calling thread.
    pub fn submit(&self, callback: TimerFn, delay: Duration) {
        if delay.is_zero() {
            callback();
            return;
        }
        let entry = Entry {
            deadline: Instant::now() + delay,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            callback,
        };
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push(entry);
        self.shared.not_empty.notify_one();
    }

    fn run(shared: Arc<Shared>) {
        let mut queue = shared.queue.lock().unwrap();
        while shared.running.load(Ordering::Acquire) {
            if queue.is_empty() {
                queue = shared.not_empty.wait(queue).unwrap();
                continue;
            }

            let now = Instant::now();
            if queue.peek().map_or(false, |entry| entry.deadline <= now) {
                let entry = queue.pop().unwrap();
                drop(queue);
                (entry.callback)();
                queue = shared.queue.lock().unwrap();
                continue;
            }

            let next = queue.peek().unwrap().deadline;
            let (guard, _) = shared
                .not_empty
                .wait_timeout(queue, next - now)
                .unwrap();
            queue = guard;
        }
    }

    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.not_empty.notify_all();
            if let Some(thread) = self.thread.lock().unwrap().take() {
                let _ = thread.join();
            }
            trace!("timer thread stopped");
        }
    }
}

impl Default for TimerThread {
    fn default() -> TimerThread {
        TimerThread::new()
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
