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

//! Work-stealing thread pool.
//!
//! `Fixed` mode keeps `basic_thread_size` workers for the pool's lifetime.
//! `Cached` mode starts at the basic size, grows up to a threshold while the
//! global queue backs up past `32 * active`, and lets workers retire after an
//! idle timeout. Shutdown closes the global queue; every blocked worker wakes,
//! sees closed-and-empty, and exits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace};

use super::queue::UnboundedQueue;
use super::worker::WorkstealThread;
use crate::error::SubmitError;
use crate::promise::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Fixed,
    Cached,
}

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) struct PoolShared {
    pub mode: Mode,
    pub running: AtomicBool,
    pub queue: UnboundedQueue<Handle>,
    pub threads: Vec<Arc<WorkstealThread>>,
    pub thread_size: AtomicUsize,
    pub basic_thread_size: usize,
    pub thread_size_threshold: usize,
    pub idle_timeout: Duration,
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    grow_lock: Mutex<()>,
}

impl ThreadPool {
    pub fn new() -> ThreadPool {
        let cpus = num_cpus::get();
        ThreadPool::with_config(cpus, Mode::Fixed, cpus * 2)
    }

    pub fn with_config(
        basic_thread_size: usize,
        mode: Mode,
        thread_size_threshold: usize,
    ) -> ThreadPool {
        let basic_thread_size = basic_thread_size.max(1);
        let thread_size_threshold = thread_size_threshold.max(basic_thread_size);

        let slots = match mode {
            Mode::Fixed => basic_thread_size,
            Mode::Cached => thread_size_threshold,
        };
        let threads = (0..slots).map(|_| WorkstealThread::new()).collect();

        let shared = Arc::new(PoolShared {
            mode,
            running: AtomicBool::new(true),
            queue: UnboundedQueue::new(),
            threads,
            thread_size: AtomicUsize::new(basic_thread_size),
            basic_thread_size,
            thread_size_threshold,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        });

        for (index, thread) in shared.threads.iter().take(basic_thread_size).enumerate() {
            thread.clone().enable(&shared, index);
        }
        debug!(
            "thread pool started: {} workers, mode {:?}",
            basic_thread_size, mode
        );

        ThreadPool {
            shared,
            grow_lock: Mutex::new(()),
        }
    }

    /// Route a handle to the global queue. In cached mode a backed-up queue
    /// reactivates a retired worker slot.
    pub fn submit(&self, handle: Handle) -> Result<(), SubmitError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown);
        }
        self.shared.queue.enqueue(handle);

        if self.shared.mode == Mode::Cached {
            let active = self.shared.thread_size.load(Ordering::Acquire);
            if active < self.shared.thread_size_threshold
                && self.shared.queue.size_approx() > 32 * active
            {
                self.add_thread(active);
            }
        }
        Ok(())
    }

    fn add_thread(&self, old_size: usize) {
        let _guard = self.grow_lock.lock().unwrap();
        if self.shared.thread_size.load(Ordering::Acquire) != old_size {
            return;
        }
        for (index, thread) in self.shared.threads.iter().enumerate() {
            if !thread.active() {
                thread.try_join();
                thread.clone().enable(&self.shared, index);
                self.shared.thread_size.fetch_add(1, Ordering::AcqRel);
                trace!("pool grew to {} workers", old_size + 1);
                return;
            }
        }
    }

    pub fn shut_down(&self) {
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.queue.close();
            for thread in &self.shared.threads {
                thread.try_join();
            }
            self.shared.thread_size.store(0, Ordering::Release);
            debug!("thread pool stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of active workers.
    pub fn size(&self) -> usize {
        self.shared.thread_size.load(Ordering::Acquire)
    }

    pub fn queue_size_approx(&self) -> usize {
        self.shared.queue.size_approx()
    }
}

impl Default for ThreadPool {
    fn default() -> ThreadPool {
        ThreadPool::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shut_down();
    }
}
