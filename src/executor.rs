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

//! The executor set.
//!
//! An executor's whole contract is `execute(handle)`: arrange for the handle
//! to be resumed, eventually, on some thread the executor governs. The
//! runtime never resumes a computation except through one of these.

use std::sync::Arc;
use std::thread::Builder;
use std::time::Duration;

use crate::error::SchedulerError;
use crate::promise::Handle;
use crate::runtime::pool::{Mode, ThreadPool};
use crate::runtime::queue::UnboundedQueue;
use crate::runtime::timer::{TimerFn, TimerThread};

pub type ExecutorRef = Arc<dyn Executor>;

pub trait Executor: Send + Sync + 'static {
    /// Arrange for `handle` to be resumed, eventually, on a thread this
    /// executor governs.
    fn execute(&self, handle: Handle);

    /// Eventually invoke `f`. Default: right here, right now.
    fn execute_fn(&self, f: Box<dyn FnOnce() + Send>) {
        f();
    }
}

/// Resumes synchronously on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl NoopExecutor {
    pub fn new() -> NoopExecutor {
        NoopExecutor
    }
}

impl Executor for NoopExecutor {
    fn execute(&self, handle: Handle) {
        handle.resume();
    }
}

/// One detached OS thread per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NewThreadExecutor;

impl NewThreadExecutor {
    pub fn new() -> NewThreadExecutor {
        NewThreadExecutor
    }
}

impl Executor for NewThreadExecutor {
    fn execute(&self, handle: Handle) {
        self.execute_fn(Box::new(move || handle.resume()));
    }

    fn execute_fn(&self, f: Box<dyn FnOnce() + Send>) {
        Builder::new()
            .name("braid: spawn".to_string())
            .spawn(f)
            .unwrap();
    }
}

/// Routes handles into a work-stealing thread pool.
#[derive(Clone)]
pub struct ThreadPoolExecutor {
    pool: Arc<ThreadPool>,
}

impl ThreadPoolExecutor {
    pub fn new() -> ThreadPoolExecutor {
        ThreadPoolExecutor {
            pool: Arc::new(ThreadPool::new()),
        }
    }

    pub fn with_config(
        basic_thread_size: usize,
        mode: Mode,
        thread_size_threshold: usize,
    ) -> ThreadPoolExecutor {
        ThreadPoolExecutor {
            pool: Arc::new(ThreadPool::with_config(
                basic_thread_size,
                mode,
                thread_size_threshold,
            )),
        }
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

impl Default for ThreadPoolExecutor {
    fn default() -> ThreadPoolExecutor {
        ThreadPoolExecutor::new()
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, handle: Handle) {
        if let Err(err) = self.pool.submit(handle) {
            panic!("{}", err);
        }
    }
}

/// Fires callables after a delay; the sleep awaiter and channel timeouts go
/// through here. Does not govern resumption threads of its own beyond the
/// timer thread itself.
#[derive(Clone)]
pub struct TimerExecutor {
    thread: Arc<TimerThread>,
}

impl TimerExecutor {
    pub fn new() -> TimerExecutor {
        TimerExecutor {
            thread: Arc::new(TimerThread::new()),
        }
    }

    /// Run `f` after `delay`; a zero delay runs it synchronously.
    pub fn execute_after(&self, f: TimerFn, delay: Duration) {
        self.thread.submit(f, delay);
    }
}

impl Default for TimerExecutor {
    fn default() -> TimerExecutor {
        TimerExecutor::new()
    }
}

impl Executor for TimerExecutor {
    fn execute(&self, handle: Handle) {
        // zero-delay semantics
        handle.resume();
    }

    fn execute_fn(&self, f: Box<dyn FnOnce() + Send>) {
        self.thread.submit(f, Duration::ZERO);
    }
}

/// A single dedicated worker thread draining its own queue in FIFO order.
/// Usually addressed as a member of a `WorkerGroup`.
pub struct WorkerExecutor {
    queue: Arc<UnboundedQueue<Handle>>,
    thread: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WorkerExecutor {
    pub fn new(index: usize) -> WorkerExecutor {
        let queue = Arc::new(UnboundedQueue::<Handle>::new());
        let consumer = queue.clone();
        let thread = Builder::new()
            .name(format!("braid: group worker {}", index))
            .spawn(move || loop {
                if let Some(handle) = consumer.try_dequeue() {
                    handle.resume();
                    continue;
                }
                match consumer.wait_dequeue() {
                    Some(handle) => handle.resume(),
                    None => break,
                }
            })
            .unwrap();
        WorkerExecutor {
            queue,
            thread: std::sync::Mutex::new(Some(thread)),
        }
    }

    pub fn shutdown(&self) {
        self.queue.close();
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl Executor for WorkerExecutor {
    fn execute(&self, handle: Handle) {
        self.queue.enqueue(handle);
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A fixed array of worker executors. Users address individual workers by
/// positional index; the group itself is not a scheduling target.
pub struct WorkerGroup {
    workers: Vec<Arc<WorkerExecutor>>,
}

impl WorkerGroup {
    pub fn new(size: usize) -> WorkerGroup {
        assert!(size > 0, "size should be larger than zero");
        WorkerGroup {
            workers: (0..size).map(|i| Arc::new(WorkerExecutor::new(i))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker(&self, pos: usize) -> Result<ExecutorRef, SchedulerError> {
        self.workers
            .get(pos)
            .map(|w| w.clone() as ExecutorRef)
            .ok_or(SchedulerError::ExecutorNotFound("WorkerGroup member"))
    }
}

impl Executor for WorkerGroup {
    fn execute(&self, _handle: Handle) {
        panic!("no worker of the group is specified");
    }
}

/// Executors whose members are addressed by a positional index.
pub trait IndexedExecutor: Executor {
    fn member(&self, pos: usize) -> Option<ExecutorRef>;
}

impl IndexedExecutor for WorkerGroup {
    fn member(&self, pos: usize) -> Option<ExecutorRef> {
        self.workers.get(pos).map(|w| w.clone() as ExecutorRef)
    }
}
