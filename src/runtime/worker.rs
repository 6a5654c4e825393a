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

//! Work-stealing worker of the thread pool.
//!
//! Each worker owns one local Chase-Lev deque and loops over: bulk-pull from
//! the global queue, drain the local deque LIFO, steal from a random peer,
//! yield while work is visible anywhere, and finally block on the global
//! queue. Local LIFO is intentional: recently enqueued continuations are the
//! ones whose state is still warm in cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Builder, JoinHandle};

use log::trace;
use rand::Rng;

use super::pool::{Mode, PoolShared};
use super::ring::WorkStealDeque;
use crate::promise::Handle;

/// Failed steal rounds before the worker considers parking.
pub(crate) const TRY_STEAL_SPIN: usize = 32;

/// Capacity of each worker's local deque.
pub(crate) const LOCAL_QUEUE_CAPACITY: usize = 64;

pub(crate) struct WorkstealThread {
    deque: WorkStealDeque<Handle>,
    active: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkstealThread {
    pub fn new() -> Arc<WorkstealThread> {
        Arc::new(WorkstealThread {
            deque: WorkStealDeque::new(LOCAL_QUEUE_CAPACITY),
            active: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn local_size_approx(&self) -> usize {
        self.deque.size_approx()
    }

    pub fn try_join(&self) {
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }

    /// Spawn (or respawn, after a cached-mode retirement) the OS thread.
    pub fn enable(self: Arc<WorkstealThread>, pool: &Arc<PoolShared>, index: usize) {
        self.active.store(true, Ordering::Release);
        let me = self.clone();
        let pool = pool.clone();
        let thread = Builder::new()
            .name(format!("braid: worker {}", index))
            .spawn(move || me.work(pool))
            .unwrap();
        *self.thread.lock().unwrap() = Some(thread);
    }

    fn work(&self, pool: Arc<PoolShared>) {
        let mut buffer: Vec<Handle> = Vec::with_capacity(LOCAL_QUEUE_CAPACITY);
        let mut spin = 0usize;

        'outer: while pool.running.load(Ordering::Acquire) {
            // 1. pull a batch off the global queue and drain it LIFO
            let space = self.deque.spare().min(LOCAL_QUEUE_CAPACITY);
            if pool.queue.try_dequeue_bulk(&mut buffer, space) > 0 {
                self.flush_into_local(&mut buffer);
                self.drain_local();
            }

            // 2. steal from peers, randomized scan
            if self.try_steal(&pool) {
                spin = 0;
                continue;
            }
            spin += 1;
            if spin < TRY_STEAL_SPIN {
                continue;
            }

            // 3. work is visible somewhere but races lost it: don't sleep yet
            if pool.queue.size_approx() > 0
                || pool.threads.iter().any(|t| t.local_size_approx() > 0)
            {
                spin = 0;
                thread::yield_now();
                continue;
            }

            // 4. park on the global queue
            spin = 0;
            match pool.mode {
                Mode::Fixed => {
                    let n = pool.queue.wait_dequeue_bulk(&mut buffer, LOCAL_QUEUE_CAPACITY);
                    if n == 0 {
                        // closed and drained
                        break 'outer;
                    }
                    self.flush_into_local(&mut buffer);
                    self.drain_local();
                }
                Mode::Cached => {
                    let n = pool.queue.wait_dequeue_bulk_timed(
                        &mut buffer,
                        LOCAL_QUEUE_CAPACITY,
                        pool.idle_timeout,
                    );
                    if n == 0 {
                        if pool.queue.is_closed() {
                            break 'outer;
                        }
                        if pool.thread_size.load(Ordering::Acquire) > pool.basic_thread_size {
                            pool.thread_size.fetch_sub(1, Ordering::AcqRel);
                            self.active.store(false, Ordering::Release);
                            trace!("worker retired after idle timeout");
                            return;
                        }
                    } else {
                        self.flush_into_local(&mut buffer);
                        self.drain_local();
                    }
                }
            }
        }

        self.active.store(false, Ordering::Release);
    }

    fn flush_into_local(&self, buffer: &mut Vec<Handle>) {
        for handle in buffer.drain(..) {
            if let Err(handle) = self.deque.push_back(handle) {
                // no room left: run it right here rather than requeueing
                handle.resume();
            }
        }
    }

    fn drain_local(&self) {
        while let Some(handle) = self.deque.try_pop_back() {
            handle.resume();
        }
    }

    fn try_steal(&self, pool: &Arc<PoolShared>) -> bool {
        let peers = &pool.threads;
        let count = peers.len();
        if count <= 1 {
            return false;
        }

        let begin = rand::thread_rng().gen::<usize>() % count;
        let mut stolen = false;
        for i in 0..count {
            let peer = &peers[(begin + i) % count];
            if std::ptr::eq(peer.as_ref(), self) {
                continue;
            }
            if pool.mode == Mode::Cached && !peer.active() {
                continue;
            }
            if let Some(handle) = peer.deque.try_pop_front() {
                handle.resume();
                stolen = true;
            }
        }
        stolen
    }
}
