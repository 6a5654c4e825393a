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

//! Work-stealing deque for the local queue of a worker thread.
//!
//! Chase-Lev protocol over a fixed power-of-two ring: the owning worker pushes
//! and pops at the tail, any thief pops at the head. Indices grow without
//! bound and are masked into the ring, so `head <= tail` always holds.

use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::sync::atomic::{fence, AtomicIsize, Ordering};

/// Pads a value out to its own cache line so the head and tail counters do
/// not false-share.
#[repr(align(64))]
pub(crate) struct CachePadded<T>(pub T);

pub struct WorkStealDeque<T> {
    head: CachePadded<AtomicIsize>,
    tail: CachePadded<AtomicIsize>,
    mask: isize,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for WorkStealDeque<T> {}
unsafe impl<T: Send> Sync for WorkStealDeque<T> {}

impl<T> WorkStealDeque<T> {
    pub fn new(capacity: usize) -> WorkStealDeque<T> {
        assert!(capacity > 0, "capacity should be larger than zero");
        assert!(capacity & (capacity - 1) == 0, "capacity should be power of 2");

        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        WorkStealDeque {
            head: CachePadded(AtomicIsize::new(0)),
            tail: CachePadded(AtomicIsize::new(0)),
            mask: capacity as isize - 1,
            buffer,
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Slots currently free for the owner to push into. Approximate from any
    /// other thread, exact from the owner.
    pub fn spare(&self) -> usize {
        self.capacity() - self.size_approx()
    }

    pub fn size_approx(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        if tail > head {
            (tail - head) as usize
        } else {
            0
        }
    }

    #[inline]
    unsafe fn slot_write(&self, index: isize, value: T) {
        (*self.buffer[(index & self.mask) as usize].get()).write(value);
    }

    #[inline]
    unsafe fn slot_read(&self, index: isize) -> T {
        (*self.buffer[(index & self.mask) as usize].get())
            .as_ptr()
            .read()
    }

    /// Owner only. Fails and hands the value back when the ring is full.
    pub fn push_back(&self, value: T) -> Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail - head > self.mask {
            return Err(value);
        }
        unsafe { self.slot_write(tail, value) };
        self.tail.0.store(tail + 1, Ordering::Release);
        Ok(())
    }

    /// Owner only.
    pub fn try_pop_back(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed) - 1;
        self.tail.0.store(tail, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let head = self.head.0.load(Ordering::Relaxed);

        if head > tail {
            // empty; restore
            self.tail.0.store(tail + 1, Ordering::Relaxed);
            return None;
        }

        let value = unsafe { self.slot_read(tail) };
        if head == tail {
            // last element: race against thieves for it with a CAS on head
            let won = self
                .head
                .0
                .compare_exchange(head, head + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.tail.0.store(tail + 1, Ordering::Relaxed);
            if !won {
                // a thief read this slot; it owns the value now
                mem::forget(value);
                return None;
            }
        }
        Some(value)
    }

    /// Thief side. Returns `None` on empty or on a lost race.
    pub fn try_pop_front(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let tail = self.tail.0.load(Ordering::Acquire);

        if head >= tail {
            return None;
        }

        let value = unsafe { self.slot_read(head) };
        if self
            .head
            .0
            .compare_exchange(head, head + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            // the owner or another thief claimed the slot first
            mem::forget(value);
            return None;
        }
        Some(value)
    }
}

impl<T> Drop for WorkStealDeque<T> {
    fn drop(&mut self) {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Relaxed);
        for index in head..tail {
            unsafe {
                drop(self.slot_read(index));
            }
        }
    }
}
