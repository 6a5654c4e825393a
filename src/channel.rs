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

//! Channels integrated with suspension.
//!
//! Two variants. `RingChannel` is bounded by a power-of-two lock-free MPMC
//! ring; its awaitables never suspend, they succeed or fail on the spot.
//! `Channel` is an unbuffered rendezvous: senders and receivers pair up
//! FIFO per direction under one mutex, and every resumption happens after
//! the lock is released. Closing either variant resumes all waiters with a
//! failure; after `close` returns, no further waiter can enqueue.
//!
//! Operator sugar mirrors stream notation: `(&ch << value).await` sends,
//! `(&ch >> &mut slot).await` receives into `slot`, both yielding `bool`.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::future::Future;
use std::mem::MaybeUninit;
use std::ops::{Shl, Shr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as PollContext, Poll, Waker};

use crate::runtime::ring::CachePadded;

#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Closed(T),
}

#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

// ---------------------------------------------------------------- bounded

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free MPMC ring: one sequence counter per slot decides
/// whether the slot is free for the producer or holds a value for the
/// consumer of that lap.
struct MpmcRing<T> {
    mask: usize,
    buffer: Box<[Slot<T>]>,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for MpmcRing<T> {}
unsafe impl<T: Send> Sync for MpmcRing<T> {}

impl<T> MpmcRing<T> {
    fn new(capacity: usize) -> MpmcRing<T> {
        assert!(capacity > 0, "capacity should be larger than zero");
        assert!(
            capacity & (capacity - 1) == 0,
            "capacity should be power of 2"
        );
        let buffer = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        MpmcRing {
            mask: capacity - 1,
            buffer,
            enqueue_pos: CachePadded(AtomicUsize::new(0)),
            dequeue_pos: CachePadded(AtomicUsize::new(0)),
        }
    }

    fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;
            if diff == 0 {
                match self.enqueue_pos.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence
                            .store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;
            if diff == 0 {
                match self.dequeue_pos.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).as_ptr().read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    fn reset(&self) {
        while self.try_pop().is_some() {}
    }
}

impl<T> Drop for MpmcRing<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Bounded channel over a power-of-two MPMC ring. Send and receive never
/// suspend: they succeed or fail based on ring state alone.
pub struct RingChannel<T: Send> {
    ring: MpmcRing<T>,
    active: AtomicBool,
}

impl<T: Send> RingChannel<T> {
    pub fn new(capacity: usize) -> RingChannel<T> {
        RingChannel {
            ring: MpmcRing::new(capacity),
            active: AtomicBool::new(true),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Reopen a closed channel.
    pub fn launch(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Close and drain. Returns `false` when already closed.
    pub fn close(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            self.ring.reset();
            true
        } else {
            false
        }
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        if !self.active() {
            return Err(TrySendError::Closed(value));
        }
        self.ring.try_push(value).map_err(TrySendError::Full)
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        if !self.active() {
            return Err(TryRecvError::Closed);
        }
        self.ring.try_pop().ok_or(TryRecvError::Empty)
    }

    /// Awaitable send; resolves immediately with `true` on success.
    pub fn send(&self, value: T) -> RingSend<T> {
        RingSend {
            channel: self,
            value: Some(value),
        }
    }

    /// Awaitable receive; resolves immediately.
    pub fn recv(&self) -> RingRecv<T> {
        RingRecv { channel: self }
    }
}

pub struct RingSend<'a, T: Send> {
    channel: &'a RingChannel<T>,
    value: Option<T>,
}

impl<'a, T: Send> Future for RingSend<'a, T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<bool> {
        // not self-referential: never relies on pinning guarantees
        let this = unsafe { self.get_unchecked_mut() };
        match this.value.take() {
            Some(value) => Poll::Ready(this.channel.try_send(value).is_ok()),
            None => Poll::Ready(false),
        }
    }
}

pub struct RingRecv<'a, T: Send> {
    channel: &'a RingChannel<T>,
}

impl<'a, T: Send> Future for RingRecv<'a, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<Option<T>> {
        Poll::Ready(self.channel.try_recv().ok())
    }
}

pub struct RingRecvInto<'a, T: Send> {
    channel: &'a RingChannel<T>,
    dest: &'a mut T,
}

impl<'a, T: Send> Future for RingRecvInto<'a, T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<bool> {
        let this = self.get_mut();
        match this.channel.try_recv() {
            Ok(value) => {
                *this.dest = value;
                Poll::Ready(true)
            }
            Err(_) => Poll::Ready(false),
        }
    }
}

impl<'a, T: Send> Shl<T> for &'a RingChannel<T> {
    type Output = RingSend<'a, T>;

    fn shl(self, value: T) -> RingSend<'a, T> {
        self.send(value)
    }
}

impl<'a, T: Send> Shr<&'a mut T> for &'a RingChannel<T> {
    type Output = RingRecvInto<'a, T>;

    fn shr(self, dest: &'a mut T) -> RingRecvInto<'a, T> {
        RingRecvInto {
            channel: self,
            dest,
        }
    }
}

// ------------------------------------------------------------- rendezvous

const OP_WAITING: u8 = 0;
const OP_PAIRED: u8 = 1;
const OP_CLOSED: u8 = 2;

struct SendOp<T> {
    state: AtomicU8,
    value: Mutex<Option<T>>,
    waker: Mutex<Option<Waker>>,
}

struct RecvOp<T> {
    state: AtomicU8,
    value: Mutex<Option<T>>,
    waker: Mutex<Option<Waker>>,
}

struct Waiting<T> {
    senders: VecDeque<Arc<SendOp<T>>>,
    receivers: VecDeque<Arc<RecvOp<T>>>,
}

/// Unbuffered rendezvous channel: a send completes exactly when a receive
/// pairs with it, FIFO per direction.
pub struct Channel<T: Send> {
    active: AtomicBool,
    waiting: Mutex<Waiting<T>>,
}

impl<T: Send> Channel<T> {
    pub fn new() -> Channel<T> {
        Channel {
            active: AtomicBool::new(true),
            waiting: Mutex::new(Waiting {
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
            }),
        }
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn launch(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Close the channel and resume every queued waiter with a failure.
    /// The queues are swapped out under the lock; the resumptions happen
    /// off-lock. After this returns no waiter can enqueue.
    pub fn close(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let (senders, receivers) = {
            let mut waiting = self.waiting.lock().unwrap();
            (
                std::mem::take(&mut waiting.senders),
                std::mem::take(&mut waiting.receivers),
            )
        };
        for sender in senders {
            sender.state.store(OP_CLOSED, Ordering::Release);
            if let Some(waker) = sender.waker.lock().unwrap().take() {
                waker.wake();
            }
        }
        for receiver in receivers {
            receiver.state.store(OP_CLOSED, Ordering::Release);
            if let Some(waker) = receiver.waker.lock().unwrap().take() {
                waker.wake();
            }
        }
        true
    }

    /// Awaitable send: suspends until a receiver pairs with it. Resolves
    /// `false` when the channel closes first.
    pub fn send(&self, value: T) -> ChanSend<T> {
        ChanSend {
            channel: self,
            state: SendState::Start(value),
        }
    }

    /// Awaitable receive: suspends until a sender pairs with it. Resolves
    /// `None` when the channel closes first.
    pub fn recv(&self) -> ChanRecv<T> {
        ChanRecv {
            channel: self,
            state: RecvState::Start,
        }
    }
}

impl<T: Send> Default for Channel<T> {
    fn default() -> Channel<T> {
        Channel::new()
    }
}

impl<T: Send> Drop for Channel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

enum SendState<T> {
    Start(T),
    Waiting(Arc<SendOp<T>>),
    Done,
}

pub struct ChanSend<'a, T: Send> {
    channel: &'a Channel<T>,
    state: SendState<T>,
}

impl<'a, T: Send> Future for ChanSend<'a, T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<bool> {
        // not self-referential: never relies on pinning guarantees
        let this = unsafe { self.get_unchecked_mut() };
        match std::mem::replace(&mut this.state, SendState::Done) {
            SendState::Start(value) => {
                let mut waiting = this.channel.waiting.lock().unwrap();
                // the active check belongs under the lock: close() swaps the
                // queues out behind it, so we either see inactive here or
                // close() sees us in the queue
                if !this.channel.active.load(Ordering::Acquire) {
                    return Poll::Ready(false);
                }
                if let Some(receiver) = waiting.receivers.pop_front() {
                    *receiver.value.lock().unwrap() = Some(value);
                    receiver.state.store(OP_PAIRED, Ordering::Release);
                    let waker = receiver.waker.lock().unwrap().take();
                    drop(waiting);
                    // resume the paired reader after releasing the lock
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                    Poll::Ready(true)
                } else {
                    let op = Arc::new(SendOp {
                        state: AtomicU8::new(OP_WAITING),
                        value: Mutex::new(Some(value)),
                        waker: Mutex::new(Some(cx.waker().clone())),
                    });
                    waiting.senders.push_back(op.clone());
                    drop(waiting);
                    this.state = SendState::Waiting(op);
                    Poll::Pending
                }
            }
            SendState::Waiting(op) => match op.state.load(Ordering::Acquire) {
                OP_PAIRED => Poll::Ready(true),
                OP_CLOSED => Poll::Ready(false),
                _ => {
                    *op.waker.lock().unwrap() = Some(cx.waker().clone());
                    let state = op.state.load(Ordering::Acquire);
                    this.state = SendState::Waiting(op);
                    match state {
                        OP_PAIRED => Poll::Ready(true),
                        OP_CLOSED => Poll::Ready(false),
                        _ => Poll::Pending,
                    }
                }
            },
            SendState::Done => Poll::Ready(false),
        }
    }
}

enum RecvState<T> {
    Start,
    Waiting(Arc<RecvOp<T>>),
    Done,
}

pub struct ChanRecv<'a, T: Send> {
    channel: &'a Channel<T>,
    state: RecvState<T>,
}

impl<'a, T: Send> Future for ChanRecv<'a, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<Option<T>> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, RecvState::Done) {
            RecvState::Start => {
                let mut waiting = this.channel.waiting.lock().unwrap();
                if !this.channel.active.load(Ordering::Acquire) {
                    return Poll::Ready(None);
                }
                if let Some(sender) = waiting.senders.pop_front() {
                    let value = sender.value.lock().unwrap().take();
                    sender.state.store(OP_PAIRED, Ordering::Release);
                    let waker = sender.waker.lock().unwrap().take();
                    drop(waiting);
                    // resume the paired writer after releasing the lock
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                    Poll::Ready(value)
                } else {
                    let op = Arc::new(RecvOp {
                        state: AtomicU8::new(OP_WAITING),
                        value: Mutex::new(None),
                        waker: Mutex::new(Some(cx.waker().clone())),
                    });
                    waiting.receivers.push_back(op.clone());
                    drop(waiting);
                    this.state = RecvState::Waiting(op);
                    Poll::Pending
                }
            }
            RecvState::Waiting(op) => match op.state.load(Ordering::Acquire) {
                OP_PAIRED => Poll::Ready(op.value.lock().unwrap().take()),
                OP_CLOSED => Poll::Ready(None),
                _ => {
                    *op.waker.lock().unwrap() = Some(cx.waker().clone());
                    let state = op.state.load(Ordering::Acquire);
                    this.state = RecvState::Waiting(op.clone());
                    match state {
                        OP_PAIRED => Poll::Ready(op.value.lock().unwrap().take()),
                        OP_CLOSED => Poll::Ready(None),
                        _ => Poll::Pending,
                    }
                }
            },
            RecvState::Done => Poll::Ready(None),
        }
    }
}

pub struct ChanRecvInto<'a, T: Send> {
    recv: ChanRecv<'a, T>,
    dest: &'a mut T,
}

impl<'a, T: Send> Future for ChanRecvInto<'a, T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<bool> {
        let this = self.get_mut();
        match Pin::new(&mut this.recv).poll(cx) {
            Poll::Ready(Some(value)) => {
                *this.dest = value;
                Poll::Ready(true)
            }
            Poll::Ready(None) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<'a, T: Send> Shl<T> for &'a Channel<T> {
    type Output = ChanSend<'a, T>;

    fn shl(self, value: T) -> ChanSend<'a, T> {
        self.send(value)
    }
}

impl<'a, T: Send> Shr<&'a mut T> for &'a Channel<T> {
    type Output = ChanRecvInto<'a, T>;

    fn shr(self, dest: &'a mut T) -> ChanRecvInto<'a, T> {
        ChanRecvInto {
            recv: self.recv(),
            dest,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_ring_try_ops() {
        let channel = RingChannel::new(2);
        assert_eq!(channel.try_send(1), Ok(()));
        assert_eq!(channel.try_send(2), Ok(()));
        assert_eq!(channel.try_send(3), Err(TrySendError::Full(3)));

        assert_eq!(channel.try_recv(), Ok(1));
        assert_eq!(channel.try_recv(), Ok(2));
        assert_eq!(channel.try_recv(), Err(TryRecvError::Empty));

        assert!(channel.close());
        assert_eq!(channel.try_send(4), Err(TrySendError::Closed(4)));
        assert_eq!(channel.try_recv(), Err(TryRecvError::Closed));
        assert!(channel.launch());
        assert_eq!(channel.try_send(5), Ok(()));
    }

    #[test]
    fn test_ring_mpmc_stress() {
        let channel = Arc::new(RingChannel::new(16));
        let producers = (0..4)
            .map(|p| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        let mut value = p * 10_000 + i;
                        loop {
                            match channel.try_send(value) {
                                Ok(()) => break,
                                Err(TrySendError::Full(v)) => {
                                    value = v;
                                    thread::yield_now();
                                }
                                Err(TrySendError::Closed(_)) => panic!("closed early"),
                            }
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        let consumers = (0..4)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    let mut sum = 0u64;
                    let mut count = 0usize;
                    while count < 1000 {
                        if let Ok(value) = channel.try_recv() {
                            sum += value;
                            count += 1;
                        } else {
                            thread::yield_now();
                        }
                    }
                    sum
                })
            })
            .collect::<Vec<_>>();

        for p in producers {
            p.join().unwrap();
        }
        let total: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        let expected: u64 = (0..4u64)
            .map(|p| (0..1000u64).map(|i| p * 10_000 + i).sum::<u64>())
            .sum();
        assert_eq!(total, expected);
    }
}
