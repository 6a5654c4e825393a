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

//! The promise: one per computation.
//!
//! Holds the result slot, the frame (the user future, allocated from the
//! environment's memory resource), the stop source, the parent link, the
//! strong child list, the callback list and the final-completion signal.
//!
//! A frame is only ever advanced by `Handle::resume()` from an executor
//! thread. The `polling` flag makes the frame single-poller; `notified`
//! catches wakes that land while a poll is in flight. `schedule()` is the
//! one place the `Suspending -> Running` transition happens, and it always
//! hands the handle to the computation's executor rather than resuming
//! in place.

use std::cell::{RefCell, UnsafeCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context as PollContext, Poll, Wake, Waker};

use crate::environment::Context;
use crate::error::{CancelError, Panicked};
use crate::executor::ExecutorRef;
use crate::resource::{ResourceBox, ResourceHandle};
use crate::result::{ResultSlot, Status};
use crate::scheduler::SchedulerRef;
use crate::stop::{StopRegistration, StopSource, StopToken};

/// A schedulable reference to a suspended computation. What executors carry.
#[derive(Clone)]
pub struct Handle {
    node: Arc<dyn Pollable>,
}

impl Handle {
    pub(crate) fn new(node: Arc<dyn Pollable>) -> Handle {
        Handle { node }
    }

    /// Drive the computation on the calling thread until it suspends again
    /// or terminates.
    pub fn resume(&self) {
        self.node.clone().poll_step();
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Handle")
    }
}

pub(crate) trait Pollable: Send + Sync {
    fn poll_step(self: Arc<Self>);
}

/// Erased child-side operations, what a parent keeps in its children list.
pub(crate) trait ForkNode: Send + Sync {
    /// Block until the computation reaches a terminal state.
    fn wait_final(&self);
    /// Block until every descendant is terminal.
    fn join_forks(&self);
    /// Tear the frame down and destroy the subtree. Requires the node to be
    /// terminal or never started.
    fn destroy(&self);
    fn destroy_forks(&self);
    fn request_stop(&self);
    fn set_parent_link(&self, registration: Option<StopRegistration>);
    fn node_status(&self) -> Status;
}

/// Erased parent-side operation: attach a new child.
pub(crate) trait ForkParent: Send + Sync {
    fn adopt(&self, child: Arc<dyn ForkNode>);
}

/// The typed surface the handles (`Task`, `Fork`, `ForkView`) talk to.
pub(crate) trait TypedNode<T>: ForkNode {
    fn slot(&self) -> &ResultSlot<T>;
    /// Register a completion callback; runs immediately (off any lock) if
    /// the computation is already terminal, exactly once otherwise.
    fn push_callback(&self, callback: Callback<T>);
    fn schedule(self: Arc<Self>);
}

pub(crate) type Callback<T> = Box<dyn FnOnce(&ResultSlot<T>) + Send>;

/// What the non-suspending accessor awaitables read off the running
/// computation through the thread-local below.
pub(crate) trait CurrentPromise: Send + Sync {
    fn make_context(self: Arc<Self>) -> Context;
    fn scheduler(&self) -> SchedulerRef;
    fn resource(&self) -> ResourceHandle;
    fn stop_token(&self) -> StopToken;
    fn register_stop(&self, callback: Box<dyn FnOnce() + Send>) -> StopRegistration;
    /// Forceful self-cancel: terminal transition, stop cascade, callbacks.
    fn cancel_self(&self);
    /// One-shot migration target for the next suspension.
    fn set_migration(&self, executor: ExecutorRef);
    fn join_and_destroy_forks(&self);
}

thread_local! {
    // A stack, not a cell: the noop executor resumes children inline, so a
    // poll can nest inside another poll on the same thread.
    static CURRENT: RefCell<Vec<Arc<dyn CurrentPromise>>> = RefCell::new(Vec::new());
}

pub(crate) fn current() -> Option<Arc<dyn CurrentPromise>> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

struct CurrentGuard;

impl CurrentGuard {
    fn enter(promise: Arc<dyn CurrentPromise>) -> CurrentGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(promise));
        CurrentGuard
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

pub(crate) struct Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    result: ResultSlot<F::Output>,
    callbacks: Mutex<Vec<Callback<F::Output>>>,
    stop: StopSource,
    parent_link: Mutex<Option<StopRegistration>>,
    children: Mutex<Vec<Arc<dyn ForkNode>>>,
    final_flag: Mutex<bool>,
    final_cv: Condvar,
    executor: ExecutorRef,
    scheduler: SchedulerRef,
    resource: ResourceHandle,
    owned: bool,
    polling: AtomicBool,
    notified: AtomicBool,
    migrate: Mutex<Option<ExecutorRef>>,
    // Guarded by `polling`; the boxed frame never moves once polled.
    frame: UnsafeCell<Option<ResourceBox<F>>>,
}

unsafe impl<F> Send for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
}

unsafe impl<F> Sync for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
}

/// Create a promise, link it under `parent` if attached, and perform the
/// initial dispatch onto its executor.
pub(crate) fn spawn_raw<F>(
    resource: ResourceHandle,
    scheduler: SchedulerRef,
    executor: ExecutorRef,
    owned: bool,
    parent: Option<&Arc<dyn ForkParent>>,
    body: F,
) -> Arc<Promise<F>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let frame = ResourceBox::new_in(body, &resource);
    let promise = Arc::new(Promise {
        result: ResultSlot::new(),
        callbacks: Mutex::new(Vec::new()),
        stop: StopSource::new(),
        parent_link: Mutex::new(None),
        children: Mutex::new(Vec::new()),
        final_flag: Mutex::new(false),
        final_cv: Condvar::new(),
        executor,
        scheduler,
        resource,
        owned,
        polling: AtomicBool::new(false),
        notified: AtomicBool::new(false),
        migrate: Mutex::new(None),
        frame: UnsafeCell::new(Some(frame)),
    });

    if let Some(parent) = parent {
        parent.adopt(promise.clone() as Arc<dyn ForkNode>);
    }

    // initial dispatch
    promise.executor.execute(Handle::new(promise.clone()));
    promise
}

impl<F> Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn final_release(&self) {
        let mut done = self.final_flag.lock().unwrap();
        if !*done {
            *done = true;
            self.final_cv.notify_all();
        }
    }

    fn final_wait(&self) {
        let mut done = self.final_flag.lock().unwrap();
        while !*done {
            done = self.final_cv.wait(done).unwrap();
        }
    }

    fn invoke_callbacks(&self) {
        let callbacks = {
            let mut guard = self.callbacks.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for callback in callbacks {
            callback(&self.result);
        }
    }

    // Caller must hold the `polling` flag (or know no poller can exist).
    fn take_frame(&self) {
        let frame = unsafe { (*self.frame.get()).take() };
        if let Some(frame) = frame {
            // frame destructors must not take down the worker
            let _ = panic::catch_unwind(AssertUnwindSafe(move || drop(frame)));
        }
    }

    /// CAS `Suspending -> Running` and dispatch through the executor. Loses
    /// gracefully against concurrent wakes and terminal transitions.
    pub(crate) fn schedule_this(this: &Arc<Self>) {
        loop {
            if this
                .result
                .status_cas(Status::Suspending, Status::Running)
                .is_ok()
            {
                this.executor.execute(Handle::new(this.clone()));
                return;
            }
            match this.result.status() {
                Status::Running => {
                    // the frame is mid-poll; leave a note for the poller
                    this.notified.store(true, Ordering::SeqCst);
                    if this.result.status() != Status::Suspending {
                        return;
                    }
                    // the poll finished in between; retry the CAS
                }
                _ => return,
            }
        }
    }
}

impl<F> Wake for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn wake(self: Arc<Self>) {
        Promise::schedule_this(&self);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Promise::schedule_this(self);
    }
}

impl<F> Pollable for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn poll_step(self: Arc<Self>) {
        if self.polling.swap(true, Ordering::Acquire) {
            // another thread is driving the frame; it will see this wake
            self.notified.store(true, Ordering::SeqCst);
            return;
        }

        loop {
            if self.result.status().is_terminal() {
                break;
            }
            self.result.store_status(Status::Running);

            let waker = Waker::from(self.clone());
            let mut cx = PollContext::from_waker(&waker);
            let current = CurrentGuard::enter(self.clone());

            let poll = {
                let frame = unsafe { &mut *self.frame.get() };
                match frame.as_mut() {
                    Some(body) => {
                        let pinned = unsafe { Pin::new_unchecked(body.as_mut()) };
                        panic::catch_unwind(AssertUnwindSafe(|| pinned.poll(&mut cx)))
                    }
                    None => break,
                }
            };
            drop(current);

            match poll {
                Ok(Poll::Ready(value)) => {
                    self.take_frame();
                    if !self.result.status().is_terminal() {
                        self.result.emplace_value(value);
                        self.invoke_callbacks();
                    }
                    self.final_release();
                    break;
                }
                Ok(Poll::Pending) => {
                    if self.result.status() == Status::Cancelled {
                        // forceful self-cancel: the frame never resumes
                        self.take_frame();
                        self.final_release();
                        break;
                    }
                    if let Some(target) = self.migrate.lock().unwrap().take() {
                        self.result.store_status(Status::Suspending);
                        if self
                            .result
                            .status_cas(Status::Suspending, Status::Running)
                            .is_ok()
                        {
                            target.execute(Handle::new(self.clone()));
                        }
                        break;
                    }
                    self.result.store_status(Status::Suspending);
                    if self.notified.swap(false, Ordering::SeqCst)
                        && self
                            .result
                            .status_cas(Status::Suspending, Status::Running)
                            .is_ok()
                    {
                        // a wake landed while we were polling
                        continue;
                    }
                    break;
                }
                Err(payload) => {
                    self.take_frame();
                    if !self.result.status().is_terminal() {
                        self.result
                            .emplace_error(Panicked::from_payload(payload.as_ref()));
                        self.invoke_callbacks();
                    }
                    self.final_release();
                    break;
                }
            }
        }

        self.polling.store(false, Ordering::Release);
        if self.notified.swap(false, Ordering::SeqCst) {
            Promise::schedule_this(&self);
        }
    }
}

impl<F> ForkNode for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn wait_final(&self) {
        self.final_wait();
    }

    fn join_forks(&self) {
        let children: Vec<_> = self.children.lock().unwrap().clone();
        for child in children {
            child.wait_final();
            child.join_forks();
        }
    }

    fn destroy(&self) {
        // frames of computations that never got to run still need teardown
        if !self.polling.swap(true, Ordering::Acquire) {
            self.take_frame();
            self.polling.store(false, Ordering::Release);
        }
        self.destroy_forks();
    }

    fn destroy_forks(&self) {
        let children = {
            let mut guard = self.children.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for child in children {
            child.destroy();
        }
    }

    fn request_stop(&self) {
        self.stop.request_stop();
    }

    fn set_parent_link(&self, registration: Option<StopRegistration>) {
        *self.parent_link.lock().unwrap() = registration;
    }

    fn node_status(&self) -> Status {
        self.result.status()
    }
}

impl<F> ForkParent for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn adopt(&self, child: Arc<dyn ForkNode>) {
        // parent cancellation cascades into the child, exactly once
        let stop_target = child.clone();
        let registration = self
            .stop
            .register_boxed(Box::new(move || stop_target.request_stop()));
        child.set_parent_link(Some(registration));
        self.children.lock().unwrap().push(child);
    }
}

impl<F> TypedNode<F::Output> for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn slot(&self) -> &ResultSlot<F::Output> {
        &self.result
    }

    fn push_callback(&self, callback: Callback<F::Output>) {
        if self.result.status().is_terminal() {
            callback(&self.result);
            return;
        }
        let mut guard = self.callbacks.lock().unwrap();
        // the terminal transition swaps the list out behind this same lock,
        // so the re-check decides exactly one of the two fates
        if self.result.status().is_terminal() {
            drop(guard);
            callback(&self.result);
        } else {
            guard.push(callback);
        }
    }

    fn schedule(self: Arc<Self>) {
        Promise::schedule_this(&self);
    }
}

impl<F> CurrentPromise for Promise<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn make_context(self: Arc<Self>) -> Context {
        Context {
            resource: self.resource.clone(),
            scheduler: self.scheduler.clone(),
            parent: self as Arc<dyn ForkParent>,
        }
    }

    fn scheduler(&self) -> SchedulerRef {
        self.scheduler.clone()
    }

    fn resource(&self) -> ResourceHandle {
        self.resource.clone()
    }

    fn stop_token(&self) -> StopToken {
        self.stop.token()
    }

    fn register_stop(&self, callback: Box<dyn FnOnce() + Send>) -> StopRegistration {
        self.stop.register_boxed(callback)
    }

    fn cancel_self(&self) {
        if self.result.status().is_terminal() {
            return;
        }
        self.result.emplace_cancel(CancelError::new(self.owned));
        self.stop.request_stop();
        self.invoke_callbacks();
    }

    fn set_migration(&self, executor: ExecutorRef) {
        *self.migrate.lock().unwrap() = Some(executor);
    }

    fn join_and_destroy_forks(&self) {
        self.join_forks();
        self.destroy_forks();
    }
}
