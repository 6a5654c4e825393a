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

//! Computation handles.
//!
//! `Task` is the owning flavor: dropping it blocks until every attached
//! descendant has reached a terminal state, then destroys the whole subtree.
//! `Fork` is the attached flavor, created inside a running computation and
//! destroyed by its parent; `ForkView` is a non-owning observer over one.
//!
//! Awaiting a task or fork inside a computation yields its value and
//! rethrows its failure into the awaiting body; the blocking observation
//! APIs (`join`, `get_result`) return `Result` instead.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as PollContext, Poll};

use crate::environment::{Context, Environment};
use crate::error::{JoinError, Panicked};
use crate::executor::{Executor, ExecutorRef, IndexedExecutor};
use crate::promise::{spawn_raw, TypedNode};
use crate::result::{ResultSlot, Status};

fn take_outcome<T>(node: &Arc<dyn TypedNode<T>>) -> T {
    match node.node_status() {
        Status::Completed => match node.slot().take_value() {
            Some(value) => value,
            None => JoinError::Panicked(Panicked::new("result already consumed")).rethrow(),
        },
        _ => match node.slot().error() {
            Some(err) => err.rethrow(),
            None => JoinError::Panicked(Panicked::new("result unavailable")).rethrow(),
        },
    }
}

fn blocking_result<T>(node: &Arc<dyn TypedNode<T>>) -> Result<T, JoinError> {
    node.wait_final();
    match node.node_status() {
        Status::Completed => node
            .slot()
            .take_value()
            .ok_or_else(|| JoinError::Panicked(Panicked::new("result already consumed"))),
        _ => Err(node
            .slot()
            .error()
            .unwrap_or_else(|| JoinError::Panicked(Panicked::new("result unavailable")))),
    }
}

fn blocking_join<T>(node: &Arc<dyn TypedNode<T>>) -> Result<(), JoinError> {
    node.wait_final();
    match node.node_status() {
        // an unobserved failure surfaces here; a cancel does not
        Status::Failed => Err(node
            .slot()
            .error()
            .unwrap_or_else(|| JoinError::Panicked(Panicked::new("result unavailable")))),
        _ => Ok(()),
    }
}

fn push_value_callback<T: Send + 'static>(
    node: &Arc<dyn TypedNode<T>>,
    f: impl FnOnce(&T) + Send + 'static,
) {
    node.push_callback(Box::new(move |slot: &ResultSlot<T>| {
        if slot.status() == Status::Completed {
            slot.with_value(|value| f(value));
        }
    }));
}

fn push_error_callback<T: Send + 'static>(
    node: &Arc<dyn TypedNode<T>>,
    f: impl FnOnce(&Panicked) + Send + 'static,
) {
    node.push_callback(Box::new(move |slot: &ResultSlot<T>| {
        if slot.status() == Status::Failed {
            if let Some(JoinError::Panicked(p)) = slot.error() {
                f(&p);
            }
            slot.mark_handled();
        }
    }));
}

fn push_cancel_callback<T: Send + 'static>(
    node: &Arc<dyn TypedNode<T>>,
    f: impl FnOnce() + Send + 'static,
) {
    node.push_callback(Box::new(move |slot: &ResultSlot<T>| {
        if slot.status() == Status::Cancelled {
            f();
            slot.mark_handled();
        }
    }));
}

/// Owning handle over a root computation.
pub struct Task<T: Send + 'static> {
    pub(crate) node: Arc<dyn TypedNode<T>>,
    awaited: bool,
}

impl<T: Send + 'static> Task<T> {
    /// Block until terminal. Rethrows nothing; reports an unobserved failure
    /// and swallows cancellation.
    pub fn join(&self) -> Result<(), JoinError> {
        blocking_join(&self.node)
    }

    /// Block until terminal and move the value out. Failure and
    /// cancellation both surface as errors.
    pub fn get_result(&self) -> Result<T, JoinError> {
        blocking_result(&self.node)
    }

    pub fn status(&self) -> Status {
        self.node.node_status()
    }

    pub fn done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Manually resume a suspended computation: `Suspending -> Running` CAS,
    /// then dispatch through its executor.
    pub fn resume(&self) {
        self.node.clone().schedule();
    }

    /// Fires at the terminal transition regardless of outcome.
    pub fn then(self, f: impl FnOnce() + Send + 'static) -> Self {
        self.node.push_callback(Box::new(move |_| f()));
        self
    }

    pub fn on_value(self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        push_value_callback(&self.node, f);
        self
    }

    /// Observing the failure advances it to `Handled`; `join` stops
    /// reporting it afterwards.
    pub fn on_error(self, f: impl FnOnce(&Panicked) + Send + 'static) -> Self {
        push_error_callback(&self.node, f);
        self
    }

    pub fn on_cancel(self, f: impl FnOnce() + Send + 'static) -> Self {
        push_cancel_callback(&self.node, f);
        self
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<T> {
        let this = self.get_mut();
        if this.node.node_status().is_terminal() {
            return Poll::Ready(take_outcome(&this.node));
        }
        if !this.awaited {
            this.awaited = true;
            let waker = cx.waker().clone();
            this.node.push_callback(Box::new(move |_| waker.wake()));
        }
        Poll::Pending
    }
}

impl<T: Send + 'static> Drop for Task<T> {
    fn drop(&mut self) {
        // the whole subtree settles before the handle goes away
        self.node.wait_final();
        self.node.join_forks();
        self.node.destroy();
    }
}

/// Attached handle over a child computation. Carries no destructor of its
/// own; the parent's promise owns the child's lifetime.
pub struct Fork<T: Send + 'static> {
    pub(crate) node: Arc<dyn TypedNode<T>>,
    awaited: bool,
}

impl<T: Send + 'static> Fork<T> {
    pub fn view(&self) -> ForkView<T> {
        ForkView {
            node: self.node.clone(),
        }
    }

    pub fn join(&self) -> Result<(), JoinError> {
        blocking_join(&self.node)
    }

    pub fn get_result(&self) -> Result<T, JoinError> {
        blocking_result(&self.node)
    }

    pub fn status(&self) -> Status {
        self.node.node_status()
    }

    pub fn done(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn resume(&self) {
        self.node.clone().schedule();
    }

    pub fn then(self, f: impl FnOnce() + Send + 'static) -> Self {
        self.node.push_callback(Box::new(move |_| f()));
        self
    }

    pub fn on_value(self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        push_value_callback(&self.node, f);
        self
    }

    pub fn on_error(self, f: impl FnOnce(&Panicked) + Send + 'static) -> Self {
        push_error_callback(&self.node, f);
        self
    }

    pub fn on_cancel(self, f: impl FnOnce() + Send + 'static) -> Self {
        push_cancel_callback(&self.node, f);
        self
    }
}

impl<T: Send + 'static> Future for Fork<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<T> {
        let this = self.get_mut();
        if this.node.node_status().is_terminal() {
            return Poll::Ready(take_outcome(&this.node));
        }
        if !this.awaited {
            this.awaited = true;
            let waker = cx.waker().clone();
            this.node.push_callback(Box::new(move |_| waker.wake()));
        }
        Poll::Pending
    }
}

/// Non-owning observer over a fork. Never frees the promise.
pub struct ForkView<T: Send + 'static> {
    pub(crate) node: Arc<dyn TypedNode<T>>,
}

impl<T: Send + 'static> Clone for ForkView<T> {
    fn clone(&self) -> Self {
        ForkView {
            node: self.node.clone(),
        }
    }
}

impl<T: Send + 'static> ForkView<T> {
    pub fn join(&self) -> Result<(), JoinError> {
        blocking_join(&self.node)
    }

    pub fn status(&self) -> Status {
        self.node.node_status()
    }

    pub fn done(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn then(&self, f: impl FnOnce() + Send + 'static) {
        self.node.push_callback(Box::new(move |_| f()));
    }

    pub fn on_value(&self, f: impl FnOnce(&T) + Send + 'static) {
        push_value_callback(&self.node, f);
    }

    pub fn on_error(&self, f: impl FnOnce(&Panicked) + Send + 'static) {
        push_error_callback(&self.node, f);
    }

    pub fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        push_cancel_callback(&self.node, f);
    }
}

impl<T: Clone + Send + 'static> ForkView<T> {
    /// Block until terminal; observers clone rather than consume.
    pub fn get_result(&self) -> Result<T, JoinError> {
        self.node.wait_final();
        match self.node.node_status() {
            Status::Completed => self
                .node
                .slot()
                .with_value(|value| value.clone())
                .ok_or_else(|| JoinError::Panicked(Panicked::new("result already consumed"))),
            _ => Err(self
                .node
                .slot()
                .error()
                .unwrap_or_else(|| JoinError::Panicked(Panicked::new("result unavailable")))),
        }
    }
}

/// Spawn an owning computation on the executor type `E` from the
/// environment's scheduler.
///
/// Panics when the scheduler has no `E`. A programmer error.
pub fn spawn<E, F>(env: &Environment, body: F) -> Task<F::Output>
where
    E: Executor,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let executor = match env.scheduler().find::<E>() {
        Ok(executor) => executor,
        Err(err) => panic!("{}", err),
    };
    spawn_on(env, executor, body)
}

/// Spawn an owning computation on a member of an indexed executor group.
pub fn spawn_at<E, F>(env: &Environment, pos: usize, body: F) -> Task<F::Output>
where
    E: IndexedExecutor,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let executor = match env.scheduler().find_at::<E>(pos) {
        Ok(executor) => executor,
        Err(err) => panic!("{}", err),
    };
    spawn_on(env, executor, body)
}

/// Spawn an owning computation on an explicit executor.
pub fn spawn_on<F>(env: &Environment, executor: ExecutorRef, body: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Task {
        node: spawn_raw(
            env.resource().clone(),
            env.scheduler().clone(),
            executor,
            true,
            None,
            body,
        ),
        awaited: false,
    }
}

/// Spawn a computation attached to the current one.
pub fn fork<E, F>(ctx: &Context, body: F) -> Fork<F::Output>
where
    E: Executor,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let executor = match ctx.scheduler().find::<E>() {
        Ok(executor) => executor,
        Err(err) => panic!("{}", err),
    };
    fork_on(ctx, executor, body)
}

pub fn fork_at<E, F>(ctx: &Context, pos: usize, body: F) -> Fork<F::Output>
where
    E: IndexedExecutor,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let executor = match ctx.scheduler().find_at::<E>(pos) {
        Ok(executor) => executor,
        Err(err) => panic!("{}", err),
    };
    fork_on(ctx, executor, body)
}

pub fn fork_on<F>(ctx: &Context, executor: ExecutorRef, body: F) -> Fork<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Fork {
        node: spawn_raw(
            ctx.resource().clone(),
            ctx.scheduler().clone(),
            executor,
            false,
            Some(&ctx.parent),
            body,
        ),
        awaited: false,
    }
}
