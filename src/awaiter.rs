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

//! Awaitables available inside a computation body.
//!
//! The accessor flavors (`context`, `get_stop_token`, `get_scheduler`,
//! `get_memory_resource`) never suspend. `sleep_for` suspends into the timer
//! executor; `dispatch` migrates the continuation onto another executor;
//! `cancel` transitions the computation to Cancelled and never resumes the
//! frame. All of them read the running computation off the poll-scoped
//! thread-local and panic when used outside one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as PollContext, Poll};
use std::time::Duration;

use crate::environment::Context;
use crate::executor::{ExecutorRef, TimerExecutor};
use crate::promise::{current, CurrentPromise};
use crate::resource::ResourceHandle;
use crate::scheduler::SchedulerRef;
use crate::stop::StopToken;

fn current_or_panic(operation: &str) -> Arc<dyn CurrentPromise> {
    match current() {
        Some(promise) => promise,
        None => panic!("{} is only usable inside a computation", operation),
    }
}

/// Retrieve the running computation's environment, for handing to children.
pub fn context() -> ContextFuture {
    ContextFuture
}

pub struct ContextFuture;

impl Future for ContextFuture {
    type Output = Context;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<Context> {
        Poll::Ready(current_or_panic("context()").make_context())
    }
}

/// The cooperative cancellation token of the running computation.
pub fn get_stop_token() -> StopTokenFuture {
    StopTokenFuture
}

pub struct StopTokenFuture;

impl Future for StopTokenFuture {
    type Output = StopToken;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<StopToken> {
        Poll::Ready(current_or_panic("get_stop_token()").stop_token())
    }
}

pub fn get_scheduler() -> SchedulerFuture {
    SchedulerFuture
}

pub struct SchedulerFuture;

impl Future for SchedulerFuture {
    type Output = SchedulerRef;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<SchedulerRef> {
        Poll::Ready(current_or_panic("get_scheduler()").scheduler())
    }
}

pub fn get_memory_resource() -> MemoryResourceFuture {
    MemoryResourceFuture
}

pub struct MemoryResourceFuture;

impl Future for MemoryResourceFuture {
    type Output = ResourceHandle;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<ResourceHandle> {
        Poll::Ready(current_or_panic("get_memory_resource()").resource())
    }
}

/// Forcefully cancel the running computation. The frame is never resumed;
/// awaiting this never returns.
pub fn cancel() -> CancelFuture {
    CancelFuture
}

pub struct CancelFuture;

impl Future for CancelFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<()> {
        current_or_panic("cancel()").cancel_self();
        Poll::Pending
    }
}

/// Join every attached child to a terminal state, then destroy them.
/// Blocks the driving thread while it waits, like the destructor would.
pub fn destroy_forks() -> DestroyForksFuture {
    DestroyForksFuture
}

pub struct DestroyForksFuture;

impl Future for DestroyForksFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<()> {
        current_or_panic("destroy_forks()").join_and_destroy_forks();
        Poll::Ready(())
    }
}

/// Suspend for `duration` via the scheduler's timer executor, resuming on
/// the computation's own executor.
///
/// Panics when the scheduler carries no `TimerExecutor`.
pub fn sleep_for(duration: Duration) -> SleepFuture {
    SleepFuture {
        duration,
        armed: false,
    }
}

pub struct SleepFuture {
    duration: Duration,
    armed: bool,
}

impl Future for SleepFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<()> {
        if self.armed {
            return Poll::Ready(());
        }
        self.armed = true;

        let promise = current_or_panic("sleep_for()");
        let timer = match promise.scheduler().find_concrete::<TimerExecutor>() {
            Ok(timer) => timer,
            Err(err) => panic!("sleep_for(): {}", err),
        };
        let waker = cx.waker().clone();
        timer.execute_after(Box::new(move || waker.wake()), self.duration);
        Poll::Pending
    }
}

/// Migrate the continuation: the code after the `.await` runs on `executor`.
/// One-shot; later suspensions resume on the computation's own executor
/// again.
pub fn dispatch(executor: ExecutorRef) -> DispatchFuture {
    DispatchFuture {
        executor: Some(executor),
    }
}

pub struct DispatchFuture {
    executor: Option<ExecutorRef>,
}

impl Future for DispatchFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut PollContext) -> Poll<()> {
        match self.executor.take() {
            Some(executor) => {
                current_or_panic("dispatch()").set_migration(executor);
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}
