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

//! Structured asynchronous runtime.
//!
//! Computations come in two flavors: owning `Task`s and attached `Fork`s.
//! Completion, cancellation and destruction of any computation transitively
//! wait for everything it launched. The tree structure governs lifetime,
//! never error flow. Scheduling goes exclusively through executors reachable
//! from a per-computation scheduler directory; the substrate is a
//! work-stealing thread pool plus a timer thread.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use braid::{
//!     context, fork, make_environment, sleep_for, spawn, Scheduler, ThreadPoolExecutor,
//!     TimerExecutor,
//! };
//!
//! let env = make_environment(
//!     Scheduler::new()
//!         .with(ThreadPoolExecutor::new())
//!         .with(TimerExecutor::new()),
//! );
//!
//! let task = spawn::<ThreadPoolExecutor, _>(&env, async {
//!     let ctx = context().await;
//!     let child = fork::<ThreadPoolExecutor, _>(&ctx, async {
//!         sleep_for(Duration::from_millis(10)).await;
//!         21
//!     });
//!     child.await * 2
//! });
//! assert_eq!(task.get_result().unwrap(), 42);
//! ```

pub mod channel;
pub mod combiner;
pub mod runtime;

mod awaiter;
mod environment;
mod error;
mod executor;
mod promise;
mod resource;
mod result;
mod scheduler;
mod stop;
mod task;

pub use awaiter::{
    cancel, context, destroy_forks, dispatch, get_memory_resource, get_scheduler,
    get_stop_token, sleep_for,
};
pub use combiner::{when, when_all, when_any, when_each, when_n, Any2, Any3, Any4, When};
pub use environment::{make_environment, make_environment_in, Context, Environment};
pub use error::{CancelError, JoinError, Panicked, SchedulerError, SubmitError};
pub use executor::{
    Executor, ExecutorRef, IndexedExecutor, NewThreadExecutor, NoopExecutor,
    ThreadPoolExecutor, TimerExecutor, WorkerExecutor, WorkerGroup,
};
pub use promise::Handle;
pub use resource::{default_resource, GlobalResource, MemoryResource, ResourceBox, ResourceHandle};
pub use result::Status;
pub use runtime::{Mode, ThreadPool};
pub use scheduler::{Scheduler, SchedulerRef};
pub use stop::{StopRegistration, StopSource, StopToken};
pub use task::{fork, fork_at, fork_on, spawn, spawn_at, spawn_on, Fork, ForkView, Task};
