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

//! The environment handed to new computations: where frames are allocated
//! and which executors are reachable. A `Context` is the in-computation
//! view of the same, plus the link to the running computation itself so
//! children can be attached to it.

use std::sync::Arc;

use crate::promise::ForkParent;
use crate::resource::{default_resource, ResourceHandle};
use crate::scheduler::{Scheduler, SchedulerRef};

/// What a root computation needs to exist: a memory resource for its frame
/// and a scheduler to reach executors through.
#[derive(Clone)]
pub struct Environment {
    resource: ResourceHandle,
    scheduler: SchedulerRef,
}

impl Environment {
    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }
}

pub fn make_environment(scheduler: Scheduler) -> Environment {
    make_environment_in(default_resource(), scheduler)
}

pub fn make_environment_in(resource: ResourceHandle, scheduler: Scheduler) -> Environment {
    Environment {
        resource,
        scheduler: Arc::new(scheduler),
    }
}

/// The running computation's environment, obtained with `context().await`.
/// Passing it to a fork factory attaches the new computation as a child of
/// the current one.
#[derive(Clone)]
pub struct Context {
    pub(crate) parent: Arc<dyn ForkParent>,
    pub(crate) resource: ResourceHandle,
    pub(crate) scheduler: SchedulerRef,
}

impl Context {
    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }

    /// Derive a root environment from this computation's own: same resource,
    /// same scheduler, no parent. For spawning nested owning tasks.
    pub fn environment(&self) -> Environment {
        Environment {
            resource: self.resource.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}
