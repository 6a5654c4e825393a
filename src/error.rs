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

//! Error types of the runtime.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::panic;

/// The cancellation sentinel stored in a cancelled computation's result slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelError {
    owned: bool,
}

impl CancelError {
    pub(crate) fn new(owned: bool) -> CancelError {
        CancelError { owned }
    }

    pub fn message(&self) -> &'static str {
        if self.owned {
            "The task has been cancelled."
        } else {
            "The fork has been cancelled."
        }
    }
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl Error for CancelError {}

/// A computation body panicked; the payload message survives, the payload
/// itself does not (it may not be shareable across observers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panicked {
    message: String,
}

impl Panicked {
    pub(crate) fn new(message: impl Into<String>) -> Panicked {
        Panicked {
            message: message.into(),
        }
    }

    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Panicked {
        if let Some(message) = payload.downcast_ref::<&'static str>() {
            return Panicked::new(*message);
        }
        if let Some(message) = payload.downcast_ref::<String>() {
            return Panicked::new(message.clone());
        }
        // a failed or cancelled child rethrown across an await
        if let Some(err) = payload.downcast_ref::<JoinError>() {
            return match err {
                JoinError::Panicked(p) => p.clone(),
                JoinError::Cancelled(c) => Panicked::new(c.message()),
            };
        }
        Panicked::new("<opaque panic payload>")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "computation panicked: {}", self.message)
    }
}

impl Error for Panicked {}

/// Outcome of observing a computation that did not complete with a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    Panicked(Panicked),
    Cancelled(CancelError),
}

impl JoinError {
    pub fn message(&self) -> &str {
        match self {
            JoinError::Panicked(p) => p.message(),
            JoinError::Cancelled(c) => c.message(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JoinError::Cancelled(_))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, JoinError::Panicked(_))
    }

    /// Rethrow into the calling computation. The awaiting frame's unwind
    /// boundary catches the payload and records it as that computation's own
    /// failure. `resume_unwind` keeps the panic hook quiet: the original
    /// failure already reported itself once.
    pub(crate) fn rethrow(self) -> ! {
        panic::resume_unwind(Box::new(self))
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JoinError::Panicked(p) => p.fmt(f),
            JoinError::Cancelled(c) => c.fmt(f),
        }
    }
}

impl Error for JoinError {}

/// A scheduler lookup missed. Programmer error: the spawn paths turn this
/// into a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    ExecutorNotFound(&'static str),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedulerError::ExecutorNotFound(name) => {
                write!(f, "this scheduler can't find the executor required: {}", name)
            }
        }
    }
}

impl Error for SchedulerError {}

/// Submitting to a pool that is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    Shutdown,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SubmitError::Shutdown => f.write_str("thread pool can't take on a new task"),
        }
    }
}

impl Error for SubmitError {}
