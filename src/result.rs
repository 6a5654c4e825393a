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

//! Result slot: one atomic status byte discriminating a write-once payload.
//!
//! The payload is written before the status is release-stored; readers
//! acquire-load the status before touching the payload. The terminal
//! transition happens once, on the thread driving the computation; the only
//! transitions out of a terminal state are `Failed -> Handled` and
//! `Cancelled -> Handled`, made by observers claiming an outcome.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::{CancelError, JoinError, Panicked};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running = 0,
    Suspending = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
    Handled = 5,
    Invalid = 6,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Failed | Status::Cancelled | Status::Handled
        )
    }
}

fn status_from_u8(value: u8) -> Status {
    match value {
        0 => Status::Running,
        1 => Status::Suspending,
        2 => Status::Completed,
        3 => Status::Failed,
        4 => Status::Cancelled,
        5 => Status::Handled,
        _ => Status::Invalid,
    }
}

pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub fn new(status: Status) -> AtomicStatus {
        AtomicStatus(AtomicU8::new(status as u8))
    }

    pub fn load(&self, order: Ordering) -> Status {
        status_from_u8(self.0.load(order))
    }

    pub fn store(&self, status: Status, order: Ordering) {
        self.0.store(status as u8, order);
    }

    pub fn compare_exchange(&self, current: Status, new: Status) -> Result<Status, Status> {
        self.0
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(status_from_u8)
            .map_err(status_from_u8)
    }
}

enum Payload<T> {
    Empty,
    Value(T),
    Error(Panicked),
    Cancel(CancelError),
}

pub struct ResultSlot<T> {
    status: AtomicStatus,
    payload: UnsafeCell<Payload<T>>,
    taken: AtomicBool,
}

unsafe impl<T: Send> Sync for ResultSlot<T> {}
unsafe impl<T: Send> Send for ResultSlot<T> {}

impl<T> ResultSlot<T> {
    pub(crate) fn new() -> ResultSlot<T> {
        ResultSlot {
            status: AtomicStatus::new(Status::Running),
            payload: UnsafeCell::new(Payload::Empty),
            taken: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> Status {
        self.status.load(Ordering::Acquire)
    }

    pub(crate) fn store_status(&self, status: Status) {
        self.status.store(status, Ordering::Release);
    }

    pub(crate) fn status_cas(&self, current: Status, new: Status) -> Result<Status, Status> {
        self.status.compare_exchange(current, new)
    }

    /// Claim a Failed or Cancelled outcome. Returns `false` when someone
    /// else claimed it first (or the computation did not fail).
    pub fn mark_handled(&self) -> bool {
        self.status_cas(Status::Failed, Status::Handled).is_ok()
            || self.status_cas(Status::Cancelled, Status::Handled).is_ok()
    }

    // The emplace_* writes run on the single thread driving the computation,
    // before any observer can see a terminal status.

    pub(crate) fn emplace_value(&self, value: T) {
        unsafe { *self.payload.get() = Payload::Value(value) };
        self.store_status(Status::Completed);
    }

    pub(crate) fn emplace_error(&self, error: Panicked) {
        unsafe { *self.payload.get() = Payload::Error(error) };
        self.store_status(Status::Failed);
    }

    pub(crate) fn emplace_cancel(&self, cancel: CancelError) {
        unsafe { *self.payload.get() = Payload::Cancel(cancel) };
        self.store_status(Status::Cancelled);
    }

    /// Move the value out. The first caller wins; the slot stays
    /// `Completed` so late observers still see the outcome kind.
    pub fn take_value(&self) -> Option<T> {
        if self.status() != Status::Completed {
            return None;
        }
        if self.taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        match std::mem::replace(unsafe { &mut *self.payload.get() }, Payload::Empty) {
            Payload::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the value, if present and not yet taken.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        if self.status() != Status::Completed || self.taken.load(Ordering::Acquire) {
            return None;
        }
        match unsafe { &*self.payload.get() } {
            Payload::Value(value) => Some(f(value)),
            _ => None,
        }
    }

    /// The failure outcome, for Failed, Cancelled and Handled slots.
    pub fn error(&self) -> Option<JoinError> {
        match self.status() {
            Status::Failed | Status::Cancelled | Status::Handled => {
                match unsafe { &*self.payload.get() } {
                    Payload::Error(error) => Some(JoinError::Panicked(error.clone())),
                    Payload::Cancel(cancel) => Some(JoinError::Cancelled(cancel.clone())),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let slot: ResultSlot<String> = ResultSlot::new();
        assert_eq!(slot.status(), Status::Running);
        slot.emplace_value("done".to_string());
        assert_eq!(slot.status(), Status::Completed);
        assert_eq!(slot.with_value(|v| v.clone()), Some("done".to_string()));
        assert_eq!(slot.take_value(), Some("done".to_string()));
        assert_eq!(slot.take_value(), None);
        assert_eq!(slot.status(), Status::Completed);
    }

    #[test]
    fn test_error_claim() {
        let slot: ResultSlot<()> = ResultSlot::new();
        slot.emplace_error(Panicked::new("boom"));
        assert_eq!(slot.status(), Status::Failed);
        assert!(slot.mark_handled());
        assert!(!slot.mark_handled());
        assert_eq!(slot.status(), Status::Handled);
        // the outcome stays observable after the claim
        assert_eq!(slot.error().unwrap().message(), "boom");
    }

    #[test]
    fn test_cancel_payload() {
        let slot: ResultSlot<u32> = ResultSlot::new();
        slot.emplace_cancel(CancelError::new(true));
        assert_eq!(slot.status(), Status::Cancelled);
        let err = slot.error().unwrap();
        assert!(err.is_cancelled());
        assert_eq!(err.message(), "The task has been cancelled.");
    }
}
