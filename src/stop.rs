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

//! Cooperative cancellation: a stop source with a removable callback list.
//!
//! Parent computations register a callback on their own source that requests
//! the child's source; cancelling the parent therefore cascades down the
//! tree, each edge firing exactly once. A registration deregisters itself on
//! drop, which is what lets a combinator *replace* the per-child parent
//! chain with its own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type StopFn = Box<dyn FnOnce() + Send>;

struct StopState {
    requested: AtomicBool,
    callbacks: Mutex<Vec<(u64, StopFn)>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct StopSource {
    state: Arc<StopState>,
}

#[derive(Clone)]
pub struct StopToken {
    state: Arc<StopState>,
}

/// Removes its callback from the source when dropped, if it has not fired.
pub struct StopRegistration {
    state: Weak<StopState>,
    id: u64,
}

impl StopSource {
    pub fn new() -> StopSource {
        StopSource {
            state: Arc::new(StopState {
                requested: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            state: self.state.clone(),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.state.requested.load(Ordering::Acquire)
    }

    /// Fire every registered callback, off-lock, exactly once. Returns
    /// `false` when a stop had already been requested.
    pub fn request_stop(&self) -> bool {
        if self.state.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callbacks = {
            let mut guard = self.state.callbacks.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for (_, callback) in callbacks {
            callback();
        }
        true
    }

    /// Register `callback` to run at the stop request. If the request
    /// already happened, runs it synchronously right here.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) -> StopRegistration {
        self.register_boxed(Box::new(callback))
    }

    pub(crate) fn register_boxed(&self, callback: StopFn) -> StopRegistration {
        {
            let mut guard = self.state.callbacks.lock().unwrap();
            // the check must happen under the lock: request_stop takes the
            // callback list behind the same lock after flipping the flag
            if !self.state.requested.load(Ordering::Acquire) {
                let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
                guard.push((id, callback));
                return StopRegistration {
                    state: Arc::downgrade(&self.state),
                    id,
                };
            }
        }
        callback();
        StopRegistration {
            state: Weak::new(),
            id: 0,
        }
    }
}

impl Default for StopSource {
    fn default() -> StopSource {
        StopSource::new()
    }
}

impl StopToken {
    pub fn stop_requested(&self) -> bool {
        self.state.requested.load(Ordering::Acquire)
    }
}

impl Drop for StopRegistration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut guard = state.callbacks.lock().unwrap();
            guard.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_request_fires_callbacks_once() {
        let source = StopSource::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let _reg = source.register(move || {
            f.fetch_add(1, Ordering::AcqRel);
        });

        assert!(source.request_stop());
        assert!(!source.request_stop());
        assert_eq!(fired.load(Ordering::Acquire), 1);
        assert!(source.token().stop_requested());
    }

    #[test]
    fn test_late_registration_runs_immediately() {
        let source = StopSource::new();
        source.request_stop();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let _reg = source.register(move || {
            f.fetch_add(1, Ordering::AcqRel);
        });
        assert_eq!(fired.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_dropped_registration_does_not_fire() {
        let source = StopSource::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let reg = source.register(move || {
            f.fetch_add(1, Ordering::AcqRel);
        });
        drop(reg);
        source.request_stop();
        assert_eq!(fired.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_cascade_chain() {
        let parent = StopSource::new();
        let child = StopSource::new();
        let grandchild = StopSource::new();

        let c = child.clone();
        let _r1 = parent.register(move || {
            c.request_stop();
        });
        let g = grandchild.clone();
        let _r2 = child.register(move || {
            g.request_stop();
        });

        parent.request_stop();
        assert!(grandchild.stop_requested());
    }
}
