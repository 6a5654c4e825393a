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

//! Joint-completion combinators over groups of forks.
//!
//! Each combinator owns a stop source wired three layers deep: the caller's
//! source has a callback into the combinator's, and the combinator's has a
//! callback into each child's, replacing the child's original parent-chain
//! callback. That is safe because the caller's chain now runs through the
//! combinator.
//!
//! `when_all` resumes the caller only once every child is terminal, even
//! when an early failure short-circuited the rest. `when_any` decides the
//! winner by CAS, stops the losers, and also waits for them to settle.
//! `when_n` resumes at the n-th outcome in completion order and ignores
//! whatever trickles in afterwards.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as PollContext, Poll, Waker};

use crate::error::{JoinError, Panicked};
use crate::promise::current;
use crate::result::{ResultSlot, Status};
use crate::stop::{StopRegistration, StopSource};
use crate::task::Fork;

struct Control {
    remaining: AtomicUsize,
    winner: AtomicUsize,
    error: Mutex<Option<JoinError>>,
    stop: StopSource,
    waker: Mutex<Option<Waker>>,
}

impl Control {
    fn new(remaining: usize) -> Control {
        Control {
            remaining: AtomicUsize::new(remaining),
            winner: AtomicUsize::new(usize::MAX),
            error: Mutex::new(None),
            stop: StopSource::new(),
            waker: Mutex::new(None),
        }
    }

    fn wake_caller(&self) {
        if let Some(waker) = self.waker.lock().unwrap().take() {
            waker.wake();
        }
    }
}

/// Claim a non-Completed outcome: first claimant takes the error, anyone
/// later gets a placeholder.
fn claim_failure<T>(slot: &ResultSlot<T>) -> JoinError {
    let err = slot.error();
    if slot.mark_handled() {
        err.unwrap_or_else(|| JoinError::Panicked(Panicked::new("result unavailable")))
    } else {
        JoinError::Panicked(Panicked::new(
            "can't take the result because the outcome was already handled",
        ))
    }
}

fn chain_from_parent(ctl: &Arc<Control>, what: &str) -> StopRegistration {
    let caller = match current() {
        Some(caller) => caller,
        None => panic!("{} is only usable inside a computation", what),
    };
    let stop = ctl.stop.clone();
    caller.register_stop(Box::new(move || {
        stop.request_stop();
    }))
}

fn slot_new<T>() -> Arc<Mutex<Option<T>>> {
    Arc::new(Mutex::new(None))
}

fn take_slot<T>(slot: &Arc<Mutex<Option<T>>>) -> T {
    match slot.lock().unwrap().take() {
        Some(value) => value,
        None => JoinError::Panicked(Panicked::new("combinator result missing")).rethrow(),
    }
}

/// Rewire the child's cancel chain onto the combinator's stop source.
fn chain_child_stop<T: Send + 'static>(ctl: &Arc<Control>, fork: &Fork<T>) {
    let stop_target = fork.node.clone();
    let registration = ctl.stop.register(move || stop_target.request_stop());
    fork.node.set_parent_link(Some(registration));
}

fn attach_all_child<T: Send + 'static>(
    ctl: &Arc<Control>,
    fork: &Fork<T>,
    slot: &Arc<Mutex<Option<T>>>,
) {
    chain_child_stop(ctl, fork);
    let ctl = ctl.clone();
    let slot = slot.clone();
    fork.node.push_callback(Box::new(move |result| {
        if result.status() == Status::Completed {
            if let Some(value) = result.take_value() {
                *slot.lock().unwrap() = Some(value);
            }
        } else {
            let mut first = ctl.error.lock().unwrap();
            if first.is_none() {
                // wall-clock first error wins
                *first = Some(claim_failure(result));
                drop(first);
                ctl.stop.request_stop();
            }
        }
        if ctl.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            ctl.wake_caller();
        }
    }));
}

fn attach_any_child<T: Send + 'static>(
    ctl: &Arc<Control>,
    fork: &Fork<T>,
    slot: &Arc<Mutex<Option<T>>>,
    index: usize,
) {
    chain_child_stop(ctl, fork);
    let ctl = ctl.clone();
    let slot = slot.clone();
    fork.node.push_callback(Box::new(move |result| {
        if ctl
            .winner
            .compare_exchange(usize::MAX, index, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if result.status() == Status::Completed {
                if let Some(value) = result.take_value() {
                    *slot.lock().unwrap() = Some(value);
                }
            } else {
                *ctl.error.lock().unwrap() = Some(claim_failure(result));
            }
            // the race is decided; stop the rest
            ctl.stop.request_stop();
        }
        if ctl.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            ctl.wake_caller();
        }
    }));
}

pub trait IntoWhenAll {
    type Future;

    fn into_when_all(self) -> Self::Future;
}

pub trait IntoWhenAny {
    type Future;

    fn into_when_any(self) -> Self::Future;
}

/// Await every fork of the tuple; yields the tuple of their results.
/// The first failure stops the remaining children and is rethrown once all
/// of them have settled.
pub fn when_all<T: IntoWhenAll>(forks: T) -> T::Future {
    forks.into_when_all()
}

/// Await the first fork of the tuple to finish; yields a tagged union with
/// the winner's result. The losers are stopped and awaited before the
/// caller resumes. A losing failure is discarded; the winner's is rethrown.
pub fn when_any<T: IntoWhenAny>(forks: T) -> T::Future {
    forks.into_when_any()
}

macro_rules! when_all_tuple {
    ($WhenAll:ident; $(($F:ident, $value:ident, $idx:tt)),+) => {
        pub struct $WhenAll<$($F: Send + 'static),+> {
            forks: Option<($(Fork<$F>,)+)>,
            slots: ($(Arc<Mutex<Option<$F>>>,)+),
            ctl: Option<Arc<Control>>,
            _parent_chain: Option<StopRegistration>,
        }

        impl<$($F: Send + 'static),+> IntoWhenAll for ($(Fork<$F>,)+) {
            type Future = $WhenAll<$($F),+>;

            fn into_when_all(self) -> $WhenAll<$($F),+> {
                $WhenAll {
                    forks: Some(self),
                    slots: ($(slot_new::<$F>(),)+),
                    ctl: None,
                    _parent_chain: None,
                }
            }
        }

        impl<$($F: Send + 'static),+> Future for $WhenAll<$($F),+> {
            type Output = ($($F,)+);

            fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<Self::Output> {
                let this = self.get_mut();
                if this.ctl.is_none() {
                    let count = [$($idx as usize),+].len();
                    let ctl = Arc::new(Control::new(count));
                    this._parent_chain = Some(chain_from_parent(&ctl, "when_all"));
                    let ($($value,)+) = match this.forks.take() {
                        Some(forks) => forks,
                        None => unreachable!(),
                    };
                    $(attach_all_child(&ctl, &$value, &this.slots.$idx);)+
                    this.ctl = Some(ctl);
                }

                let ctl = match this.ctl.as_ref() {
                    Some(ctl) => ctl,
                    None => unreachable!(),
                };
                *ctl.waker.lock().unwrap() = Some(cx.waker().clone());
                if ctl.remaining.load(Ordering::Acquire) != 0 {
                    return Poll::Pending;
                }
                if let Some(err) = ctl.error.lock().unwrap().take() {
                    err.rethrow();
                }
                Poll::Ready(($(take_slot(&this.slots.$idx),)+))
            }
        }
    };
}

when_all_tuple!(WhenAll2; (A, a, 0), (B, b, 1));
when_all_tuple!(WhenAll3; (A, a, 0), (B, b, 1), (C, c, 2));
when_all_tuple!(WhenAll4; (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3));
when_all_tuple!(WhenAll5; (A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4));

/// Winner of a two-way `when_any`.
#[derive(Debug, PartialEq)]
pub enum Any2<A, B> {
    First(A),
    Second(B),
}

impl<A, B> Any2<A, B> {
    pub fn index(&self) -> usize {
        match self {
            Any2::First(_) => 0,
            Any2::Second(_) => 1,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Any3<A, B, C> {
    First(A),
    Second(B),
    Third(C),
}

impl<A, B, C> Any3<A, B, C> {
    pub fn index(&self) -> usize {
        match self {
            Any3::First(_) => 0,
            Any3::Second(_) => 1,
            Any3::Third(_) => 2,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Any4<A, B, C, D> {
    First(A),
    Second(B),
    Third(C),
    Fourth(D),
}

impl<A, B, C, D> Any4<A, B, C, D> {
    pub fn index(&self) -> usize {
        match self {
            Any4::First(_) => 0,
            Any4::Second(_) => 1,
            Any4::Third(_) => 2,
            Any4::Fourth(_) => 3,
        }
    }
}

macro_rules! when_any_tuple {
    ($WhenAny:ident, $Any:ident; $(($F:ident, $value:ident, $Variant:ident, $idx:tt)),+) => {
        pub struct $WhenAny<$($F: Send + 'static),+> {
            forks: Option<($(Fork<$F>,)+)>,
            slots: ($(Arc<Mutex<Option<$F>>>,)+),
            ctl: Option<Arc<Control>>,
            _parent_chain: Option<StopRegistration>,
        }

        impl<$($F: Send + 'static),+> IntoWhenAny for ($(Fork<$F>,)+) {
            type Future = $WhenAny<$($F),+>;

            fn into_when_any(self) -> $WhenAny<$($F),+> {
                $WhenAny {
                    forks: Some(self),
                    slots: ($(slot_new::<$F>(),)+),
                    ctl: None,
                    _parent_chain: None,
                }
            }
        }

        impl<$($F: Send + 'static),+> Future for $WhenAny<$($F),+> {
            type Output = $Any<$($F),+>;

            fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<Self::Output> {
                let this = self.get_mut();
                if this.ctl.is_none() {
                    let count = [$($idx as usize),+].len();
                    let ctl = Arc::new(Control::new(count));
                    this._parent_chain = Some(chain_from_parent(&ctl, "when_any"));
                    let ($($value,)+) = match this.forks.take() {
                        Some(forks) => forks,
                        None => unreachable!(),
                    };
                    $(attach_any_child(&ctl, &$value, &this.slots.$idx, $idx);)+
                    this.ctl = Some(ctl);
                }

                let ctl = match this.ctl.as_ref() {
                    Some(ctl) => ctl,
                    None => unreachable!(),
                };
                *ctl.waker.lock().unwrap() = Some(cx.waker().clone());
                if ctl.remaining.load(Ordering::Acquire) != 0 {
                    return Poll::Pending;
                }
                if let Some(err) = ctl.error.lock().unwrap().take() {
                    err.rethrow();
                }
                let winner = ctl.winner.load(Ordering::Acquire);
                match winner {
                    $($idx => Poll::Ready($Any::$Variant(take_slot(&this.slots.$idx))),)+
                    _ => JoinError::Panicked(Panicked::new("when_any finished without a winner"))
                        .rethrow(),
                }
            }
        }
    };
}

when_any_tuple!(WhenAny2, Any2; (A, a, First, 0), (B, b, Second, 1));
when_any_tuple!(WhenAny3, Any3; (A, a, First, 0), (B, b, Second, 1), (C, c, Third, 2));
when_any_tuple!(WhenAny4, Any4; (A, a, First, 0), (B, b, Second, 1), (C, c, Third, 2), (D, d, Fourth, 3));

struct NState<T> {
    count: usize,
    results: Vec<T>,
    error: Option<JoinError>,
}

/// Await the first `n` outcomes of a homogeneous group, in completion
/// order. `n` is clamped to the group size. A failure among the first `n`
/// stops the remainder and is rethrown; later outcomes are ignored.
pub fn when_n<T: Send + 'static>(forks: Vec<Fork<T>>, n: usize) -> WhenN<T> {
    WhenN {
        forks: Some(forks),
        n,
        state: Arc::new(Mutex::new(NState {
            count: 0,
            results: Vec::new(),
            error: None,
        })),
        ctl: None,
        _parent_chain: None,
    }
}

pub struct WhenN<T: Send + 'static> {
    forks: Option<Vec<Fork<T>>>,
    n: usize,
    state: Arc<Mutex<NState<T>>>,
    ctl: Option<Arc<Control>>,
    _parent_chain: Option<StopRegistration>,
}

impl<T: Send + 'static> Future for WhenN<T> {
    type Output = Vec<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext) -> Poll<Vec<T>> {
        let this = self.get_mut();
        if this.ctl.is_none() {
            let forks = match this.forks.take() {
                Some(forks) => forks,
                None => unreachable!(),
            };
            this.n = this.n.min(forks.len());
            let n = this.n;
            let ctl = Arc::new(Control::new(forks.len()));
            this._parent_chain = Some(chain_from_parent(&ctl, "when_n"));

            for fork in &forks {
                chain_child_stop(&ctl, fork);
                let ctl = ctl.clone();
                let state = this.state.clone();
                fork.node.push_callback(Box::new(move |result| {
                    let mut failed = false;
                    let finished;
                    {
                        let mut state = state.lock().unwrap();
                        if state.count >= n {
                            // late outcome, success or failure: ignored
                            return;
                        }
                        state.count += 1;
                        finished = state.count == n;
                        if result.status() == Status::Completed {
                            if let Some(value) = result.take_value() {
                                state.results.push(value);
                            }
                        } else if state.error.is_none() {
                            state.error = Some(claim_failure(result));
                            failed = true;
                        }
                    }
                    if failed || finished {
                        ctl.stop.request_stop();
                    }
                    if finished {
                        ctl.wake_caller();
                    }
                }));
            }
            this.ctl = Some(ctl);
            // the fork handles go away here; the promises stay linked to
            // the parent's child list
        }

        let ctl = match this.ctl.as_ref() {
            Some(ctl) => ctl,
            None => unreachable!(),
        };
        *ctl.waker.lock().unwrap() = Some(cx.waker().clone());

        let mut state = this.state.lock().unwrap();
        if state.count < this.n {
            return Poll::Pending;
        }
        if let Some(err) = state.error.take() {
            drop(state);
            err.rethrow();
        }
        Poll::Ready(std::mem::take(&mut state.results))
    }
}

/// Pipeline closure for `forks | when(n)`.
#[derive(Debug, Clone, Copy)]
pub struct When {
    n: usize,
}

pub fn when(n: usize) -> When {
    When { n }
}

/// `forks | when_each()` awaits the whole group.
pub fn when_each() -> When {
    When { n: usize::MAX }
}

impl<T: Send + 'static> std::ops::BitOr<When> for Vec<Fork<T>> {
    type Output = WhenN<T>;

    fn bitor(self, when: When) -> WhenN<T> {
        when_n(self, when.n)
    }
}
