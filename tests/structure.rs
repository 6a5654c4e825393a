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

//! Structural lifetime containment: destruction joins the subtree, errors
//! stay where they happened, cancellation cascades.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use braid::{
    cancel, context, fork, get_stop_token, make_environment, sleep_for, spawn, when_all,
    Environment, Mode, Scheduler, Status, ThreadPoolExecutor, TimerExecutor,
};

fn test_environment(workers: usize) -> Environment {
    let _ = env_logger::builder().is_test(true).try_init();
    make_environment(
        Scheduler::new()
            .with(ThreadPoolExecutor::with_config(workers, Mode::Fixed, workers * 2))
            .with(TimerExecutor::new()),
    )
}

/// Increments on construction, decrements on drop; lives in a fork frame.
struct ScopedCounter {
    counter: Arc<AtomicI32>,
}

impl ScopedCounter {
    fn new(counter: Arc<AtomicI32>) -> ScopedCounter {
        counter.fetch_add(1, Ordering::AcqRel);
        ScopedCounter { counter }
    }
}

impl Drop for ScopedCounter {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[test]
fn task_destructor_joins_children() {
    let counter = Arc::new(AtomicI32::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    {
        let env = test_environment(2);
        let counter = counter.clone();
        let started = started.clone();
        let _task = spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            for _ in 0..3 {
                let counter = counter.clone();
                let started = started.clone();
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    started.fetch_add(1, Ordering::AcqRel);
                    let _live = ScopedCounter::new(counter);
                    sleep_for(Duration::from_millis(50)).await;
                });
            }
            // returns without awaiting the children
        });
    } // the handle's destructor must block until every child settled

    assert_eq!(started.load(Ordering::Acquire), 3);
    assert_eq!(counter.load(Ordering::Acquire), 0);
}

#[test]
fn task_destructor_waits_for_grandchildren() {
    let counter = Arc::new(AtomicI32::new(0));
    {
        let env = test_environment(2);
        let counter = counter.clone();
        let _task = spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            fork::<ThreadPoolExecutor, _>(&ctx, async move {
                let ctx = context().await;
                let counter = counter.clone();
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    let _live = ScopedCounter::new(counter);
                    sleep_for(Duration::from_millis(60)).await;
                });
                sleep_for(Duration::from_millis(20)).await;
            });
        });
    }
    assert_eq!(counter.load(Ordering::Acquire), 0);
}

#[test]
fn destructor_waits_for_siblings_on_error() {
    let counter = Arc::new(AtomicI32::new(0));
    {
        let env = test_environment(2);
        let counter = counter.clone();
        let task = spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            let counter = counter.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move {
                let _live = ScopedCounter::new(counter);
                sleep_for(Duration::from_millis(100)).await;
            });
            let throwing = fork::<ThreadPoolExecutor, _>(&ctx, async move {
                sleep_for(Duration::from_millis(10)).await;
                panic!("Fork Exception");
            });
            // rethrows into this frame; the body dies here
            throwing.await;
            unreachable!();
        });

        let err = task.join().unwrap_err();
        assert_eq!(err.message(), "Fork Exception");
    } // even a failed task's destructor waits for the slow sibling
    assert_eq!(counter.load(Ordering::Acquire), 0);
}

#[test]
fn error_propagates_to_awaiting_task() {
    let env = test_environment(2);
    let task = spawn::<ThreadPoolExecutor, _>(&env, async move {
        let ctx = context().await;
        let child = fork::<ThreadPoolExecutor, _>(&ctx, async move {
            panic!("E");
        });
        child.await
    });

    let err = task.get_result().unwrap_err();
    assert!(err.is_panic());
    assert_eq!(err.message(), "E");
}

#[test]
fn join_reports_unhandled_errors_only() {
    let env = test_environment(2);

    let unhandled = spawn::<ThreadPoolExecutor, _>(&env, async {
        panic!("unseen");
    });
    assert_eq!(unhandled.join().unwrap_err().message(), "unseen");

    let seen = Arc::new(AtomicUsize::new(0));
    let observer = seen.clone();
    let handled = spawn::<ThreadPoolExecutor, _>(&env, async {
        panic!("seen");
    })
    .on_error(move |err| {
        assert_eq!(err.message(), "seen");
        observer.fetch_add(1, Ordering::AcqRel);
    });

    assert!(handled.join().is_ok());
    assert_eq!(handled.status(), Status::Handled);
    assert_eq!(seen.load(Ordering::Acquire), 1);
}

#[test]
fn task_fork_recursion() {
    fn recursion_task(env: Environment, count: Arc<AtomicUsize>) -> braid::Task<()> {
        spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            let child = fork::<ThreadPoolExecutor, _>(&ctx, async move {
                let ctx = context().await;
                if count.fetch_add(1, Ordering::AcqRel) + 1 < 5 {
                    recursion_task(ctx.environment(), count).await;
                }
            });
            child.await
        })
    }

    let env = test_environment(4);
    let count = Arc::new(AtomicUsize::new(0));
    let task = recursion_task(env, count.clone());
    task.join().unwrap();
    assert_eq!(count.load(Ordering::Acquire), 5);
}

#[test]
fn cancellation_cascades_to_descendants() {
    let env = test_environment(4);
    let observed = Arc::new(AtomicUsize::new(0));

    let task = {
        let observed = observed.clone();
        spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            for _ in 0..4 {
                let observed = observed.clone();
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    let token = get_stop_token().await;
                    loop {
                        if token.stop_requested() {
                            observed.fetch_add(1, Ordering::AcqRel);
                            cancel().await;
                            break;
                        }
                        sleep_for(Duration::from_millis(10)).await;
                    }
                });
            }
            sleep_for(Duration::from_millis(50)).await;
            cancel().await;
        })
    };

    assert!(task.join().is_ok());
    let err = task.get_result().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.message(), "The task has been cancelled.");

    drop(task); // blocks until all four children observed the stop and settled
    assert_eq!(observed.load(Ordering::Acquire), 4);
}

#[test]
fn destructor_waits_for_cancelled_children() {
    let counter = Arc::new(AtomicI32::new(0));
    {
        let env = test_environment(3);
        let counter = counter.clone();
        let task = spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            for _ in 0..3 {
                let counter = counter.clone();
                // these never look at the stop token; they run out their 50ms
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    let _live = ScopedCounter::new(counter);
                    sleep_for(Duration::from_millis(50)).await;
                });
            }
            cancel().await;
        });

        assert!(task.join().is_ok());
        assert!(task.get_result().unwrap_err().is_cancelled());
    }
    assert_eq!(counter.load(Ordering::Acquire), 0);
}

#[test]
fn task_waits_for_detached_siblings_after_when_all() {
    let counter = Arc::new(AtomicI32::new(0));
    {
        let env = test_environment(3);
        let counter = counter.clone();
        let _task = spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            let a = fork::<ThreadPoolExecutor, _>(&ctx, async {
                sleep_for(Duration::from_millis(10)).await;
            });
            let b = fork::<ThreadPoolExecutor, _>(&ctx, async {
                sleep_for(Duration::from_millis(20)).await;
            });
            // detached and slower than both
            let counter = counter.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move {
                let _live = ScopedCounter::new(counter);
                sleep_for(Duration::from_millis(80)).await;
            });

            when_all((a, b)).await;
        });
    }
    assert_eq!(counter.load(Ordering::Acquire), 0);
}

#[test]
fn echo_chain_hundred_pipelines() {
    let env = test_environment(4);
    let pool = env
        .scheduler()
        .find_concrete::<ThreadPoolExecutor>()
        .unwrap();

    let task = spawn::<ThreadPoolExecutor, _>(&env, async move {
        let ctx = context().await;
        let pipelines = (0..100)
            .map(|id| {
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    let request = format!("req-{}", id); // read
                    let response = format!("{}-done", request); // process
                    sleep_for(Duration::from_millis(1)).await; // write
                    response
                })
            })
            .collect::<Vec<_>>();
        let mut results = braid::when_n(pipelines, 100).await;
        results.sort();
        results
    });

    let results = task.get_result().unwrap();
    assert_eq!(results.len(), 100);
    for id in 0..100 {
        assert!(results.contains(&format!("req-{}-done", id)));
    }
    drop(task);

    // no leaked workers: every worker thread joins on shutdown
    pool.pool().shut_down();
    assert!(!pool.pool().is_running());
    assert_eq!(pool.pool().size(), 0);
}
