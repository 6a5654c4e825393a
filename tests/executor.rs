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

//! Executor routing: dispatch migration, worker groups, the noop executor,
//! memory resources, fatal lookups.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use braid::{
    context, destroy_forks, dispatch, fork, get_memory_resource, get_scheduler,
    make_environment, make_environment_in, sleep_for, spawn, spawn_at, GlobalResource,
    MemoryResource, Mode, NoopExecutor, ResourceHandle, Scheduler, ThreadPoolExecutor,
    TimerExecutor, WorkerGroup,
};

fn full_environment() -> braid::Environment {
    let _ = env_logger::builder().is_test(true).try_init();
    make_environment(
        Scheduler::new()
            .with(ThreadPoolExecutor::with_config(2, Mode::Fixed, 4))
            .with(TimerExecutor::new())
            .with(WorkerGroup::new(2)),
    )
}

fn current_thread_name() -> String {
    thread::current().name().unwrap_or("").to_string()
}

#[test]
fn dispatch_migrates_then_returns_home() {
    let env = full_environment();
    let task = spawn::<ThreadPoolExecutor, _>(&env, async {
        let scheduler = get_scheduler().await;
        let target = scheduler.find_at::<WorkerGroup>(1).unwrap();

        dispatch(target).await;
        let there = current_thread_name();

        // the migration is one-shot; the next resumption lands back on the
        // computation's own executor
        sleep_for(Duration::from_millis(10)).await;
        let home = current_thread_name();
        (there, home)
    });

    let (there, home) = task.get_result().unwrap();
    assert_eq!(there, "braid: group worker 1");
    assert!(home.starts_with("braid: worker"), "home was {:?}", home);
}

#[test]
fn spawn_at_addresses_a_group_member() {
    let env = full_environment();
    let task = spawn_at::<WorkerGroup, _>(&env, 0, async { current_thread_name() });
    assert_eq!(task.get_result().unwrap(), "braid: group worker 0");
}

#[test]
fn noop_executor_runs_inline() {
    let env = make_environment(Scheduler::new().with(NoopExecutor));
    let task = spawn::<NoopExecutor, _>(&env, async { 5 });
    // the noop executor resumed the body synchronously during spawn
    assert!(task.done());
    assert_eq!(task.get_result().unwrap(), 5);
}

#[test]
fn destroy_forks_joins_children_in_place() {
    struct Live(Arc<AtomicI32>);
    impl Drop for Live {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::AcqRel);
        }
    }

    let env = full_environment();
    let live = Arc::new(AtomicI32::new(0));
    let task = {
        let live = live.clone();
        spawn::<ThreadPoolExecutor, _>(&env, async move {
            let ctx = context().await;
            for _ in 0..2 {
                let live = live.clone();
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    live.fetch_add(1, Ordering::AcqRel);
                    let _guard = Live(live);
                    sleep_for(Duration::from_millis(20)).await;
                });
            }
            destroy_forks().await;
            live.load(Ordering::Acquire)
        })
    };
    assert_eq!(task.get_result().unwrap(), 0);
}

#[test]
fn custom_memory_resource_carries_the_frames() {
    struct CountingResource {
        live: AtomicUsize,
        total: AtomicUsize,
    }

    impl MemoryResource for CountingResource {
        fn allocate(&self, layout: Layout) -> NonNull<u8> {
            self.live.fetch_add(1, Ordering::AcqRel);
            self.total.fetch_add(1, Ordering::AcqRel);
            GlobalResource.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.fetch_sub(1, Ordering::AcqRel);
            GlobalResource.deallocate(ptr, layout);
        }
    }

    let counting = Arc::new(CountingResource {
        live: AtomicUsize::new(0),
        total: AtomicUsize::new(0),
    });
    let resource: ResourceHandle = counting.clone();

    {
        let env = make_environment_in(
            resource.clone(),
            Scheduler::new()
                .with(ThreadPoolExecutor::with_config(2, Mode::Fixed, 4))
                .with(TimerExecutor::new()),
        );
        let task = spawn::<ThreadPoolExecutor, _>(&env, async {
            let ctx = context().await;
            let from_inside = get_memory_resource().await;
            let child = fork::<ThreadPoolExecutor, _>(&ctx, async {
                sleep_for(Duration::from_millis(5)).await;
            });
            child.await;
            from_inside
        });

        let from_inside = task.get_result().unwrap();
        assert!(Arc::ptr_eq(&from_inside, &resource));
    }

    // one frame per computation, all returned by the time the tree is gone
    assert_eq!(counting.total.load(Ordering::Acquire), 2);
    assert_eq!(counting.live.load(Ordering::Acquire), 0);
}

#[test]
fn cached_pool_executes_and_shuts_down() {
    let env = make_environment(
        Scheduler::new()
            .with(ThreadPoolExecutor::with_config(1, Mode::Cached, 4))
            .with(TimerExecutor::new()),
    );
    let done = Arc::new(AtomicUsize::new(0));

    let tasks = (0..16)
        .map(|_| {
            let done = done.clone();
            spawn::<ThreadPoolExecutor, _>(&env, async move {
                sleep_for(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::AcqRel);
            })
        })
        .collect::<Vec<_>>();
    for task in &tasks {
        task.join().unwrap();
    }
    assert_eq!(done.load(Ordering::Acquire), 16);

    drop(tasks);
    let pool = env
        .scheduler()
        .find_concrete::<ThreadPoolExecutor>()
        .unwrap();
    pool.pool().shut_down();
    assert!(!pool.pool().is_running());
    assert_eq!(pool.pool().size(), 0);
}

#[test]
#[should_panic(expected = "can't find the executor required")]
fn missing_executor_lookup_is_fatal() {
    let env = make_environment(Scheduler::new().with(NoopExecutor));
    let _task = spawn::<ThreadPoolExecutor, _>(&env, async {});
}

#[test]
#[should_panic(expected = "no worker of the group is specified")]
fn scheduling_onto_the_group_itself_is_fatal() {
    let env = make_environment(Scheduler::new().with(WorkerGroup::new(1)));
    let group = env.scheduler().find::<WorkerGroup>().unwrap();
    let _task = braid::spawn_on(&env, group, async {});
}
