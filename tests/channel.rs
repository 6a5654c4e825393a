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

//! Channel semantics inside computations: rendezvous pairing, close
//! behavior, bounded ring under contention.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use braid::channel::{Channel, RingChannel};
use braid::{
    context, fork, make_environment, sleep_for, spawn, when_all, Environment, Mode, Scheduler,
    ThreadPoolExecutor, TimerExecutor,
};

fn test_environment(workers: usize) -> Environment {
    make_environment(
        Scheduler::new()
            .with(ThreadPoolExecutor::with_config(workers, Mode::Fixed, workers * 2))
            .with(TimerExecutor::new()),
    )
}

#[test]
fn rendezvous_send_receive() {
    let env = test_environment(4);
    let task = spawn::<ThreadPoolExecutor, _>(&env, async {
        let channel = Arc::new(Channel::new());
        let ctx = context().await;

        let producer = {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move { (&*channel << 42).await })
        };
        let consumer = {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move {
                let mut slot = 0;
                let ok = (&*channel >> &mut slot).await;
                (ok, slot)
            })
        };

        let (ok, value) = consumer.await;
        let sent = producer.await;
        (sent, ok, value)
    });

    assert_eq!(task.get_result().unwrap(), (true, true, 42));
}

#[test]
fn rendezvous_pairs_fifo_per_direction() {
    let env = test_environment(4);
    let task = spawn::<ThreadPoolExecutor, _>(&env, async {
        let channel: Arc<Channel<u32>> = Arc::new(Channel::new());
        let ctx = context().await;

        // queue two senders first, in order
        let first = {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move { channel.send(1).await })
        };
        sleep_for(Duration::from_millis(20)).await;
        let second = {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move { channel.send(2).await })
        };
        sleep_for(Duration::from_millis(20)).await;

        let a = channel.recv().await;
        let b = channel.recv().await;
        let both_sent = first.await && second.await;
        (a, b, both_sent)
    });

    assert_eq!(task.get_result().unwrap(), (Some(1), Some(2), true));
}

#[test]
fn close_unblocks_waiting_reader() {
    let env = test_environment(4);
    let task = spawn::<ThreadPoolExecutor, _>(&env, async {
        let channel: Arc<Channel<i32>> = Arc::new(Channel::new());
        let ctx = context().await;

        let consumer = {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move {
                let mut slot = 0;
                (&*channel >> &mut slot).await
            })
        };
        {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move {
                sleep_for(Duration::from_millis(50)).await;
                channel.close();
            });
        }
        consumer.await
    });

    assert!(!task.get_result().unwrap());
}

#[test]
fn close_unblocks_waiting_writer() {
    let env = test_environment(4);
    let task = spawn::<ThreadPoolExecutor, _>(&env, async {
        let channel: Arc<Channel<i32>> = Arc::new(Channel::new());
        let ctx = context().await;

        let producer = {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move { channel.send(5).await })
        };
        {
            let channel = channel.clone();
            fork::<ThreadPoolExecutor, _>(&ctx, async move {
                sleep_for(Duration::from_millis(50)).await;
                channel.close();
            });
        }
        producer.await
    });

    assert!(!task.get_result().unwrap());
}

#[test]
fn bounded_ring_mpmc_inside_computations() {
    let env = test_environment(4);
    let sum = Arc::new(AtomicI64::new(0));
    const PER_PRODUCER: i64 = 500;

    let task = {
        let sum = sum.clone();
        spawn::<ThreadPoolExecutor, _>(&env, async move {
            let channel: Arc<RingChannel<i64>> = Arc::new(RingChannel::new(16));
            let ctx = context().await;

            let producer = |start: i64| {
                let channel = channel.clone();
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    for i in 0..PER_PRODUCER {
                        // bounded sends never suspend; back off while full
                        while !channel.send(start + i).await {
                            sleep_for(Duration::from_millis(1)).await;
                        }
                    }
                })
            };
            let consumer = |sum: Arc<AtomicI64>| {
                let channel = channel.clone();
                fork::<ThreadPoolExecutor, _>(&ctx, async move {
                    let mut slot = 0i64;
                    loop {
                        if (&*channel >> &mut slot).await {
                            sum.fetch_add(slot, Ordering::AcqRel);
                        } else if !channel.active() {
                            break;
                        } else {
                            sleep_for(Duration::from_millis(1)).await;
                        }
                    }
                })
            };

            let c1 = consumer(sum.clone());
            let c2 = consumer(sum.clone());
            when_all((producer(10_000), producer(20_000))).await;

            // drain whatever is left before closing
            let mut slot = 0i64;
            while (&*channel >> &mut slot).await {
                sum.fetch_add(slot, Ordering::AcqRel);
            }
            channel.close();
            when_all((c1, c2)).await;
        })
    };

    task.join().unwrap();
    let expected: i64 = (0..PER_PRODUCER).map(|i| 10_000 + i).sum::<i64>()
        + (0..PER_PRODUCER).map(|i| 20_000 + i).sum::<i64>();
    assert_eq!(sum.load(Ordering::Acquire), expected);
}
