use ordo::runtime::{Executor, ExecutorExt, Lifecycle, ThreadPool, ThreadPoolBuilder};

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_fixed_pool_runs_every_task() {
    let pool = ThreadPool::fixed("fixed", 4);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let counter = counter.clone();
        pool.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }

    pool.shutdown_gracefully();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
}

#[test]
fn test_fixed_pool_never_exceeds_its_size() {
    let pool = ThreadPool::fixed("bounded", 2);
    let threads = Arc::new(Mutex::new(HashSet::new()));

    for _ in 0..20 {
        let threads = threads.clone();
        pool.execute(Box::new(move || {
            threads
                .lock()
                .unwrap()
                .insert(thread::current().name().map(str::to_owned));
            thread::sleep(Duration::from_millis(2));
        }))
        .unwrap();
    }

    pool.shutdown_gracefully();
    assert!(pool.await_termination(Duration::from_secs(5)));

    let threads = threads.lock().unwrap();
    assert!(threads.len() <= 2);
    assert!(threads.iter().all(|name| name.as_deref().is_some_and(|n| n.starts_with("bounded-"))));
}

#[test]
fn test_elastic_pool_grows_for_blocking_tasks() {
    let pool = ThreadPool::unbounded_elastic("elastic");
    let barrier = Arc::new(Barrier::new(5));

    // Deadlocks unless the pool runs all five at once.
    let done: Vec<_> = (0..4)
        .map(|_| {
            let barrier = barrier.clone();
            pool.submit(move || {
                barrier.wait();
            })
        })
        .collect();

    barrier.wait();
    for promise in done {
        promise.get().unwrap();
    }
    assert!(pool.live_workers() >= 4);

    pool.shutdown_gracefully();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(pool.live_workers(), 0);
}

#[test]
fn test_back_to_back_tasks_do_not_share_one_idle_worker() {
    let pool = ThreadPool::unbounded_elastic("warm");

    // Leave exactly one worker parked.
    pool.submit(|| ()).get().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pool.live_workers(), 1);

    let (released_tx, released_rx) = mpsc::channel::<()>();
    let (outcome_tx, outcome_rx) = mpsc::channel();

    pool.execute(Box::new(move || {
        let released = released_rx.recv_timeout(Duration::from_secs(2)).is_ok();
        outcome_tx.send(released).unwrap();
    }))
    .unwrap();
    pool.execute(Box::new(move || released_tx.send(()).unwrap()))
        .unwrap();

    assert!(outcome_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(pool.live_workers(), 2);

    pool.shutdown_gracefully();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_idle_workers_retire_after_keep_alive() {
    let pool = ThreadPoolBuilder::new("retire")
        .max_threads(4)
        .keep_alive(Duration::from_millis(20))
        .build();
    let barrier = Arc::new(Barrier::new(4));

    let done: Vec<_> = (0..3)
        .map(|_| {
            let barrier = barrier.clone();
            pool.submit(move || {
                barrier.wait();
            })
        })
        .collect();

    barrier.wait();
    for promise in done {
        promise.get().unwrap();
    }

    thread::sleep(Duration::from_millis(200));
    assert_eq!(pool.live_workers(), 0);

    // Retired workers are replaced on demand.
    assert_eq!(pool.submit(|| 5).get().unwrap(), 5);

    pool.shutdown_gracefully();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_shutdown_returns_queued_tasks() {
    let pool = ThreadPool::fixed("drain", 1);
    let (started_tx, started_rx) = std::sync::mpsc::channel();

    pool.execute(Box::new(move || {
        started_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
    }))
    .unwrap();
    started_rx.recv().unwrap();

    for _ in 0..4 {
        pool.execute(Box::new(|| ())).unwrap();
    }

    assert_eq!(pool.shutdown().len(), 4);
    assert!(pool.is_shutdown());
    assert!(pool.execute(Box::new(|| ())).is_err());

    assert!(pool.await_termination(Duration::from_secs(5)));
    assert!(pool.is_terminated());
}

#[test]
fn test_panicking_task_keeps_worker_alive() {
    let pool = ThreadPool::fixed("panics", 1);

    pool.execute(Box::new(|| panic!("pool task failure"))).unwrap();
    assert_eq!(pool.submit(|| "still here").get().unwrap(), "still here");

    pool.shutdown_gracefully();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_unused_pool_terminates_immediately() {
    let pool = ThreadPool::bounded_elastic("unused", 8);

    pool.shutdown_gracefully();
    assert!(pool.is_terminated());
    assert_eq!(pool.name(), "unused");
}

#[test]
#[should_panic(expected = "must not exceed")]
fn test_builder_rejects_core_above_max() {
    let _ = ThreadPoolBuilder::new("invalid")
        .core_threads(4)
        .max_threads(2)
        .build();
}
