use ordo::runtime::{
    ChooserStrategy, EventLoopGroup, EventLoopGroupBuilder, Executor, ExecutorExt, Lifecycle, MessageLoop, Scheduler,
    SingleThreadEventLoop,
};

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_tasks_run_in_submission_order() {
    let event_loop = SingleThreadEventLoop::new("fifo");
    let results = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let results = results.clone();
        event_loop
            .execute(Box::new(move || results.lock().unwrap().push(i)))
            .unwrap();
    }

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
    assert_eq!(*results.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_tasks_run_on_the_loop_thread() {
    let event_loop = SingleThreadEventLoop::new("pinned");

    let names: Vec<_> = (0..5)
        .map(|_| event_loop.submit(|| thread::current().name().map(str::to_owned)))
        .collect();

    for name in names {
        assert_eq!(name.get().unwrap().as_deref(), Some("pinned"));
    }

    let inside = event_loop.clone();
    assert!(event_loop.submit(move || inside.in_event_loop()).get().unwrap());
    assert!(!event_loop.in_event_loop());

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_scheduled_tasks_fire_in_deadline_order() {
    let event_loop = SingleThreadEventLoop::new("deadlines");
    let order = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let mut futures = Vec::new();
    for (label, delay) in [("late", 60), ("early", 20), ("middle", 40)] {
        let order = order.clone();
        futures.push(
            event_loop
                .schedule(
                    Box::new(move || order.lock().unwrap().push((label, start.elapsed()))),
                    Duration::from_millis(delay),
                )
                .unwrap(),
        );
    }

    for future in &futures {
        future.promise().await_done().unwrap();
        assert!(future.is_done());
    }

    let order = order.lock().unwrap();
    let labels: Vec<_> = order.iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, vec!["early", "middle", "late"]);
    assert!(order[0].1 >= Duration::from_millis(20));
    assert!(order[2].1 >= Duration::from_millis(60));

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_cancelled_schedule_never_runs() {
    let event_loop = SingleThreadEventLoop::new("cancel");
    let ran = Arc::new(AtomicUsize::new(0));

    let r = ran.clone();
    let future = event_loop
        .schedule(
            Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(50),
        )
        .unwrap();

    assert!(future.delay() > Duration::ZERO);
    assert!(future.cancel());
    assert!(future.is_cancelled());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_fixed_rate_repeats_until_cancelled() {
    let event_loop = SingleThreadEventLoop::new("fixed-rate");
    let ticks = Arc::new(AtomicUsize::new(0));

    let t = ticks.clone();
    let future = event_loop
        .schedule_at_fixed_rate(
            Arc::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(5),
            Duration::from_millis(10),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(120));
    assert!(future.cancel());
    let seen = ticks.load(Ordering::SeqCst);
    assert!(seen >= 3, "only {seen} ticks");

    thread::sleep(Duration::from_millis(50));
    assert!(ticks.load(Ordering::SeqCst) <= seen + 1);

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_fixed_delay_waits_after_each_run() {
    let event_loop = SingleThreadEventLoop::new("fixed-delay");
    let runs = Arc::new(Mutex::new(Vec::new()));

    let r = runs.clone();
    let future = event_loop
        .schedule_with_fixed_delay(
            Arc::new(move || {
                r.lock().unwrap().push(Instant::now());
                thread::sleep(Duration::from_millis(10));
            }),
            Duration::ZERO,
            Duration::from_millis(20),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(150));
    future.cancel();

    let runs = runs.lock().unwrap();
    assert!(runs.len() >= 2);
    for pair in runs.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(30));
    }

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_panicking_periodic_task_stops_repeating() {
    let event_loop = SingleThreadEventLoop::new("periodic-panic");
    let runs = Arc::new(AtomicUsize::new(0));

    let r = runs.clone();
    let future = event_loop
        .schedule_at_fixed_rate(
            Arc::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
                panic!("periodic failure");
            }),
            Duration::ZERO,
            Duration::from_millis(5),
        )
        .unwrap();

    future.promise().await_done().unwrap();
    assert!(future.promise().cause().is_some());

    thread::sleep(Duration::from_millis(30));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_shutdown_returns_pending_tasks() {
    let event_loop = SingleThreadEventLoop::new("shutdown");
    let (started_tx, started_rx) = std::sync::mpsc::channel();

    event_loop
        .execute(Box::new(move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        }))
        .unwrap();
    started_rx.recv().unwrap();

    for _ in 0..3 {
        event_loop.execute(Box::new(|| ())).unwrap();
    }

    let pending = event_loop.shutdown();
    assert_eq!(pending.len(), 3);
    assert!(event_loop.is_shutdown());
    assert!(event_loop.execute(Box::new(|| ())).is_err());
    assert!(event_loop.shutdown().is_empty());

    assert!(event_loop.await_termination(Duration::from_secs(5)));
    assert!(event_loop.is_terminated());
}

#[test]
fn test_graceful_shutdown_runs_queued_tasks() {
    let event_loop = SingleThreadEventLoop::new("graceful");
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let ran = ran.clone();
        event_loop
            .execute(Box::new(move || {
                thread::sleep(Duration::from_millis(2));
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));
    assert_eq!(ran.load(Ordering::SeqCst), 10);
}

#[test]
fn test_unstarted_loop_terminates_on_shutdown() {
    let event_loop = SingleThreadEventLoop::new("idle");

    assert!(event_loop.shutdown().is_empty());
    assert!(event_loop.is_terminated());
    assert!(event_loop.submit(|| 1).get().is_err());
}

/// Signals when the thread that owns it exits.
struct ExitSignal(mpsc::Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

thread_local! {
    static EXIT_SIGNAL: RefCell<Option<ExitSignal>> = const { RefCell::new(None) };
}

#[test]
fn test_dropped_loop_releases_its_thread() {
    let event_loop = SingleThreadEventLoop::new("dropped");
    let (tx, rx) = mpsc::channel();

    event_loop
        .submit(move || EXIT_SIGNAL.with(|signal| *signal.borrow_mut() = Some(ExitSignal(tx))))
        .get()
        .unwrap();
    drop(event_loop);

    let waited = SingleThreadEventLoop::IDLE_POLL * 10;
    assert!(rx.recv_timeout(waited).is_ok());
}

#[test]
fn test_max_durations_do_not_overflow() {
    let event_loop = SingleThreadEventLoop::new("far");
    let ran = Arc::new(AtomicUsize::new(0));

    let r = ran.clone();
    let future = event_loop
        .schedule(
            Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::MAX,
        )
        .unwrap();
    assert_eq!(event_loop.submit(|| 7).get_timeout(Duration::MAX).unwrap(), 7);
    assert!(future.cancel());

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::MAX));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_group_round_robin() {
    let group = EventLoopGroupBuilder::new("rr")
        .size(3)
        .chooser(ChooserStrategy::RoundRobin)
        .build_single_threaded();

    let names: Vec<_> = (0..6).map(|_| group.next().name().to_owned()).collect();
    assert_eq!(names, vec!["rr-0", "rr-1", "rr-2", "rr-0", "rr-1", "rr-2"]);

    assert_eq!(group.len(), 3);
    assert_eq!(group.get(1).map(|l| l.name()), Some("rr-1"));
    assert!(group.get(3).is_none());
    assert_eq!(group.iter().count(), 3);

    group.shutdown();
    assert!(group.is_terminated());
}

#[test]
fn test_group_spreads_tasks_over_members() {
    let group = EventLoopGroupBuilder::new("spread")
        .size(4)
        .build_single_threaded();
    let threads = Arc::new(Mutex::new(std::collections::HashSet::new()));

    for _ in 0..8 {
        let threads = threads.clone();
        group
            .execute(Box::new(move || {
                threads
                    .lock()
                    .unwrap()
                    .insert(thread::current().name().map(str::to_owned));
            }))
            .unwrap();
    }

    group.shutdown();
    assert!(group.await_termination(Duration::from_secs(5)));
    assert!(group.is_shutdown());
    assert_eq!(threads.lock().unwrap().len(), 4);
}

#[test]
fn test_group_from_existing_loops() {
    let loops = vec![SingleThreadEventLoop::new("a"), SingleThreadEventLoop::new("b")];
    let group = EventLoopGroup::with_loops(loops, ChooserStrategy::Auto);

    let picked: Vec<_> = (&group).into_iter().map(|l| l.name().to_owned()).collect();
    assert_eq!(picked, vec!["a", "b"]);

    let answer = group.next().submit(|| 7);
    assert_eq!(answer.get().unwrap(), 7);

    group.shutdown();
    assert!(group.is_terminated());
}

#[test]
#[should_panic]
fn test_group_rejects_empty_member_list() {
    let _ = EventLoopGroup::<SingleThreadEventLoop>::with_loops(Vec::new(), ChooserStrategy::Auto);
}

#[test]
fn test_group_schedule_forwards_to_member() {
    let group = EventLoopGroupBuilder::new("timed").size(2).build_single_threaded();
    let fired = Arc::new(AtomicUsize::new(0));

    let f = fired.clone();
    let future = group
        .schedule(
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(10),
        )
        .unwrap();

    future.promise().await_done().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    group.shutdown();
}

#[test]
fn test_message_loop_preserves_order() {
    let event_loop = SingleThreadEventLoop::new("handler");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let messages = MessageLoop::new(event_loop.clone(), move |m: String| sink.lock().unwrap().push(m));

    for i in 0..20 {
        messages.receive(format!("m{i}")).unwrap();
    }

    event_loop.shutdown_gracefully();
    assert!(event_loop.await_termination(Duration::from_secs(5)));

    let expected: Vec<_> = (0..20).map(|i| format!("m{i}")).collect();
    assert_eq!(*seen.lock().unwrap(), expected);

    assert!(messages.receive("late".to_owned()).is_err());
    assert_eq!(messages.executor().name(), "handler");
}
