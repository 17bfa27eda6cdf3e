use ordo::dispatch::{Dispatcher, DispatcherBuilder, Receiver};
use ordo::error::DispatchError;
use ordo::runtime::Executor;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Receiver<u32> for Recorder {
    fn on_start(&self) {
        self.push("onStart".to_owned());
    }

    fn receive(&self, message: u32) {
        if message == 13 {
            panic!("receiver failure");
        }
        self.push(format!("receive({message})"));
    }

    fn on_stop(&self) {
        self.push("onStop".to_owned());
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }

    condition()
}

fn lifecycle_sequence() -> Vec<String> {
    ["onStart", "receive(1)", "receive(2)", "receive(3)", "onStop"]
        .map(str::to_owned)
        .to_vec()
}

fn check_lifecycle(dispatcher: &dyn Dispatcher<&'static str, u32>) {
    let receiver = Arc::new(Recorder::default());

    dispatcher.register("A", receiver.clone(), false).unwrap();
    for n in [1, 2, 3] {
        dispatcher.post_message(&"A", n);
    }
    assert!(dispatcher.unregister(&"A"));

    assert!(wait_until(Duration::from_secs(5), || receiver.events().len() == 5));
    assert_eq!(receiver.events(), lifecycle_sequence());
}

#[test]
fn test_shared_pool_lifecycle() {
    let dispatcher = DispatcherBuilder::new("shared").workers(2).build_shared_pool::<&'static str, u32>();
    check_lifecycle(&dispatcher);

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_bounded_lanes_lifecycle() {
    let dispatcher = DispatcherBuilder::new("bounded").build_bounded::<&'static str, u32>(2);
    check_lifecycle(&dispatcher);

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_unbounded_lanes_lifecycle() {
    let dispatcher = DispatcherBuilder::new("unbounded").build_unbounded::<&'static str, u32>();
    check_lifecycle(&dispatcher);

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_duplicate_registration_is_refused() {
    let dispatcher = DispatcherBuilder::new("duplicate").workers(1).build_shared_pool::<String, u32>();
    let first = Arc::new(Recorder::default());

    dispatcher.register("k".to_owned(), first.clone(), false).unwrap();
    let second = dispatcher.register("k".to_owned(), Arc::new(Recorder::default()), false);

    match second {
        Err(DispatchError::AlreadyRegistered(key)) => assert!(key.contains('k')),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(dispatcher.is_registered(&"k".to_owned()));
    assert_eq!(dispatcher.len(), 1);

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
    assert_eq!(first.events(), ["onStart", "onStop"]);
}

#[test]
fn test_unknown_keys_are_ignored() {
    let dispatcher = DispatcherBuilder::new("unknown").workers(1).build_shared_pool::<u8, u32>();

    dispatcher.post_message(&9, 1);
    assert!(!dispatcher.unregister(&9));
    assert!(!dispatcher.is_registered(&9));
    assert!(dispatcher.is_empty());

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_messages_after_unregister_are_dropped() {
    let dispatcher = DispatcherBuilder::new("late").build_unbounded::<u8, u32>();
    let receiver = Arc::new(Recorder::default());

    dispatcher.register(1, receiver.clone(), false).unwrap();
    dispatcher.post_message(&1, 1);
    dispatcher.unregister(&1);
    dispatcher.post_message(&1, 2);

    assert!(wait_until(Duration::from_secs(5), || receiver.events().last().map(String::as_str) == Some("onStop")));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(receiver.events(), ["onStart", "receive(1)", "onStop"]);

    dispatcher.shutdown();
}

#[test]
fn test_each_key_sees_its_messages_in_order() {
    let dispatcher = DispatcherBuilder::new("keys").workers(4).build_shared_pool::<usize, u32>();
    let receivers: Vec<_> = (0..8).map(|_| Arc::new(Recorder::default())).collect();

    for (key, receiver) in receivers.iter().enumerate() {
        dispatcher.register(key, receiver.clone(), false).unwrap();
    }

    for n in 0..50 {
        for key in 0..receivers.len() {
            dispatcher.post_message(&key, n);
        }
    }

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));

    let mut expected = vec!["onStart".to_owned()];
    expected.extend((0..50).map(|n| format!("receive({n})")));
    expected.push("onStop".to_owned());

    for receiver in &receivers {
        assert_eq!(receiver.events(), expected);
    }
}

#[test]
fn test_post_to_all_reaches_every_receiver() {
    let dispatcher = DispatcherBuilder::new("broadcast").build_bounded::<u8, u32>(4);
    let receivers: Vec<_> = (0..3).map(|_| Arc::new(Recorder::default())).collect();

    for (key, receiver) in receivers.iter().enumerate() {
        dispatcher.register(key as u8, receiver.clone(), false).unwrap();
    }
    dispatcher.post_to_all(7);

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));

    for receiver in &receivers {
        assert_eq!(receiver.events(), ["onStart", "receive(7)", "onStop"]);
    }
}

#[test]
fn test_panicking_receiver_keeps_receiving() {
    let dispatcher = DispatcherBuilder::new("panics").workers(1).build_shared_pool::<u8, u32>();
    let receiver = Arc::new(Recorder::default());

    dispatcher.register(0, receiver.clone(), false).unwrap();
    for n in [12, 13, 14] {
        dispatcher.post_message(&0, n);
    }

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
    assert_eq!(receiver.events(), ["onStart", "receive(12)", "receive(14)", "onStop"]);
}

#[test]
fn test_shutdown_refuses_new_work() {
    let dispatcher = DispatcherBuilder::new("stopped").build_unbounded::<u8, u32>();
    let receiver = Arc::new(Recorder::default());

    dispatcher.register(0, receiver.clone(), false).unwrap();
    dispatcher.shutdown();
    dispatcher.shutdown();

    assert!(matches!(
        dispatcher.register(1, Arc::new(Recorder::default()), false),
        Err(DispatchError::Stopped)
    ));
    assert!(matches!(
        dispatcher.schedule(0, 1, Duration::ZERO),
        Err(DispatchError::Stopped)
    ));
    assert!(!dispatcher.is_registered(&0));

    assert!(dispatcher.await_termination(Duration::from_secs(5)));
    assert_eq!(receiver.events(), ["onStart", "onStop"]);
}

#[test]
fn test_scheduled_post_arrives_after_delay() {
    let dispatcher = DispatcherBuilder::new("delayed").workers(1).build_shared_pool::<u8, u32>();
    let receiver = Arc::new(Recorder::default());
    dispatcher.register(0, receiver.clone(), false).unwrap();

    let start = Instant::now();
    let future = dispatcher.schedule(0, 5, Duration::from_millis(30)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || receiver.events().len() == 2));
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(wait_until(Duration::from_secs(5), || future.is_done()));
    assert_eq!(receiver.events(), ["onStart", "receive(5)"]);

    dispatcher.shutdown();
}

#[test]
fn test_periodic_posts_stop_on_cancel() {
    let dispatcher = DispatcherBuilder::new("periodic").build_unbounded::<u8, u32>();
    let receiver = Arc::new(Recorder::default());
    dispatcher.register(0, receiver.clone(), false).unwrap();

    let rate = dispatcher
        .schedule_at_fixed_rate(0, 1, Duration::ZERO, Duration::from_millis(10))
        .unwrap();
    let delay = dispatcher
        .schedule_with_fixed_delay(0, 2, Duration::ZERO, Duration::from_millis(10))
        .unwrap();

    let count = |n: u32| {
        receiver
            .events()
            .iter()
            .filter(|event| **event == format!("receive({n})"))
            .count()
    };
    assert!(wait_until(Duration::from_secs(5), || count(1) >= 3 && count(2) >= 3));

    rate.cancel();
    delay.cancel();
    thread::sleep(Duration::from_millis(30));
    let settled = receiver.events().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(receiver.events().len(), settled);

    dispatcher.shutdown();
}

struct Concurrency {
    started: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    received: AtomicUsize,
}

impl Receiver<u32> for Concurrency {
    fn on_start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn receive(&self, _: u32) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(30));

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}

fn concurrency() -> Arc<Concurrency> {
    Arc::new(Concurrency {
        started: AtomicUsize::new(0),
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        received: AtomicUsize::new(0),
    })
}

#[test]
fn test_concurrent_receiver_runs_in_parallel() {
    let dispatcher = DispatcherBuilder::new("parallel").workers(4).build_shared_pool::<u8, u32>();
    let receiver = concurrency();

    dispatcher.register(0, receiver.clone(), true).unwrap();
    assert!(wait_until(Duration::from_secs(5), || receiver.started.load(Ordering::SeqCst) == 1));

    for n in 0..8 {
        dispatcher.post_message(&0, n);
    }

    assert!(wait_until(Duration::from_secs(5), || receiver.received.load(Ordering::SeqCst) == 8));
    assert!(receiver.peak.load(Ordering::SeqCst) > 1);

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_exclusive_receiver_runs_alone() {
    let dispatcher = DispatcherBuilder::new("exclusive").workers(4).build_shared_pool::<u8, u32>();
    let receiver = concurrency();

    dispatcher.register(0, receiver.clone(), false).unwrap();
    for n in 0..6 {
        dispatcher.post_message(&0, n);
    }

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
    assert_eq!(receiver.received.load(Ordering::SeqCst), 6);
    assert_eq!(receiver.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn test_lanes_ignore_concurrent_registration() {
    let dispatcher = DispatcherBuilder::new("lanes").build_bounded::<u8, u32>(4);
    let receiver = concurrency();

    dispatcher.register(0, receiver.clone(), true).unwrap();
    for n in 0..6 {
        dispatcher.post_message(&0, n);
    }

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
    assert_eq!(receiver.received.load(Ordering::SeqCst), 6);
    assert_eq!(receiver.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn test_blocked_lane_does_not_stall_other_receivers() {
    let dispatcher = DispatcherBuilder::new("isolated").build_bounded::<u8, u32>(4);
    let blocked = concurrency();
    let free = Arc::new(Recorder::default());

    dispatcher.register(0, blocked.clone(), false).unwrap();
    dispatcher.register(1, free.clone(), false).unwrap();

    for n in 0..5 {
        dispatcher.post_message(&0, n);
    }
    dispatcher.post_message(&1, 1);

    // The blocked receiver needs 150ms for its backlog.
    assert!(wait_until(Duration::from_millis(100), || free.events().len() == 2));
    assert!(blocked.received.load(Ordering::SeqCst) < 5);

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
    assert_eq!(blocked.received.load(Ordering::SeqCst), 5);
}

/// Blocks on its first message until another receiver releases it.
struct Waiter {
    release: Mutex<mpsc::Receiver<()>>,
    released: Mutex<Option<bool>>,
}

impl Receiver<u32> for Waiter {
    fn receive(&self, _: u32) {
        let released = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(2))
            .is_ok();
        *self.released.lock().unwrap() = Some(released);
    }
}

struct Releaser(Mutex<mpsc::Sender<()>>);

impl Receiver<u32> for Releaser {
    fn receive(&self, _: u32) {
        let _ = self.0.lock().unwrap().send(());
    }
}

#[test]
fn test_unbounded_receivers_are_isolated_from_a_blocked_one() {
    let dispatcher = DispatcherBuilder::new("unbounded-isolated").build_unbounded::<&'static str, u32>();
    let (release_tx, release_rx) = mpsc::channel();

    let waiter = Arc::new(Waiter {
        release: Mutex::new(release_rx),
        released: Mutex::new(None),
    });

    dispatcher.register("a", waiter.clone(), false).unwrap();
    dispatcher
        .register("b", Arc::new(Releaser(Mutex::new(release_tx))), false)
        .unwrap();

    // Let both start letters run so the pool has parked workers.
    thread::sleep(Duration::from_millis(50));

    dispatcher.post_message(&"a", 1);
    dispatcher.post_message(&"b", 1);

    assert!(wait_until(Duration::from_secs(5), || waiter.released.lock().unwrap().is_some()));
    assert_eq!(*waiter.released.lock().unwrap(), Some(true));

    dispatcher.shutdown();
    assert!(dispatcher.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_execution_context_runs_tasks() {
    let dispatcher = DispatcherBuilder::new("context").workers(2).build_shared_pool::<u8, u32>();
    let (tx, rx) = std::sync::mpsc::channel();

    dispatcher
        .execution_context()
        .execute(Box::new(move || tx.send(thread::current().name().map(str::to_owned)).unwrap()))
        .unwrap();

    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(name.is_some_and(|n| n.starts_with("context-")));

    dispatcher.shutdown();
}
