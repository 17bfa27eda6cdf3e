use super::{Timeout, Timer};

use parking_lot::Mutex;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Callbacks of a [`RepeatedTimer`].
pub trait RepeatedTask: Send + Sync + 'static {
    /// Runs on every trigger.
    fn on_trigger(&self);

    /// Runs once after [`RepeatedTimer::destroy`], when no trigger is in
    /// flight anymore.
    fn on_destroy(&self) {}

    /// Derives the delay of the next trigger from the configured interval,
    /// e.g. to add jitter.
    fn adjust_timeout(&self, interval: Duration) -> Duration {
        interval
    }
}

/// A restartable periodic task over any [`Timer`].
///
/// Each trigger schedules the next one once `on_trigger` returns, so
/// triggers never overlap and the interval is measured between the end of
/// one run and the start of the next.
///
/// A fresh timer is stopped. The state transitions are:
/// - [`start`](Self::start): stopped to running, no-op otherwise,
/// - [`stop`](Self::stop): running to stopped, cancelling the next trigger,
/// - [`reset`](Self::reset): changes the interval and reschedules if running,
/// - [`destroy`](Self::destroy): final; `on_destroy` runs once, after any
///   trigger that is still in flight.
///
/// # Examples
///
/// ```rust
/// use ordo::timer::{RepeatedTask, RepeatedTimer, TimerBuilder};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// struct Heartbeat(AtomicUsize);
///
/// impl RepeatedTask for Heartbeat {
///     fn on_trigger(&self) {
///         self.0.fetch_add(1, Ordering::SeqCst);
///     }
/// }
///
/// let timer = Arc::new(TimerBuilder::new().tick(Duration::from_millis(5)).build());
/// let beats = Arc::new(Heartbeat(AtomicUsize::new(0)));
///
/// let heartbeat = RepeatedTimer::new("heartbeat", timer, Duration::from_millis(20), beats.clone());
/// heartbeat.start();
/// std::thread::sleep(Duration::from_millis(200));
/// heartbeat.destroy();
///
/// assert!(beats.0.load(Ordering::SeqCst) >= 2);
/// ```
#[derive(Clone)]
pub struct RepeatedTimer {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    timer: Arc<dyn Timer>,
    task: Arc<dyn RepeatedTask>,
    state: Mutex<State>,
}

struct State {
    /// Next trigger, if one is scheduled.
    timeout: Option<Timeout>,

    interval: Duration,

    stopped: bool,

    /// A trigger is scheduled or in flight.
    running: bool,

    destroyed: bool,

    /// `on_trigger` is executing right now.
    invoking: bool,
}

impl RepeatedTimer {
    pub fn new<T>(name: impl Into<String>, timer: Arc<T>, interval: Duration, task: Arc<dyn RepeatedTask>) -> Self
    where
        T: Timer + 'static,
    {
        let timer: Arc<dyn Timer> = timer;
        Self::with_timer(name, timer, interval, task)
    }

    /// Same as [`new`](Self::new) for an already type-erased timer.
    pub fn with_timer(
        name: impl Into<String>,
        timer: Arc<dyn Timer>,
        interval: Duration,
        task: Arc<dyn RepeatedTask>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                timer,
                task,
                state: Mutex::new(State {
                    timeout: None,
                    interval,
                    stopped: true,
                    running: false,
                    destroyed: false,
                    invoking: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Starts triggering. No-op if running or destroyed.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();

        if state.destroyed || !state.stopped {
            return;
        }
        state.stopped = false;

        // A trigger still in flight reschedules by itself.
        if state.running {
            return;
        }
        state.running = true;

        self.inner.schedule(&mut state);
    }

    /// Starts triggering from now on, replacing any scheduled trigger.
    pub fn restart(&self) {
        let mut state = self.inner.state.lock();

        if state.destroyed {
            return;
        }
        state.stopped = false;
        state.running = true;

        self.inner.schedule(&mut state);
    }

    /// Stops triggering. A trigger in flight completes. No-op if stopped.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();

        if state.stopped {
            return;
        }
        state.stopped = true;

        // An expired trigger is in flight and clears `running` itself.
        if let Some(timeout) = state.timeout.take() {
            if timeout.cancel() {
                state.running = false;
            }
        }
    }

    /// Sets a new interval and, if running, reschedules with it.
    pub fn reset(&self, interval: Duration) {
        let mut state = self.inner.state.lock();
        state.interval = interval;

        if state.stopped {
            return;
        }

        if state.running {
            self.inner.schedule(&mut state);
        }
    }

    /// Stops the timer for good.
    ///
    /// `on_destroy` runs exactly once: right away if no trigger is in
    /// flight, otherwise when that trigger completes.
    pub fn destroy(&self) {
        let invoke_destroyed = {
            let mut state = self.inner.state.lock();

            if state.destroyed {
                return;
            }
            state.destroyed = true;

            let mut invoke = !state.running;

            if !state.stopped {
                state.stopped = true;

                if let Some(timeout) = state.timeout.take() {
                    if timeout.cancel() {
                        invoke = true;
                        state.running = false;
                    }
                }
            }

            invoke
        };

        if invoke_destroyed {
            self.inner.destroyed();
        }
    }

    /// Cancels the scheduled trigger and fires it on the calling thread;
    /// the trigger reschedules itself as usual.
    ///
    /// No-op if no trigger is scheduled or it is already running.
    pub fn run_once_now(&self) {
        let cancelled = {
            let mut state = self.inner.state.lock();

            match state.timeout.take() {
                Some(timeout) if timeout.cancel() => true,
                other => {
                    state.timeout = other;
                    false
                }
            }
        };

        if cancelled {
            self.inner.run(None);
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.state.lock().interval
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Returns `true` while `on_trigger` is executing.
    pub fn is_invoking(&self) -> bool {
        self.inner.state.lock().invoking
    }
}

impl Inner {
    /// Replaces the scheduled trigger with one `adjust_timeout(interval)`
    /// from now.
    fn schedule(self: &Arc<Self>, state: &mut State) {
        if let Some(previous) = state.timeout.take() {
            previous.cancel();
        }

        let delay = self.task.adjust_timeout(state.interval);
        let weak: Weak<Inner> = Arc::downgrade(self);

        let scheduled = self.timer.new_timeout(
            Box::new(move |fired| {
                if let Some(inner) = weak.upgrade() {
                    inner.run(Some(fired));
                }
            }),
            delay,
        );

        match scheduled {
            Ok(timeout) => state.timeout = Some(timeout),
            Err(error) => {
                tracing::error!(repeated_timer = %self.name, %error, "failed to schedule trigger");
                state.running = false;
            }
        }
    }

    /// One trigger: runs the task, then reschedules or finishes the stop.
    ///
    /// `fired` is the timeout that triggered this run, `None` for a run
    /// forced by `run_once_now`.
    fn run(self: &Arc<Self>, fired: Option<&Timeout>) {
        self.state.lock().invoking = true;

        if panic::catch_unwind(AssertUnwindSafe(|| self.task.on_trigger())).is_err() {
            tracing::error!(repeated_timer = %self.name, "on_trigger panicked");
        }

        let invoke_destroyed = {
            let mut state = self.state.lock();
            state.invoking = false;

            if state.stopped {
                state.running = false;
                state.destroyed
            } else {
                // A reset or restart during the run already scheduled the
                // next trigger.
                let superseded = state
                    .timeout
                    .as_ref()
                    .is_some_and(|next| fired != Some(next));

                if !superseded {
                    state.timeout = None;
                    self.schedule(&mut state);
                }
                false
            }
        };

        if invoke_destroyed {
            self.destroyed();
        }
    }

    fn destroyed(&self) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.task.on_destroy())).is_err() {
            tracing::error!(repeated_timer = %self.name, "on_destroy panicked");
        }
    }
}

impl fmt::Debug for RepeatedTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();

        f.debug_struct("RepeatedTimer")
            .field("name", &self.inner.name)
            .field("interval", &state.interval)
            .field("stopped", &state.stopped)
            .field("running", &state.running)
            .field("destroyed", &state.destroyed)
            .field("invoking", &state.invoking)
            .finish()
    }
}
