use super::Receiver;
use crate::error::PanicError;

use parking_lot::Mutex;

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// An entry of a mailbox.
pub(crate) enum Letter<M> {
    /// First entry of every mailbox, fires `on_start`.
    Start,
    Message(M),
    /// Last entry of every mailbox, fires `on_stop`.
    Stop,
}

/// The ordered message queue feeding one [`Receiver`].
///
/// Any thread may post; any thread may call [`process`](Self::process).
/// Unless concurrency is enabled, a gate counting the threads inside
/// `process` lets at most one of them drain the mailbox: a thread finding
/// the gate held returns immediately and the holder drains its letters.
///
/// Concurrency, when enabled, only starts once `on_start` returned, and
/// stops again as soon as the mailbox is stopped, so `on_start` and
/// `on_stop` always run alone.
pub(crate) struct Inbox<M> {
    /// Key of the receiver, for logging.
    label: String,

    receiver: Arc<dyn Receiver<M>>,
    state: Mutex<State<M>>,
}

struct State<M> {
    letters: VecDeque<Letter<M>>,

    /// Requested at registration.
    enable_concurrent: bool,

    /// Effective: false until `on_start` ran and again after stop.
    concurrent: bool,

    /// Threads currently inside `process`.
    active: usize,

    stopped: bool,
}

impl<M: Send + 'static> Inbox<M> {
    pub(crate) fn new(label: String, receiver: Arc<dyn Receiver<M>>, enable_concurrent: bool) -> Self {
        Self {
            label,
            receiver,
            state: Mutex::new(State {
                letters: VecDeque::from([Letter::Start]),
                enable_concurrent,
                concurrent: false,
                active: 0,
                stopped: false,
            }),
        }
    }

    /// Appends a message. Returns `false`, dropping it, once stopped.
    pub(crate) fn post(&self, message: M) -> bool {
        let mut state = self.state.lock();

        if state.stopped {
            return false;
        }

        state.letters.push_back(Letter::Message(message));
        true
    }

    /// Appends the stop letter. Returns `false` if already stopped.
    pub(crate) fn stop(&self) -> bool {
        let mut state = self.state.lock();

        if state.stopped {
            return false;
        }

        state.stopped = true;
        state.concurrent = false;
        state.letters.push_back(Letter::Stop);
        true
    }

    /// Drains letters until the mailbox is empty or another thread is
    /// needed to keep the gate exclusive.
    pub(crate) fn process(&self) {
        let mut letter = {
            let mut state = self.state.lock();

            if !state.concurrent && state.active != 0 {
                return;
            }

            match state.letters.pop_front() {
                Some(letter) => {
                    state.active += 1;
                    letter
                }
                None => return,
            }
        };

        loop {
            match letter {
                Letter::Start => {
                    self.guarded("on_start", || self.receiver.on_start());

                    let mut state = self.state.lock();
                    if !state.stopped {
                        state.concurrent = state.enable_concurrent;
                    }
                }
                Letter::Message(message) => {
                    self.guarded("receive", || self.receiver.receive(message));
                }
                Letter::Stop => {
                    self.guarded("on_stop", || self.receiver.on_stop());
                }
            }

            let mut state = self.state.lock();

            if !state.concurrent && state.active != 1 {
                // Another thread is draining; leave the rest to it.
                state.active -= 1;
                return;
            }

            match state.letters.pop_front() {
                Some(next) => letter = next,
                None => {
                    state.active -= 1;
                    return;
                }
            }
        }
    }

    /// Runs a receiver callback, logging a panic instead of propagating it.
    fn guarded(&self, callback: &'static str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let error = PanicError::from_payload(&*payload);
            tracing::error!(key = %self.label, callback, %error, "receiver panicked");
        }
    }
}

impl<M> fmt::Debug for Inbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("Inbox")
            .field("key", &self.label)
            .field("pending", &state.letters.len())
            .field("active", &state.active)
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<String>>);

    impl Receiver<u32> for Recorder {
        fn on_start(&self) {
            self.0.lock().unwrap().push("start".to_owned());
        }

        fn receive(&self, message: u32) {
            if message == 13 {
                panic!("unlucky");
            }
            self.0.lock().unwrap().push(message.to_string());
        }

        fn on_stop(&self) {
            self.0.lock().unwrap().push("stop".to_owned());
        }
    }

    fn inbox() -> (Arc<Recorder>, Inbox<u32>) {
        let recorder = Arc::new(Recorder::default());
        let inbox = Inbox::new("test".to_owned(), recorder.clone(), false);
        (recorder, inbox)
    }

    #[test]
    fn start_messages_stop_in_order() {
        let (recorder, inbox) = inbox();

        inbox.post(1);
        inbox.post(2);
        assert!(inbox.stop());
        assert!(!inbox.post(3));
        assert!(!inbox.stop());

        inbox.process();
        assert_eq!(*recorder.0.lock().unwrap(), ["start", "1", "2", "stop"]);
    }

    #[test]
    fn panicking_receiver_does_not_stall_the_mailbox() {
        let (recorder, inbox) = inbox();

        inbox.post(13);
        inbox.post(14);
        inbox.process();

        assert_eq!(*recorder.0.lock().unwrap(), ["start", "14"]);
    }

    #[test]
    fn gate_turns_away_second_thread() {
        let (recorder, inbox) = inbox();

        inbox.state.lock().active = 1;
        inbox.post(1);
        inbox.process();
        assert_eq!(recorder.0.lock().unwrap().len(), 0);

        inbox.state.lock().active = 0;
        inbox.process();
        assert_eq!(*recorder.0.lock().unwrap(), ["start", "1"]);
    }
}
