/// Not completed; may still be cancelled.
pub(crate) const PENDING: u8 = 0;

/// Not completed; cancellation is no longer possible.
pub(crate) const UNCANCELLABLE: u8 = 1;

/// A completer won the race and is publishing the outcome.
///
/// Observers treat this state as "not done yet".
pub(crate) const COMPLETING: u8 = 2;

/// The outcome is published and will never change.
pub(crate) const DONE: u8 = 3;
