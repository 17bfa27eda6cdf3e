use crate::utils;

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Origin of the timer clock, fixed on first use.
fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();

    *ORIGIN.get_or_init(Instant::now)
}

/// Milliseconds elapsed on a monotonic clock.
///
/// Wall-clock adjustments never move timer deadlines.
pub(crate) fn now_ms() -> i64 {
    millis(origin().elapsed())
}

/// Timer clock reading at which `delay` from now has fully elapsed.
///
/// Rounded up, so a task never becomes due before its delay.
pub(crate) fn deadline_ms(delay: Duration) -> i64 {
    let at = origin().elapsed().saturating_add(delay);
    let whole = millis(at);

    if at.subsec_nanos() % 1_000_000 == 0 {
        whole
    } else {
        whole.saturating_add(1)
    }
}

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
pub(crate) fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// The monotonic instant corresponding to `ms` on the timer clock.
pub(crate) fn instant_at(ms: i64) -> Instant {
    utils::after(origin(), Duration::from_millis(ms.max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let first = now_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(now_ms() >= first + 5);
    }

    #[test]
    fn deadline_rounds_up() {
        let before = now_ms();
        let deadline = deadline_ms(Duration::from_millis(20));

        assert!(deadline >= before + 20);
        assert!(deadline <= now_ms() + 21);
        assert_eq!(deadline_ms(Duration::MAX), i64::MAX);
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), i64::MAX);
    }
}
